// 🔢 Coefficient Resolver - enumerated activity inputs → numeric multipliers
//
// Tables are plain values built once and handed to the scorer; there is no
// process-wide state. Looking up a key outside a table is a configuration
// error and never falls back to a default.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{RatingError, Result};

/// Activity kind option value → kind coefficient
const KIND_COEFFICIENTS: [(i64, f64); 9] = [
    (1, 1.0),   // public communication
    (2, 2.0),   // speech
    (3, 3.0),   // program item
    (4, 4.0),   // extra-parliamentary work
    (5, 5.0),   // parliamentary question
    (6, 6.0),   // participation in a draft law
    (7, 7.0),   // vote on subsidies
    (8, 7.0),   // vote on a public contract
    (10, 10.0), // vote on a draft law
];

/// Weight class (scaled by 10) → weight coefficient
const WEIGHT_COEFFICIENTS: [(i64, f64); 5] = [
    (10, 1.0),
    (15, 1.5),
    (20, 2.0),
    (25, 2.5),
    (30, 3.0),
];

/// Raw score option value → score used in the rating (taken as is, but only
/// the enumerated values are valid)
const SCORE_VALUES: [(i64, f64); 5] = [
    (0, 0.0),   // bad
    (3, 3.0),   // rather bad
    (5, 5.0),   // neutral
    (7, 7.0),   // rather good
    (10, 10.0), // good
];

// ============================================================================
// COEFFICIENT TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientTable {
    name: &'static str,
    entries: BTreeMap<i64, f64>,
}

impl CoefficientTable {
    pub fn new(name: &'static str, entries: &[(i64, f64)]) -> Self {
        CoefficientTable {
            name,
            entries: entries.iter().copied().collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Coefficient for `key`, or `UnknownCoefficientKey`
    pub fn resolve(&self, key: i64) -> Result<f64> {
        self.entries
            .get(&key)
            .copied()
            .ok_or(RatingError::UnknownCoefficientKey {
                table: self.name,
                key,
            })
    }

    /// Documented key domain, ascending
    pub fn keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.keys().copied()
    }
}

// ============================================================================
// COEFFICIENT TABLES
// ============================================================================

/// Both lookup tables the activity scorer needs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientTables {
    pub kind: CoefficientTable,
    pub weight: CoefficientTable,
    pub score: CoefficientTable,
}

impl CoefficientTables {
    /// The fixed domain tables
    pub fn standard() -> Self {
        CoefficientTables {
            kind: CoefficientTable::new("kind", &KIND_COEFFICIENTS),
            weight: CoefficientTable::new("weight", &WEIGHT_COEFFICIENTS),
            score: CoefficientTable::new("score", &SCORE_VALUES),
        }
    }

    pub fn kind_coefficient(&self, kind: i64) -> Result<f64> {
        self.kind.resolve(kind)
    }

    pub fn weight_coefficient(&self, weight_class: i64) -> Result<f64> {
        self.weight.resolve(weight_class)
    }

    pub fn score_value(&self, raw_score: i64) -> Result<f64> {
        self.score.resolve(raw_score)
    }
}

impl Default for CoefficientTables {
    fn default() -> Self {
        CoefficientTables::standard()
    }
}
