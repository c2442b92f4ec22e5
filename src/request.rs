// 📨 Calculation Request - the single entry point's parameters
//
//   Calculate(entity_type, entity_ids | "all", source_update_level, propagation_level)
//
// Validation happens here, before the engine touches the store: a malformed
// request is rejected without any write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entities::EntityType;
use crate::error::{RatingError, Result};

/// Deepest useful recursion: activity → individual → organization
pub const MAX_LEVEL: u8 = 2;

// ============================================================================
// ENTITY SCOPE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityScope {
    /// Every eligible entity of the requested type
    All,
    /// Explicit ids, deduplicated and ascending
    Ids(Vec<i64>),
}

impl EntityScope {
    /// Explicit id set; empty sets and non-positive ids are rejected
    pub fn ids(ids: impl IntoIterator<Item = i64>) -> Result<Self> {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        if ids.is_empty() {
            return Err(RatingError::InvalidScope("no entity ids given".to_string()));
        }
        if let Some(bad) = ids.iter().find(|id| **id <= 0) {
            return Err(RatingError::InvalidScope(format!("invalid entity id {}", bad)));
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(EntityScope::Ids(ids))
    }

    /// Parse `all` (any case) or a comma separated id list such as `1, 2,3`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("all") {
            return Ok(EntityScope::All);
        }
        if input.is_empty() {
            return Err(RatingError::InvalidScope("empty entity id list".to_string()));
        }

        let ids = input
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<i64>()
                    .map_err(|_| RatingError::InvalidScope(format!("'{}' is not an entity id", part)))
            })
            .collect::<Result<Vec<i64>>>()?;

        EntityScope::ids(ids)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, EntityScope::All)
    }
}

impl FromStr for EntityScope {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self> {
        EntityScope::parse(s)
    }
}

impl fmt::Display for EntityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityScope::All => f.write_str("all"),
            EntityScope::Ids(ids) => {
                let parts: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

// ============================================================================
// CALCULATION REQUEST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRequest {
    pub entity_type: EntityType,
    pub scope: EntityScope,

    /// Recalculate what the entities depend on first (0 = no)
    pub source_update_level: u8,

    /// Recalculate what depends on the entities afterwards (0 = no)
    pub propagation_level: u8,

    /// Evaluation instant; sampled once when the request runs if unset
    pub now: Option<DateTime<Utc>>,
}

impl CalculationRequest {
    pub fn new(entity_type: EntityType, scope: EntityScope) -> Self {
        CalculationRequest {
            entity_type,
            scope,
            source_update_level: 0,
            propagation_level: 0,
            now: None,
        }
    }

    pub fn with_source_update(mut self, level: u8) -> Self {
        self.source_update_level = level;
        self
    }

    pub fn with_propagation(mut self, level: u8) -> Self {
        self.propagation_level = level;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (axis, level) in [
            ("source update", self.source_update_level),
            ("propagation", self.propagation_level),
        ] {
            if level > MAX_LEVEL {
                return Err(RatingError::InvalidLevel {
                    axis,
                    level,
                    max: MAX_LEVEL,
                });
            }
        }
        if let EntityScope::Ids(ids) = &self.scope {
            if ids.is_empty() {
                return Err(RatingError::InvalidScope("no entity ids given".to_string()));
            }
        }
        Ok(())
    }
}
