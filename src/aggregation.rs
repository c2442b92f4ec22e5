// 🧮 Category Aggregator - ballasted weighted average of activity ratings
//
// For the overall score and for each category separately:
//
//   score = (Σ weighted_rating + BALLAST_VALUE) / (Σ weight_coefficient + BALLAST_WEIGHT)
//
// The ballast acts as a prior of BALLAST_VALUE / BALLAST_WEIGHT = 5.0, the
// middle of the score range: sparse contacts are pulled towards 5.0 and a
// contact without any activity scores exactly 5.0.
//
// Aggregation is set-oriented: a whole batch of activities is folded into an
// arena of per-contact accumulators in one pass, instead of querying each
// contact separately.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::coefficients::CoefficientTables;
use crate::entities::{Activity, Category, CategoryScores};
use crate::error::RatingError;
use crate::scoring::{score_activities, ActivityRating};

/// Virtual rating added to every numerator
pub const BALLAST_VALUE: f64 = 15.0;

/// Virtual weight added to every denominator
pub const BALLAST_WEIGHT: f64 = 3.0;

// ============================================================================
// WEIGHTED SUM
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightedSum {
    pub value: f64,
    pub weight: f64,
}

impl WeightedSum {
    pub fn add(&mut self, value: f64, weight: f64) {
        self.value += value;
        self.weight += weight;
    }

    pub fn ballasted(&self) -> f64 {
        (self.value + BALLAST_VALUE) / (self.weight + BALLAST_WEIGHT)
    }
}

// ============================================================================
// SCORE ACCUMULATOR
// ============================================================================

/// Running sums of one contact
#[derive(Debug, Clone, Default)]
pub struct ScoreAccumulator {
    overall: WeightedSum,
    by_category: [WeightedSum; Category::COUNT],
    activity_count: usize,
}

impl ScoreAccumulator {
    /// Count a rated activity; unknown categories only feed the overall score
    pub fn add(&mut self, category: Option<Category>, rating: &ActivityRating) {
        self.overall.add(rating.weighted_rating, rating.weight_coefficient);
        if let Some(category) = category {
            self.by_category[category.index()].add(rating.weighted_rating, rating.weight_coefficient);
        }
        self.activity_count += 1;
    }

    pub fn activity_count(&self) -> usize {
        self.activity_count
    }

    pub fn scores(&self) -> CategoryScores {
        let mut scores = CategoryScores::uniform(0.0);
        scores.overall = self.overall.ballasted();
        for category in Category::ALL {
            scores.set(category, self.by_category[category.index()].ballasted());
        }
        scores
    }
}

// ============================================================================
// CONTACT AGGREGATES (arena keyed by contact id)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ContactAggregates {
    accumulators: HashMap<i64, ScoreAccumulator>,
}

impl ContactAggregates {
    /// Arena with an empty accumulator for every contact in scope
    pub fn new(contact_ids: impl IntoIterator<Item = i64>) -> Self {
        ContactAggregates {
            accumulators: contact_ids
                .into_iter()
                .map(|id| (id, ScoreAccumulator::default()))
                .collect(),
        }
    }

    /// Add a rating to a contact in scope; ratings for other contacts are ignored
    pub fn add(&mut self, contact_id: i64, category: Option<Category>, rating: &ActivityRating) -> bool {
        match self.accumulators.get_mut(&contact_id) {
            Some(accumulator) => {
                accumulator.add(category, rating);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, contact_id: i64) -> Option<&ScoreAccumulator> {
        self.accumulators.get(&contact_id)
    }

    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Final ballasted scores, ordered by contact id
    pub fn into_scores(self) -> BTreeMap<i64, CategoryScores> {
        self.accumulators
            .into_iter()
            .map(|(id, accumulator)| (id, accumulator.scores()))
            .collect()
    }
}

// ============================================================================
// BATCH AGGREGATION
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    /// Scores per contact id
    pub scores: BTreeMap<i64, CategoryScores>,

    /// Activities left out because they could not be scored
    pub rejected: Vec<(i64, RatingError)>,
}

/// Aggregate the rated activities of a set of contacts
///
/// `activities` may contain anything; only published political activities
/// targeting one of `contact_ids` are counted. Every contact in scope gets a
/// score, even without activities.
pub fn aggregate_contacts(
    contact_ids: &[i64],
    activities: &[Activity],
    tables: &CoefficientTables,
    now: DateTime<Utc>,
    parallel: bool,
) -> AggregationOutcome {
    let in_scope: HashSet<i64> = contact_ids.iter().copied().collect();
    let eligible: Vec<Activity> = activities
        .iter()
        .filter(|a| a.is_rated() && in_scope.contains(&a.target_contact_id))
        .cloned()
        .collect();

    let mut arena = ContactAggregates::new(contact_ids.iter().copied());
    let mut rejected = Vec::new();

    for (activity, (_, result)) in eligible
        .iter()
        .zip(score_activities(&eligible, tables, now, parallel))
    {
        match result {
            Ok(rating) => {
                let category = activity.category();
                if category.is_none() {
                    warn!(
                        activity_id = activity.id,
                        category = activity.category,
                        "Unknown category, counted in overall score only"
                    );
                }
                arena.add(activity.target_contact_id, category, &rating);
            }
            Err(err) => {
                warn!(activity_id = activity.id, error = %err, "Activity left out of aggregate");
                rejected.push((activity.id, err));
            }
        }
    }

    debug!(
        contacts = arena.len(),
        activities = eligible.len(),
        rejected = rejected.len(),
        "Aggregated contact scores"
    );

    AggregationOutcome {
        scores: arena.into_scores(),
        rejected,
    }
}

/// Aggregate a single contact over the given activities
pub fn aggregate(
    contact_id: i64,
    activities: &[Activity],
    tables: &CoefficientTables,
    now: DateTime<Utc>,
) -> CategoryScores {
    aggregate_contacts(&[contact_id], activities, tables, now, false)
        .scores
        .remove(&contact_id)
        .unwrap_or_else(|| CategoryScores::uniform(BALLAST_VALUE / BALLAST_WEIGHT))
}
