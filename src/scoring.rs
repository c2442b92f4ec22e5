// ⭐ Activity Scorer - weighted rating of a single activity
//
//   weighted_rating = kind_coefficient * weight_coefficient * raw_score * decay(age)
//
// The age decay is a smooth recency weighting:
//   decay(t) = 0.75 / ((t / 2.9)^4 + 1) + 0.25      (t = age in years)
// 1.0 for a fresh activity, inflection near 2.9 years, floor 0.25.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::coefficients::CoefficientTables;
use crate::entities::Activity;
use crate::error::Result;

/// Share of the rating that fades with age
pub const DECAY_AMPLITUDE: f64 = 0.75;

/// Share of the rating an activity keeps forever
pub const DECAY_FLOOR: f64 = 0.25;

/// Age (years) around which the decay turns over
pub const DECAY_INFLECTION_YEARS: f64 = 2.9;

pub const DECAY_EXPONENT: i32 = 4;

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 60.0 * 60.0;

// ============================================================================
// AGE DECAY
// ============================================================================

/// Age in years of 365 days; activities dated after `now` count as fresh
pub fn age_in_years(occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - occurred_at).num_seconds().max(0);
    seconds as f64 / SECONDS_PER_YEAR
}

pub fn age_decay(age_years: f64) -> f64 {
    let age = age_years.max(0.0);
    DECAY_AMPLITUDE / ((age / DECAY_INFLECTION_YEARS).powi(DECAY_EXPONENT) + 1.0) + DECAY_FLOOR
}

// ============================================================================
// ACTIVITY RATING
// ============================================================================

/// Result of scoring one activity, with the factors that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActivityRating {
    pub activity_id: i64,
    pub kind_coefficient: f64,
    pub weight_coefficient: f64,
    pub decay: f64,
    pub weighted_rating: f64,
}

/// Score one activity at the instant `now`
pub fn score_activity(
    activity: &Activity,
    tables: &CoefficientTables,
    now: DateTime<Utc>,
) -> Result<ActivityRating> {
    let kind_coefficient = tables.kind_coefficient(activity.kind)?;
    let weight_coefficient = tables.weight_coefficient(activity.weight_class)?;
    let score = tables.score_value(activity.raw_score)?;
    let decay = age_decay(age_in_years(activity.occurred_at, now));

    Ok(ActivityRating {
        activity_id: activity.id,
        kind_coefficient,
        weight_coefficient,
        decay,
        weighted_rating: kind_coefficient * weight_coefficient * score * decay,
    })
}

/// Score a batch of activities; entries keep the input order
///
/// Each activity is independent, so the batch is spread over the rayon pool
/// when `parallel` is set.
pub fn score_activities(
    activities: &[Activity],
    tables: &CoefficientTables,
    now: DateTime<Utc>,
    parallel: bool,
) -> Vec<(i64, Result<ActivityRating>)> {
    let score = |activity: &Activity| (activity.id, score_activity(activity, tables, now));

    if parallel {
        activities.par_iter().map(score).collect()
    } else {
        activities.iter().map(score).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Category;
    use crate::error::RatingError;
    use chrono::{Duration, TimeZone};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decay_bounds() {
        assert_eq!(age_decay(0.0), 1.0);
        assert!((age_decay(1000.0) - DECAY_FLOOR).abs() < 1e-9);
        assert!(age_decay(1000.0) > DECAY_FLOOR);

        // inflection: half of the fading share is gone at 2.9 years
        assert!((age_decay(DECAY_INFLECTION_YEARS) - 0.625).abs() < 1e-12);
    }

    #[test]
    fn test_decay_is_monotonic() {
        let mut previous = age_decay(0.0);
        for step in 1..=400 {
            let current = age_decay(step as f64 * 0.05);
            assert!(current <= previous, "decay increased at step {}", step);
            previous = current;
        }
    }

    #[test]
    fn test_future_activities_count_as_fresh() {
        let now = fixed_now();
        assert_eq!(age_in_years(now + Duration::days(30), now), 0.0);
        assert_eq!(age_in_years(now - Duration::days(365), now), 1.0);
    }

    #[test]
    fn test_fresh_speech_rating() {
        let now = fixed_now();
        let activity = Activity::new(1, 10, Category::Livestock, 2, 10, 7, now);

        let rating = score_activity(&activity, &CoefficientTables::standard(), now).unwrap();

        assert_eq!(rating.kind_coefficient, 2.0);
        assert_eq!(rating.weight_coefficient, 1.0);
        assert_eq!(rating.decay, 1.0);
        assert_eq!(rating.weighted_rating, 14.0);
    }

    #[test]
    fn test_one_year_old_vote_rating() {
        let now = fixed_now();
        let activity = Activity::new(2, 10, Category::Livestock, 10, 15, 10, now - Duration::days(365));

        let rating = score_activity(&activity, &CoefficientTables::standard(), now).unwrap();

        let expected_decay = 0.75 / ((1.0f64 / 2.9).powi(4) + 1.0) + 0.25;
        assert!((rating.decay - expected_decay).abs() < 1e-12);
        assert!((rating.decay - 0.9895).abs() < 1e-3);
        assert!((rating.weighted_rating - 148.43).abs() < 0.01);
    }

    #[test]
    fn test_neutral_score_kind_three() {
        // kind 3, score 5, weight 1.0 used to be mis-rated; must be 15.0
        let now = fixed_now();
        let activity = Activity::new(3, 10, Category::Livestock, 3, 10, 5, now);

        let rating = score_activity(&activity, &CoefficientTables::standard(), now).unwrap();
        assert!((rating.weighted_rating - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_kind_fails() {
        let now = fixed_now();
        let activity = Activity::new(4, 10, Category::Pets, 9, 10, 7, now);

        let err = score_activity(&activity, &CoefficientTables::standard(), now).unwrap_err();
        assert_eq!(err, RatingError::UnknownCoefficientKey { table: "kind", key: 9 });
    }

    #[test]
    fn test_score_outside_domain_fails() {
        let now = fixed_now();
        let activity = Activity::new(6, 10, Category::Pets, 2, 10, 8, now);

        let err = score_activity(&activity, &CoefficientTables::standard(), now).unwrap_err();
        assert_eq!(err, RatingError::UnknownCoefficientKey { table: "score", key: 8 });
    }

    #[test]
    fn test_rescoring_is_bit_identical() {
        let now = fixed_now();
        let tables = CoefficientTables::standard();
        let activity = Activity::new(5, 10, Category::Pets, 6, 25, 3, now - Duration::days(1234));

        let first = score_activity(&activity, &tables, now).unwrap();
        for _ in 0..10 {
            let again = score_activity(&activity, &tables, now).unwrap();
            assert_eq!(first.weighted_rating.to_bits(), again.weighted_rating.to_bits());
        }
    }

    #[test]
    fn test_batch_keeps_order_and_isolates_failures() {
        let now = fixed_now();
        let tables = CoefficientTables::standard();
        let activities = vec![
            Activity::new(1, 10, Category::Pets, 2, 10, 7, now),
            Activity::new(2, 10, Category::Pets, 99, 10, 7, now),
            Activity::new(3, 10, Category::Pets, 1, 30, 10, now),
        ];

        for parallel in [false, true] {
            let results = score_activities(&activities, &tables, now, parallel);
            let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
            assert_eq!(ids, vec![1, 2, 3]);
            assert!(results[0].1.is_ok());
            assert!(results[1].1.is_err());
            assert_eq!(results[2].1.as_ref().unwrap().weighted_rating, 30.0);
        }
    }
}
