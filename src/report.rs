// 📋 Calculation Report - one structured outcome per touched entity
//
// The report is the whole API contract of a calculation: no partial-success
// ambiguity, every requested entity is either updated, skipped or failed.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entities::{EntityRef, EntityType};
use crate::error::RatingError;

/// Why an entity was touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Named by the request
    Primary,
    /// Recalculated because a requested entity depends on it
    SourceUpdate,
    /// Recalculated because it depends on an updated entity
    Propagation,
    /// Activity left out of a contact aggregate
    Input,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Rating written; `changed` is false when the stored value was already current
    Updated { changed: bool },
    /// Not eligible for rating (draft or non-political activity), nothing written
    Skipped,
    Failed(#[serde(serialize_with = "serialize_error")] RatingError),
}

fn serialize_error<S: serde::Serializer>(err: &RatingError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&err.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityOutcome {
    pub entity: EntityRef,
    pub stage: Stage,
    pub status: OutcomeStatus,
}

impl EntityOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed(_))
    }
}

/// Failure not tied to one entity (e.g. listing "all" failed)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralError {
    pub stage: Stage,
    pub entity_type: EntityType,
    #[serde(serialize_with = "serialize_error")]
    pub error: RatingError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationReport {
    pub entity_type: EntityType,
    pub evaluated_at: DateTime<Utc>,
    pub outcomes: Vec<EntityOutcome>,

    pub errors: Vec<GeneralError>,
}

impl CalculationReport {
    pub fn new(entity_type: EntityType, evaluated_at: DateTime<Utc>) -> Self {
        CalculationReport {
            entity_type,
            evaluated_at,
            outcomes: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, entity_type: EntityType, id: i64, stage: Stage, status: OutcomeStatus) {
        self.outcomes.push(EntityOutcome {
            entity: EntityRef::new(entity_type, id),
            stage,
            status,
        });
    }

    pub fn push(&mut self, outcome: EntityOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn record_failure(&mut self, entity_type: EntityType, id: i64, stage: Stage, err: RatingError) {
        self.record(entity_type, id, stage, OutcomeStatus::Failed(err));
    }

    pub fn record_error(&mut self, stage: Stage, entity_type: EntityType, err: RatingError) {
        self.errors.push(GeneralError {
            stage,
            entity_type,
            error: err,
        });
    }

    /// Outcomes of one stage
    pub fn stage(&self, stage: Stage) -> impl Iterator<Item = &EntityOutcome> + '_ {
        self.outcomes.iter().filter(move |o| o.stage == stage)
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntityOutcome> + '_ {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    /// Ids of one type that were written in a stage
    pub fn updated(&self, entity_type: EntityType, stage: Stage) -> Vec<i64> {
        self.stage(stage)
            .filter(|o| o.entity.entity_type == entity_type)
            .filter(|o| matches!(o.status, OutcomeStatus::Updated { .. }))
            .map(|o| o.entity.id)
            .collect()
    }

    /// Outcome of a primary entity
    pub fn primary(&self, id: i64) -> Option<&EntityOutcome> {
        self.stage(Stage::Primary).find(|o| o.entity.id == id)
    }

    /// Every primary entity was updated or legitimately skipped
    pub fn is_success(&self) -> bool {
        !self.stage(Stage::Primary).any(|o| o.is_failure())
            && !self.errors.iter().any(|e| e.stage == Stage::Primary)
    }

    pub fn summary(&self) -> String {
        let count = |f: fn(&OutcomeStatus) -> bool| self.outcomes.iter().filter(|o| f(&o.status)).count();
        format!(
            "{} calculation at {}: {} updated ({} changed), {} skipped, {} failed, {} general errors",
            self.entity_type,
            self.evaluated_at.to_rfc3339(),
            count(|s| matches!(s, OutcomeStatus::Updated { .. })),
            count(|s| matches!(s, OutcomeStatus::Updated { changed: true })),
            count(|s| matches!(s, OutcomeStatus::Skipped)),
            count(|s| matches!(s, OutcomeStatus::Failed(_))),
            self.errors.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_only_considers_primary_entities() {
        let mut report = CalculationReport::new(EntityType::Individual, Utc::now());
        report.record(EntityType::Individual, 1, Stage::Primary, OutcomeStatus::Updated { changed: true });
        report.record_failure(
            EntityType::Organization,
            9,
            Stage::Propagation,
            RatingError::StoreUnavailable("disk full".to_string()),
        );
        assert!(report.is_success());
        assert_eq!(report.failures().count(), 1);

        report.record_failure(
            EntityType::Individual,
            2,
            Stage::Primary,
            RatingError::not_found(EntityType::Individual, 2),
        );
        assert!(!report.is_success());
        assert!(report.primary(2).unwrap().is_failure());
    }

    #[test]
    fn test_updated_ids_by_stage() {
        let mut report = CalculationReport::new(EntityType::Activity, Utc::now());
        report.record(EntityType::Activity, 1, Stage::Primary, OutcomeStatus::Updated { changed: false });
        report.record(EntityType::Activity, 2, Stage::Primary, OutcomeStatus::Skipped);
        report.record(EntityType::Individual, 5, Stage::Propagation, OutcomeStatus::Updated { changed: true });

        assert_eq!(report.updated(EntityType::Activity, Stage::Primary), vec![1]);
        assert_eq!(report.updated(EntityType::Individual, Stage::Propagation), vec![5]);
        assert!(report.updated(EntityType::Individual, Stage::Primary).is_empty());
        assert!(report.summary().contains("2 updated (1 changed), 1 skipped, 0 failed"));
    }

    #[test]
    fn test_general_primary_error_fails_the_request() {
        let mut report = CalculationReport::new(EntityType::Individual, Utc::now());
        report.record_error(
            Stage::Primary,
            EntityType::Individual,
            RatingError::StoreUnavailable("locked".to_string()),
        );
        assert!(!report.is_success());
    }
}
