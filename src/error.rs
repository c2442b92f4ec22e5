// ⚠️ Rating Errors - one taxonomy for every failure the engine can report
//
// Errors are cloneable values: they end up inside per-entity outcomes of a
// CalculationReport, so the same error may be reported for several entities.

use crate::entities::EntityType;

pub type Result<T> = std::result::Result<T, RatingError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RatingError {
    /// An activity references a kind/weight value outside the table domain
    #[error("unknown {table} coefficient key: {key}")]
    UnknownCoefficientKey { table: &'static str, key: i64 },

    /// A requested id does not exist in the data store
    #[error("{entity_type} {id} not found")]
    EntityNotFound { entity_type: EntityType, id: i64 },

    /// Empty or malformed id set for a non-"all" request
    #[error("invalid entity scope: {0}")]
    InvalidScope(String),

    /// Recursion depth outside the supported range
    #[error("invalid {axis} level {level} (supported: 0..={max})")]
    InvalidLevel {
        axis: &'static str,
        level: u8,
        max: u8,
    },

    /// Underlying storage failed
    #[error("data store unavailable: {0}")]
    StoreUnavailable(String),

    /// The calculation was aborted before this entity was processed
    #[error("calculation cancelled")]
    Cancelled,
}

impl RatingError {
    pub fn not_found(entity_type: EntityType, id: i64) -> Self {
        RatingError::EntityNotFound { entity_type, id }
    }

    /// Store failures end the current level, every other error only affects one entity
    pub fn is_store_failure(&self) -> bool {
        matches!(self, RatingError::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for RatingError {
    fn from(err: rusqlite::Error) -> Self {
        RatingError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for RatingError {
    fn from(err: serde_json::Error) -> Self {
        RatingError::StoreUnavailable(format!("serialization failed: {}", err))
    }
}
