// Entity Models
//
// Three kinds of entities carry a rating:
// - Activity: one recorded political action, rated on its own
// - Individual: rated from the activities targeting them
// - Organization: rated from its own activities blended with its members

pub mod activity;
pub mod category;
pub mod contact;

pub use activity::{Activity, ActivityStatus, POLITICAL_ACTIVITY};
pub use category::{Category, CategoryScores};
pub use contact::{Contact, ContactType};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// The entity kinds the engine can recalculate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Activity,
    Individual,
    Organization,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Activity => "activity",
            EntityType::Individual => "individual",
            EntityType::Organization => "organization",
        }
    }

    /// Contact type backing this entity type (None for activities)
    pub fn contact_type(&self) -> Option<ContactType> {
        match self {
            EntityType::Activity => None,
            EntityType::Individual => Some(ContactType::Individual),
            EntityType::Organization => Some(ContactType::Organization),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    /// Accepts the legacy names too: "contact" means individual, "organisation" is the British spelling
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "activity" => Ok(EntityType::Activity),
            "individual" | "contact" => Ok(EntityType::Individual),
            "organization" | "organisation" => Ok(EntityType::Organization),
            other => Err(format!(
                "unknown entity type '{}' (expected activity, individual or organization)",
                other
            )),
        }
    }
}

/// (type, id) pair identifying one rated entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: i64,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: i64) -> Self {
        EntityRef { entity_type, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.id)
    }
}
