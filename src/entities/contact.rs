// 👤 Contact Entity - an individual or an organization carrying scores
//
// Score fields are owned by the rating engine and never edited by hand.
// Memberships and targeted activities live in the data store as edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::category::CategoryScores;
use super::EntityType;

// ============================================================================
// CONTACT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactType {
    Individual,
    Organization,
}

impl ContactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactType::Individual => "Individual",
            ContactType::Organization => "Organization",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            ContactType::Individual => EntityType::Individual,
            ContactType::Organization => EntityType::Organization,
        }
    }
}

impl fmt::Display for ContactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "individual" => Ok(ContactType::Individual),
            "organization" | "organisation" => Ok(ContactType::Organization),
            other => Err(format!("unknown contact type '{}'", other)),
        }
    }
}

// ============================================================================
// CONTACT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub contact_type: ContactType,
    pub display_name: String,

    /// Weight of this contact when aggregated into an organization
    pub importance_weight: f64,

    /// None until the engine computed the contact once
    pub scores: Option<CategoryScores>,

    pub scored_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn new(id: i64, contact_type: ContactType, display_name: &str) -> Self {
        Contact {
            id,
            contact_type,
            display_name: display_name.to_string(),
            importance_weight: 1.0,
            scores: None,
            scored_at: None,
        }
    }

    pub fn with_importance(mut self, importance_weight: f64) -> Self {
        self.importance_weight = importance_weight;
        self
    }

    pub fn is_organization(&self) -> bool {
        self.contact_type == ContactType::Organization
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_defaults() {
        let contact = Contact::new(3, ContactType::Individual, "Jane Roe");

        assert_eq!(contact.importance_weight, 1.0);
        assert!(contact.scores.is_none());
        assert!(!contact.is_organization());
        assert_eq!(contact.contact_type.entity_type(), EntityType::Individual);
    }

    #[test]
    fn test_contact_type_parsing() {
        assert_eq!("Organisation".parse::<ContactType>().unwrap(), ContactType::Organization);
        assert_eq!("individual".parse::<ContactType>().unwrap(), ContactType::Individual);
        assert!("household".parse::<ContactType>().is_err());
    }
}
