// 📣 Activity Entity - one recorded political action concerning a contact
//
// Inputs (kind, weight class, raw score, date) are owned by whoever records
// the activity. The computed rating is written by the activity scorer only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::category::Category;

/// Activity type that takes part in the rating
pub const POLITICAL_ACTIVITY: &str = "political_activity";

// ============================================================================
// ACTIVITY STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Published,
    Draft,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Published => "published",
            ActivityStatus::Draft => "draft",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "published" => Ok(ActivityStatus::Published),
            "draft" => Ok(ActivityStatus::Draft),
            other => Err(format!("unknown activity status '{}'", other)),
        }
    }
}

// ============================================================================
// ACTIVITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,

    /// Contact (individual or organization) the activity concerns
    pub target_contact_id: i64,

    /// Only `political_activity` records are rated
    pub activity_type: String,

    pub status: ActivityStatus,

    /// Category option value (1..=8)
    pub category: i64,

    /// Kind option value, resolved through the kind coefficient table
    pub kind: i64,

    /// Weight class scaled by 10 (10, 15, 20, 25, 30)
    pub weight_class: i64,

    /// Raw score (0, 3, 5, 7, 10), used as-is
    pub raw_score: i64,

    pub occurred_at: DateTime<Utc>,

    /// Last computed weighted rating (None until first computation)
    pub computed_rating: Option<f64>,
}

impl Activity {
    /// Create a published political activity without a computed rating
    pub fn new(
        id: i64,
        target_contact_id: i64,
        category: Category,
        kind: i64,
        weight_class: i64,
        raw_score: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Activity {
            id,
            target_contact_id,
            activity_type: POLITICAL_ACTIVITY.to_string(),
            status: ActivityStatus::Published,
            category: category.code(),
            kind,
            weight_class,
            raw_score,
            occurred_at,
            computed_rating: None,
        }
    }

    /// Resolved category (None for codes outside 1..=8)
    pub fn category(&self) -> Option<Category> {
        Category::from_code(self.category)
    }

    /// Only published political activities are scored
    pub fn is_rated(&self) -> bool {
        self.status == ActivityStatus::Published && self.activity_type == POLITICAL_ACTIVITY
    }
}
