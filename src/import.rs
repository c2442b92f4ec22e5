// 📥 CSV Import - contacts, memberships and activities into the store
//
// Every record is upserted by id, so importing the same files twice leaves
// the store unchanged. Stored ratings survive a re-import of their inputs.
//
// contacts.csv     id,contact_type,display_name[,importance_weight]
// memberships.csv  organization_id,individual_id[,is_active]
// activities.csv   id,target_contact_id,category,kind,weight_class,raw_score,occurred_at[,status][,activity_type]

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::SqliteStore;
use crate::entities::{Activity, ActivityStatus, Contact, ContactType, POLITICAL_ACTIVITY};

// ============================================================================
// CSV RECORDS
// ============================================================================

#[derive(Debug, Deserialize)]
struct ContactRecord {
    id: i64,
    contact_type: String,
    display_name: String,
    #[serde(default)]
    importance_weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MembershipRecord {
    organization_id: i64,
    individual_id: i64,
    #[serde(default)]
    is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ActivityRecord {
    id: i64,
    target_contact_id: i64,
    category: i64,
    kind: i64,
    weight_class: i64,
    raw_score: i64,
    occurred_at: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    activity_type: Option<String>,
}

/// One organization/individual link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub organization_id: i64,
    pub individual_id: i64,
    pub is_active: bool,
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and plain dates (midnight UTC)
pub fn parse_occurred_at(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }
    Err(anyhow!("Unrecognized date '{}'", value))
}

// ============================================================================
// LOADERS
// ============================================================================

pub fn load_contacts(path: &Path) -> Result<Vec<Contact>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open contacts CSV {}", path.display()))?;

    let mut contacts = Vec::new();
    for (line, result) in rdr.deserialize::<ContactRecord>().enumerate() {
        let record = result.with_context(|| format!("Failed to parse contact on line {}", line + 2))?;
        let contact_type: ContactType = record
            .contact_type
            .parse()
            .map_err(|e: String| anyhow!("line {}: {}", line + 2, e))?;

        contacts.push(
            Contact::new(record.id, contact_type, record.display_name.trim())
                .with_importance(record.importance_weight.unwrap_or(1.0)),
        );
    }
    Ok(contacts)
}

pub fn load_memberships(path: &Path) -> Result<Vec<Membership>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open memberships CSV {}", path.display()))?;

    let mut memberships = Vec::new();
    for (line, result) in rdr.deserialize::<MembershipRecord>().enumerate() {
        let record = result.with_context(|| format!("Failed to parse membership on line {}", line + 2))?;
        memberships.push(Membership {
            organization_id: record.organization_id,
            individual_id: record.individual_id,
            is_active: record.is_active.unwrap_or(true),
        });
    }
    Ok(memberships)
}

pub fn load_activities(path: &Path) -> Result<Vec<Activity>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open activities CSV {}", path.display()))?;

    let mut activities = Vec::new();
    for (line, result) in rdr.deserialize::<ActivityRecord>().enumerate() {
        let record = result.with_context(|| format!("Failed to parse activity on line {}", line + 2))?;
        let occurred_at = parse_occurred_at(&record.occurred_at)
            .with_context(|| format!("Invalid occurred_at on line {}", line + 2))?;
        let status = match record.status.as_deref().map(str::trim) {
            None | Some("") => ActivityStatus::Published,
            Some(status) => status
                .parse()
                .map_err(|e: String| anyhow!("line {}: {}", line + 2, e))?,
        };
        let activity_type = record
            .activity_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| POLITICAL_ACTIVITY.to_string());

        // category stays a raw code: unknown codes still feed the overall score
        activities.push(Activity {
            id: record.id,
            target_contact_id: record.target_contact_id,
            activity_type,
            status,
            category: record.category,
            kind: record.kind,
            weight_class: record.weight_class,
            raw_score: record.raw_score,
            occurred_at,
            computed_rating: None,
        });
    }
    Ok(activities)
}

// ============================================================================
// IMPORT
// ============================================================================

/// Files to import; any of them may be left out
#[derive(Debug, Clone, Default)]
pub struct ImportSources {
    pub contacts: Option<PathBuf>,
    pub memberships: Option<PathBuf>,
    pub activities: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub contacts: usize,
    pub memberships: usize,
    pub activities: usize,
}

/// Load and upsert in dependency order: contacts, memberships, activities
pub fn import_into(store: &SqliteStore, sources: &ImportSources) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    if let Some(path) = &sources.contacts {
        for contact in load_contacts(path)? {
            store
                .upsert_contact(&contact)
                .with_context(|| format!("Failed to store contact {}", contact.id))?;
            summary.contacts += 1;
        }
        info!(count = summary.contacts, file = %path.display(), "Imported contacts");
    }

    if let Some(path) = &sources.memberships {
        for m in load_memberships(path)? {
            store
                .upsert_membership(m.organization_id, m.individual_id, m.is_active)
                .with_context(|| {
                    format!("Failed to store membership {} → {}", m.individual_id, m.organization_id)
                })?;
            summary.memberships += 1;
        }
        info!(count = summary.memberships, file = %path.display(), "Imported memberships");
    }

    if let Some(path) = &sources.activities {
        for activity in load_activities(path)? {
            store
                .upsert_activity(&activity)
                .with_context(|| format!("Failed to store activity {}", activity.id))?;
            summary.activities += 1;
        }
        info!(count = summary.activities, file = %path.display(), "Imported activities");
    }

    Ok(summary)
}
