// 🗄️ Data Store - typed access to activities, contacts and memberships
//
// The engine only talks to the `DataStore` trait. `SqliteStore` is the
// shipped implementation: one SQLite database (WAL mode) behind a mutex, so
// every write is serialized and committed statement by statement.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::entities::{
    Activity, ActivityStatus, Category, CategoryScores, Contact, ContactType, EntityType,
    POLITICAL_ACTIVITY,
};
use crate::error::{RatingError, Result};

// ============================================================================
// QUERY INPUTS
// ============================================================================

/// Which records a bulk read covers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection<'a> {
    All,
    Ids(&'a [i64]),
}

/// Row filter for activity reads
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityFilter {
    pub status: Option<ActivityStatus>,
    pub activity_type: Option<String>,
}

impl ActivityFilter {
    /// Published political activities, the only ones that are rated
    pub fn rated() -> Self {
        ActivityFilter {
            status: Some(ActivityStatus::Published),
            activity_type: Some(POLITICAL_ACTIVITY.to_string()),
        }
    }
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Audit trail entry, appended whenever a stored rating changes
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: EntityType,
        entity_id: i64,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type,
            entity_id,
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// DATA STORE
// ============================================================================

pub trait DataStore: Send + Sync {
    fn read_activities(&self, selection: Selection<'_>, filter: &ActivityFilter) -> Result<Vec<Activity>>;

    /// Activities targeting any of the given contacts
    fn activities_targeting(&self, contact_ids: &[i64], filter: &ActivityFilter) -> Result<Vec<Activity>>;

    /// `EntityNotFound` if the activity does not exist
    fn write_activity_rating(&self, id: i64, rating: f64) -> Result<()>;

    fn read_contact(&self, id: i64) -> Result<Contact>;

    /// Contacts with the given ids; unknown ids are simply absent
    fn read_contacts(&self, ids: &[i64]) -> Result<Vec<Contact>>;

    /// Ids of every contact of a type, ascending
    fn contact_ids(&self, contact_type: ContactType) -> Result<Vec<i64>>;

    /// `EntityNotFound` if the contact does not exist
    fn write_contact_scores(&self, id: i64, scores: &CategoryScores, scored_at: DateTime<Utc>) -> Result<()>;

    /// Individuals with an active membership in the organization
    fn members_of(&self, organization_id: i64) -> Result<Vec<i64>>;

    fn organizations_of(&self, individual_id: i64) -> Result<Vec<i64>>;

    fn activities_of(&self, contact_id: i64) -> Result<Vec<i64>>;

    fn record_event(&self, event: &Event) -> Result<()>;

    /// Active (organization, individual) pairs for a set of organizations
    fn memberships(&self, organization_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        let mut pairs = Vec::new();
        for organization_id in organization_ids {
            for individual_id in self.members_of(*organization_id)? {
                pairs.push((*organization_id, individual_id));
            }
        }
        Ok(pairs)
    }

    /// Organizations any of the individuals is an active member of, deduplicated
    fn organizations_of_many(&self, individual_ids: &[i64]) -> Result<Vec<i64>> {
        let mut organizations = Vec::new();
        for individual_id in individual_ids {
            organizations.extend(self.organizations_of(*individual_id)?);
        }
        organizations.sort_unstable();
        organizations.dedup();
        Ok(organizations)
    }

    /// Ids of every activity matching the filter, ascending
    fn activity_ids(&self, filter: &ActivityFilter) -> Result<Vec<i64>> {
        let activities = self.read_activities(Selection::All, filter)?;
        Ok(activities.iter().map(|a| a.id).collect())
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let category_columns: String = Category::ALL
        .iter()
        .map(|c| format!("{} REAL,\n", c.column()))
        .collect();

    // ==========================================================================
    // Contacts (individuals and organizations, with their scores)
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY,
                contact_type TEXT NOT NULL CHECK (contact_type IN ('Individual', 'Organization')),
                display_name TEXT NOT NULL DEFAULT '',
                importance_weight REAL NOT NULL DEFAULT 1.0,
                overall_rating REAL,
                {}
                scored_at TEXT
            )",
            category_columns
        ),
        [],
    )?;

    // ==========================================================================
    // Memberships (organization ← individual edges)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS memberships (
            organization_id INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
            individual_id INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
            is_active INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (organization_id, individual_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Activities
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities (
            id INTEGER PRIMARY KEY,
            target_contact_id INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
            activity_type TEXT NOT NULL DEFAULT 'political_activity',
            status TEXT NOT NULL CHECK (status IN ('published', 'draft')),
            category INTEGER NOT NULL,
            kind INTEGER NOT NULL,
            weight_class INTEGER NOT NULL,
            raw_score INTEGER NOT NULL,
            occurred_at TEXT NOT NULL,
            computed_rating REAL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_target ON activities(target_contact_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memberships_individual ON memberships(individual_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const ACTIVITY_COLUMNS: &str = "id, target_contact_id, activity_type, status, category, kind,
     weight_class, raw_score, occurred_at, computed_rating";

fn contact_columns() -> String {
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.column()).collect();
    format!(
        "id, contact_type, display_name, importance_weight, scored_at, overall_rating, {}",
        categories.join(", ")
    )
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("invalid timestamp '{}': {}", value, e)))
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    let status: String = row.get(3)?;
    let occurred_at: String = row.get(8)?;

    Ok(Activity {
        id: row.get(0)?,
        target_contact_id: row.get(1)?,
        activity_type: row.get(2)?,
        status: status.parse().map_err(|e| conversion_error(3, e))?,
        category: row.get(4)?,
        kind: row.get(5)?,
        weight_class: row.get(6)?,
        raw_score: row.get(7)?,
        occurred_at: parse_timestamp(8, &occurred_at)?,
        computed_rating: row.get(9)?,
    })
}

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    let contact_type: String = row.get(1)?;
    let scored_at: Option<String> = row.get(4)?;
    let overall: Option<f64> = row.get(5)?;

    // scores are written together, a contact is either fully scored or not at all
    let scores = match overall {
        Some(overall) => {
            let mut scores = CategoryScores::uniform(overall);
            for category in Category::ALL {
                let value: Option<f64> = row.get(6 + category.index())?;
                scores.set(category, value.unwrap_or(overall));
            }
            Some(scores)
        }
        None => None,
    };

    Ok(Contact {
        id: row.get(0)?,
        contact_type: contact_type.parse().map_err(|e| conversion_error(1, e))?,
        display_name: row.get(2)?,
        importance_weight: row.get(3)?,
        scores,
        scored_at: scored_at.map(|s| parse_timestamp(4, &s)).transpose()?,
    })
}

/// `IN (...)` list of integer ids, inlined (integers cannot inject SQL)
fn id_list(ids: &[i64]) -> String {
    let parts: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("({})", parts.join(","))
}

fn filter_clause(filter: &ActivityFilter) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();
    if let Some(status) = filter.status {
        values.push(status.as_str().to_string());
        conditions.push(format!("status = ?{}", values.len()));
    }
    if let Some(activity_type) = &filter.activity_type {
        values.push(activity_type.clone());
        conditions.push(format!("activity_type = ?{}", values.len()));
    }
    (conditions.join(" AND "), values)
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        info!(path = %path.display(), "Rating database opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteStore {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RatingError::StoreUnavailable("connection lock poisoned".to_string()))
    }

    fn query_activities(&self, condition: &str, filter: &ActivityFilter) -> Result<Vec<Activity>> {
        let (filter_sql, values) = filter_clause(filter);
        let mut conditions = vec![condition.to_string()];
        if !filter_sql.is_empty() {
            conditions.push(filter_sql);
        }
        let sql = format!(
            "SELECT {} FROM activities WHERE {} ORDER BY id",
            ACTIVITY_COLUMNS,
            conditions.join(" AND ")
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let activities = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), activity_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(activities)
    }

    fn query_ids(&self, sql: &str, id: i64) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let ids = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    // ------------------------------------------------------------------------
    // Record maintenance (used by the importer and by tests)
    // ------------------------------------------------------------------------

    /// Insert or update a contact's master data; stored scores are kept
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO contacts (id, contact_type, display_name, importance_weight)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                contact_type = ?2, display_name = ?3, importance_weight = ?4",
            params![
                contact.id,
                contact.contact_type.as_str(),
                contact.display_name,
                contact.importance_weight,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_membership(&self, organization_id: i64, individual_id: i64, is_active: bool) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO memberships (organization_id, individual_id, is_active)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(organization_id, individual_id) DO UPDATE SET is_active = ?3",
            params![organization_id, individual_id, is_active],
        )?;
        Ok(())
    }

    /// Insert or update an activity's inputs; a stored computed rating is kept
    pub fn upsert_activity(&self, activity: &Activity) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO activities (
                id, target_contact_id, activity_type, status, category, kind,
                weight_class, raw_score, occurred_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                target_contact_id = ?2, activity_type = ?3, status = ?4, category = ?5,
                kind = ?6, weight_class = ?7, raw_score = ?8, occurred_at = ?9",
            params![
                activity.id,
                activity.target_contact_id,
                activity.activity_type,
                activity.status.as_str(),
                activity.category,
                activity.kind,
                activity.weight_class,
                activity.raw_score,
                activity.occurred_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        let table = match table {
            "contacts" | "memberships" | "activities" | "events" => table,
            other => return Err(RatingError::StoreUnavailable(format!("unknown table '{}'", other))),
        };
        let count = self
            .conn()?
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Audit events of one entity, newest first
    pub fn events_for_entity(&self, entity_type: EntityType, entity_id: i64) -> Result<Vec<Event>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY timestamp DESC, id DESC",
        )?;

        let events = stmt
            .query_map(params![entity_type.as_str(), entity_id], |row| {
                let timestamp: String = row.get(1)?;
                let entity_type: String = row.get(3)?;
                let data_json: String = row.get(5)?;

                Ok(Event {
                    event_id: row.get(0)?,
                    timestamp: parse_timestamp(1, &timestamp)?,
                    event_type: row.get(2)?,
                    entity_type: entity_type.parse().map_err(|e| conversion_error(3, e))?,
                    entity_id: row.get(4)?,
                    data: serde_json::from_str(&data_json)
                        .map_err(|e| conversion_error(5, e.to_string()))?,
                    actor: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }
}

impl DataStore for SqliteStore {
    fn read_activities(&self, selection: Selection<'_>, filter: &ActivityFilter) -> Result<Vec<Activity>> {
        match selection {
            Selection::All => self.query_activities("1 = 1", filter),
            Selection::Ids([]) => Ok(Vec::new()),
            Selection::Ids(ids) => self.query_activities(&format!("id IN {}", id_list(ids)), filter),
        }
    }

    fn activities_targeting(&self, contact_ids: &[i64], filter: &ActivityFilter) -> Result<Vec<Activity>> {
        if contact_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.query_activities(&format!("target_contact_id IN {}", id_list(contact_ids)), filter)
    }

    fn write_activity_rating(&self, id: i64, rating: f64) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE activities SET computed_rating = ?1 WHERE id = ?2",
            params![rating, id],
        )?;
        if changed == 0 {
            return Err(RatingError::not_found(EntityType::Activity, id));
        }
        debug!(activity_id = id, rating, "Stored activity rating");
        Ok(())
    }

    fn read_contact(&self, id: i64) -> Result<Contact> {
        let conn = self.conn()?;
        let contact = conn
            .query_row(
                &format!("SELECT {} FROM contacts WHERE id = ?1", contact_columns()),
                [id],
                contact_from_row,
            )
            .optional()?;

        // contacts are not typed by id alone, report them as individuals
        contact.ok_or(RatingError::not_found(EntityType::Individual, id))
    }

    fn read_contacts(&self, ids: &[i64]) -> Result<Vec<Contact>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM contacts WHERE id IN {} ORDER BY id",
            contact_columns(),
            id_list(ids)
        ))?;
        let contacts = stmt
            .query_map([], contact_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contacts)
    }

    fn contact_ids(&self, contact_type: ContactType) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT id FROM contacts WHERE contact_type = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map([contact_type.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn write_contact_scores(&self, id: i64, scores: &CategoryScores, scored_at: DateTime<Utc>) -> Result<()> {
        let assignments: Vec<String> = Category::ALL
            .iter()
            .map(|c| format!("{} = ?{}", c.column(), c.index() + 4))
            .collect();
        let sql = format!(
            "UPDATE contacts SET overall_rating = ?2, scored_at = ?3, {} WHERE id = ?1",
            assignments.join(", ")
        );

        let mut values: Vec<rusqlite::types::Value> = vec![
            id.into(),
            scores.overall.into(),
            scored_at.to_rfc3339().into(),
        ];
        values.extend(scores.by_category.iter().map(|v| rusqlite::types::Value::from(*v)));

        let changed = self
            .conn()?
            .execute(&sql, rusqlite::params_from_iter(values))?;
        if changed == 0 {
            return Err(RatingError::not_found(EntityType::Individual, id));
        }
        debug!(contact_id = id, overall = scores.overall, "Stored contact scores");
        Ok(())
    }

    fn members_of(&self, organization_id: i64) -> Result<Vec<i64>> {
        self.query_ids(
            "SELECT individual_id FROM memberships
             WHERE organization_id = ?1 AND is_active = 1
             ORDER BY individual_id",
            organization_id,
        )
    }

    fn organizations_of(&self, individual_id: i64) -> Result<Vec<i64>> {
        self.query_ids(
            "SELECT organization_id FROM memberships
             WHERE individual_id = ?1 AND is_active = 1
             ORDER BY organization_id",
            individual_id,
        )
    }

    fn activities_of(&self, contact_id: i64) -> Result<Vec<i64>> {
        self.query_ids(
            "SELECT id FROM activities WHERE target_contact_id = ?1 ORDER BY id",
            contact_id,
        )
    }

    fn record_event(&self, event: &Event) -> Result<()> {
        let data_json = serde_json::to_string(&event.data)?;

        self.conn()?.execute(
            "INSERT INTO events (
                event_id, timestamp, event_type, entity_type, entity_id, data, actor
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id,
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.entity_type.as_str(),
                event.entity_id,
                data_json,
                event.actor,
            ],
        )?;

        Ok(())
    }

    fn memberships(&self, organization_ids: &[i64]) -> Result<Vec<(i64, i64)>> {
        if organization_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT organization_id, individual_id FROM memberships
             WHERE is_active = 1 AND organization_id IN {}
             ORDER BY organization_id, individual_id",
            id_list(organization_ids)
        ))?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(i64, i64)>>>()?;
        Ok(pairs)
    }

    fn organizations_of_many(&self, individual_ids: &[i64]) -> Result<Vec<i64>> {
        if individual_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT organization_id FROM memberships
             WHERE is_active = 1 AND individual_id IN {}
             ORDER BY organization_id",
            id_list(individual_ids)
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn activity_ids(&self, filter: &ActivityFilter) -> Result<Vec<i64>> {
        let (filter_sql, values) = filter_clause(filter);
        let condition = if filter_sql.is_empty() { "1 = 1".to_string() } else { filter_sql };
        let sql = format!("SELECT id FROM activities WHERE {} ORDER BY id", condition);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }
}
