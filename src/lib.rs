// Political Rating Engine - Core Library
// Exposes all modules for use in the CLI and tests

pub mod error;
pub mod entities;       // Activities, contacts, categories
pub mod coefficients;   // Coefficient Resolver
pub mod scoring;        // Activity Scorer (age decay)
pub mod aggregation;    // Category Aggregator (ballast 15/3)
pub mod blending;       // Membership Blender (10/90)
pub mod db;             // Data Store (SQLite)
pub mod config;
pub mod request;
pub mod report;
pub mod locks;
pub mod engine;         // Propagation Controller
pub mod import;         // CSV import

// Re-export commonly used types
pub use error::{RatingError, Result};
pub use entities::{
    Activity, ActivityStatus, Category, CategoryScores, Contact, ContactType,
    EntityRef, EntityType, POLITICAL_ACTIVITY,
};
pub use coefficients::{CoefficientTable, CoefficientTables};
pub use scoring::{age_decay, age_in_years, score_activity, score_activities, ActivityRating};
pub use aggregation::{aggregate, aggregate_contacts, AggregationOutcome, BALLAST_VALUE, BALLAST_WEIGHT};
pub use blending::{blend, blend_organizations, blend_scores, MemberScore, OrganizationBlend};
pub use db::{setup_database, ActivityFilter, DataStore, Event, Selection, SqliteStore};
pub use config::RatingConfig;
pub use request::{CalculationRequest, EntityScope, MAX_LEVEL};
pub use report::{CalculationReport, EntityOutcome, OutcomeStatus, Stage};
pub use locks::{AbortHandle, EntityLocks};
pub use engine::RatingEngine;
pub use import::{import_into, ImportSources, ImportSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
