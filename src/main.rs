use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use political_rating::{
    import_into, CalculationRequest, Category, DataStore, EntityScope, EntityType, ImportSources,
    OutcomeStatus, RatingConfig, RatingEngine, SqliteStore, VERSION,
};

#[derive(Parser)]
#[command(name = "rating")]
#[command(about = "Political engagement ratings for activities, individuals and organizations")]
#[command(version = VERSION)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "RATING_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides config file)
    #[arg(short, long, env = "RATING_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,

    /// Upsert contacts, memberships and activities from CSV files
    Import {
        #[arg(long)]
        contacts: Option<PathBuf>,
        #[arg(long)]
        memberships: Option<PathBuf>,
        #[arg(long)]
        activities: Option<PathBuf>,
    },

    /// Recalculate ratings
    Calculate {
        /// activity, individual or organization
        entity_type: EntityType,

        /// Comma separated ids or "all"
        entity_ids: String,

        /// Recalculate sources first (0..=2)
        #[arg(long)]
        source_update: Option<u8>,

        /// Recalculate dependents afterwards (0..=2)
        #[arg(long)]
        propagation: Option<u8>,

        /// Evaluation instant (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Stored scores of a contact
    Show { contact_id: i64 },

    /// Audit trail of an entity, newest first
    Events { entity_type: EntityType, id: i64 },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = RatingConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    // RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(database = %config.database.path.display(), "Starting rating v{}", VERSION);
    let store = SqliteStore::open(&config.database.path)
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;

    match cli.command {
        Command::Init => {
            println!("✓ Database initialized at {}", config.database.path.display());
        }
        Command::Import {
            contacts,
            memberships,
            activities,
        } => run_import(&store, ImportSources { contacts, memberships, activities })?,
        Command::Calculate {
            entity_type,
            entity_ids,
            source_update,
            propagation,
            now,
        } => {
            let scope = EntityScope::parse(&entity_ids)?;
            let mut request = CalculationRequest::new(entity_type, scope)
                .with_source_update(source_update.unwrap_or(config.calculation.default_source_update_level))
                .with_propagation(propagation.unwrap_or(config.calculation.default_propagation_level));
            if let Some(now) = now {
                request = request.at(now);
            }

            let engine = RatingEngine::new(Arc::new(store)).with_config(config.calculation.clone());
            if !run_calculate(&engine, &request)? {
                std::process::exit(2);
            }
        }
        Command::Show { contact_id } => run_show(&store, contact_id)?,
        Command::Events { entity_type, id } => run_events(&store, entity_type, id)?,
    }

    Ok(())
}

fn run_import(store: &SqliteStore, sources: ImportSources) -> Result<()> {
    if sources.contacts.is_none() && sources.memberships.is_none() && sources.activities.is_none() {
        return Err(anyhow!("Nothing to import: pass --contacts, --memberships and/or --activities"));
    }

    println!("📂 Importing CSV files...");
    let summary = import_into(store, &sources)?;
    println!("✓ Contacts:    {}", summary.contacts);
    println!("✓ Memberships: {}", summary.memberships);
    println!("✓ Activities:  {}", summary.activities);
    Ok(())
}

/// Prints the report; false when a primary entity failed
fn run_calculate(engine: &RatingEngine, request: &CalculationRequest) -> Result<bool> {
    println!(
        "🧮 Calculating {} {} (source update {}, propagation {})",
        request.entity_type, request.scope, request.source_update_level, request.propagation_level
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let report = engine.calculate(request)?;

    for outcome in &report.outcomes {
        let status = match &outcome.status {
            OutcomeStatus::Updated { changed: true } => "✓ updated".to_string(),
            OutcomeStatus::Updated { changed: false } => "= unchanged".to_string(),
            OutcomeStatus::Skipped => "- skipped".to_string(),
            OutcomeStatus::Failed(err) => format!("✗ {}", err),
        };
        println!("{:<18} {:<16?} {}", outcome.entity.to_string(), outcome.stage, status);
    }
    for general in &report.errors {
        println!("✗ {:?} {}: {}", general.stage, general.entity_type, general.error);
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", report.summary());
    Ok(report.is_success())
}

fn run_show(store: &SqliteStore, contact_id: i64) -> Result<()> {
    let contact = store.read_contact(contact_id)?;
    println!(
        "👤 {} ({}, importance {})",
        contact.display_name, contact.contact_type, contact.importance_weight
    );

    match (&contact.scores, contact.scored_at) {
        (Some(scores), Some(scored_at)) => {
            println!("   scored at {}", scored_at.to_rfc3339());
            println!("   {:<26} {:>8.3}", "overall", scores.overall);
            for category in Category::ALL {
                println!("   {:<26} {:>8.3}", category.as_str(), scores.get(category));
            }
        }
        _ => println!("   not scored yet"),
    }
    Ok(())
}

fn run_events(store: &SqliteStore, entity_type: EntityType, id: i64) -> Result<()> {
    let events = store.events_for_entity(entity_type, id)?;
    if events.is_empty() {
        println!("No events for {} {}", entity_type, id);
        return Ok(());
    }

    for event in events {
        println!(
            "{}  {}  {}  {}",
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.actor,
            event.data
        );
    }
    Ok(())
}
