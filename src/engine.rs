// ⚙️ Rating Engine - the Propagation Controller
//
// One request = one recursion over the dependency graph:
//
//   Activity ──targets──▶ Individual ──member of──▶ Organization
//       └────────────────targets────────────────────────▲
//
//   1. source update (level > 0): recalculate what the entities depend on,
//      with source level - 1 and no propagation
//   2. compute + write the requested entities, chunk by chunk
//   3. propagation (level > 0): recalculate what depends on the entities
//      that were just updated (or skipped, for unrated activities), with
//      propagation level - 1 and no source update
//
// Failures are per entity and end up in the CalculationReport. Only a store
// failure or an abort stops the current level; everything written before
// stays committed and a re-run is idempotent.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aggregation::aggregate_contacts;
use crate::blending::{blend_organizations, MemberScore};
use crate::coefficients::CoefficientTables;
use crate::config::CalculationConfig;
use crate::db::{ActivityFilter, DataStore, Event, Selection};
use crate::entities::{Activity, CategoryScores, Contact, ContactType, EntityRef, EntityType};
use crate::error::{RatingError, Result};
use crate::locks::{AbortHandle, EntityLocks};
use crate::report::{CalculationReport, EntityOutcome, OutcomeStatus, Stage};
use crate::request::{CalculationRequest, EntityScope};
use crate::scoring::score_activities;

pub const RATING_UPDATED_EVENT: &str = "rating_updated";
pub const ENGINE_ACTOR: &str = "rating_engine";

// ============================================================================
// CHUNK PLAN
// ============================================================================

/// A computed value waiting to be written
#[derive(Debug, Clone, PartialEq)]
enum PendingWrite {
    Activity {
        id: i64,
        rating: f64,
        previous: Option<f64>,
    },
    Contact {
        entity_type: EntityType,
        id: i64,
        scores: CategoryScores,
        previous: Option<CategoryScores>,
    },
}

impl PendingWrite {
    fn id(&self) -> i64 {
        match self {
            PendingWrite::Activity { id, .. } | PendingWrite::Contact { id, .. } => *id,
        }
    }
}

/// Everything computed for one chunk, recorded only once the reads succeeded
#[derive(Debug, Default)]
struct ChunkPlan {
    writes: Vec<PendingWrite>,
    outcomes: Vec<EntityOutcome>,
    /// Skipped activities: nothing is written, but their targets must drop them
    unrated: Vec<i64>,
}

impl ChunkPlan {
    fn record(&mut self, entity_type: EntityType, id: i64, stage: Stage, status: OutcomeStatus) {
        self.outcomes.push(EntityOutcome {
            entity: EntityRef::new(entity_type, id),
            stage,
            status,
        });
    }

    fn fail(&mut self, entity_type: EntityType, id: i64, stage: Stage, err: RatingError) {
        self.record(entity_type, id, stage, OutcomeStatus::Failed(err));
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Cheap to clone; clones share the store, the entity locks and the abort flag
#[derive(Clone)]
pub struct RatingEngine {
    store: Arc<dyn DataStore>,
    tables: CoefficientTables,
    config: CalculationConfig,
    locks: Arc<EntityLocks>,
    abort: AbortHandle,
}

impl RatingEngine {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        RatingEngine {
            store,
            tables: CoefficientTables::standard(),
            config: CalculationConfig::default(),
            locks: Arc::new(EntityLocks::new()),
            abort: AbortHandle::new(),
        }
    }

    pub fn with_config(mut self, config: CalculationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tables(mut self, tables: CoefficientTables) -> Self {
        self.tables = tables;
        self
    }

    /// Share entity locks with engines built on the same store
    pub fn with_locks(mut self, locks: Arc<EntityLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Run one calculation request
    ///
    /// Returns `Err` only for requests rejected up front (`InvalidScope`,
    /// `InvalidLevel`); in that case nothing has been written. Every other
    /// failure is reported per entity.
    pub fn calculate(&self, request: &CalculationRequest) -> Result<CalculationReport> {
        request.validate()?;

        let now = request.now.unwrap_or_else(Utc::now);
        info!(
            entity_type = %request.entity_type,
            scope = %request.scope,
            source_update = request.source_update_level,
            propagation = request.propagation_level,
            now = %now.to_rfc3339(),
            "🧮 Calculating ratings"
        );

        let mut report = CalculationReport::new(request.entity_type, now);
        self.run(
            request.entity_type,
            &request.scope,
            request.source_update_level,
            request.propagation_level,
            Stage::Primary,
            now,
            &mut report,
        );

        if report.is_success() {
            info!("✅ {}", report.summary());
        } else {
            warn!("⚠️ {}", report.summary());
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        entity_type: EntityType,
        scope: &EntityScope,
        source_update: u8,
        propagation: u8,
        stage: Stage,
        now: DateTime<Utc>,
        report: &mut CalculationReport,
    ) {
        let ids = match self.resolve_scope(entity_type, scope) {
            Ok(ids) => ids,
            Err(err) => {
                warn!(entity_type = %entity_type, error = %err, "Could not resolve entity scope");
                report.record_error(stage, entity_type, err);
                return;
            }
        };
        if ids.is_empty() {
            debug!(entity_type = %entity_type, ?stage, "Nothing to calculate");
            return;
        }

        if source_update > 0 {
            match self.sources_of(entity_type, &ids) {
                Ok(sources) => {
                    for (source_type, source_ids) in sources {
                        debug!(from = %entity_type, to = %source_type, count = source_ids.len(), "Updating sources");
                        self.run(
                            source_type,
                            &EntityScope::Ids(source_ids),
                            source_update - 1,
                            0,
                            Stage::SourceUpdate,
                            now,
                            report,
                        );
                    }
                }
                Err(err) => report.record_error(Stage::SourceUpdate, entity_type, err),
            }
        }

        let touched = self.compute_level(entity_type, &ids, stage, now, report);

        if propagation > 0 && !touched.is_empty() {
            match self.dependents_of(entity_type, &touched) {
                Ok(dependents) => {
                    for (dependent_type, dependent_ids) in dependents {
                        debug!(from = %entity_type, to = %dependent_type, count = dependent_ids.len(), "Propagating");
                        self.run(
                            dependent_type,
                            &EntityScope::Ids(dependent_ids),
                            0,
                            propagation - 1,
                            Stage::Propagation,
                            now,
                            report,
                        );
                    }
                }
                Err(err) => report.record_error(Stage::Propagation, entity_type, err),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Dependency graph
    // ------------------------------------------------------------------------

    fn resolve_scope(&self, entity_type: EntityType, scope: &EntityScope) -> Result<Vec<i64>> {
        match scope {
            EntityScope::Ids(ids) => {
                let mut ids = ids.clone();
                ids.sort_unstable();
                ids.dedup();
                Ok(ids)
            }
            EntityScope::All => match entity_type {
                EntityType::Activity => self.store.activity_ids(&ActivityFilter::rated()),
                EntityType::Individual => self.store.contact_ids(ContactType::Individual),
                EntityType::Organization => self.store.contact_ids(ContactType::Organization),
            },
        }
    }

    /// What the entities are computed from
    fn sources_of(&self, entity_type: EntityType, ids: &[i64]) -> Result<Vec<(EntityType, Vec<i64>)>> {
        let mut sources = Vec::new();
        match entity_type {
            EntityType::Activity => {}
            EntityType::Individual => {
                sources.push((EntityType::Activity, self.rated_activity_ids(ids)?));
            }
            EntityType::Organization => {
                sources.push((EntityType::Activity, self.rated_activity_ids(ids)?));
                let mut members: Vec<i64> = self
                    .store
                    .memberships(ids)?
                    .into_iter()
                    .map(|(_, individual_id)| individual_id)
                    .collect();
                members.sort_unstable();
                members.dedup();
                sources.push((EntityType::Individual, members));
            }
        }
        sources.retain(|(_, ids)| !ids.is_empty());
        Ok(sources)
    }

    /// What is computed from the entities
    fn dependents_of(&self, entity_type: EntityType, ids: &[i64]) -> Result<Vec<(EntityType, Vec<i64>)>> {
        let mut dependents = Vec::new();
        match entity_type {
            EntityType::Activity => {
                let mut targets: Vec<i64> = self
                    .store
                    .read_activities(Selection::Ids(ids), &ActivityFilter::default())?
                    .into_iter()
                    .map(|a| a.target_contact_id)
                    .collect();
                targets.sort_unstable();
                targets.dedup();

                let contacts = self.store.read_contacts(&targets)?;
                if contacts.len() < targets.len() {
                    warn!(
                        missing = targets.len() - contacts.len(),
                        "Activities target contacts that do not exist"
                    );
                }
                let (organizations, individuals): (Vec<Contact>, Vec<Contact>) =
                    contacts.into_iter().partition(|c| c.is_organization());
                dependents.push((EntityType::Individual, individuals.iter().map(|c| c.id).collect()));
                dependents.push((EntityType::Organization, organizations.iter().map(|c| c.id).collect()));
            }
            EntityType::Individual => {
                dependents.push((EntityType::Organization, self.store.organizations_of_many(ids)?));
            }
            EntityType::Organization => {}
        }
        dependents.retain(|(_, ids)| !ids.is_empty());
        Ok(dependents)
    }

    fn rated_activity_ids(&self, contact_ids: &[i64]) -> Result<Vec<i64>> {
        Ok(self
            .store
            .activities_targeting(contact_ids, &ActivityFilter::rated())?
            .into_iter()
            .map(|a| a.id)
            .collect())
    }

    // ------------------------------------------------------------------------
    // One level
    // ------------------------------------------------------------------------

    /// Compute and write `ids`; returns the ids whose dependents are now stale
    /// (written entities plus skipped activities)
    fn compute_level(
        &self,
        entity_type: EntityType,
        ids: &[i64],
        stage: Stage,
        now: DateTime<Utc>,
        report: &mut CalculationReport,
    ) -> Vec<i64> {
        let chunks: Vec<&[i64]> = ids.chunks(self.config.chunk_size.max(1)).collect();
        let mut touched = Vec::with_capacity(ids.len());

        for (index, chunk) in chunks.iter().enumerate() {
            if let Err(halt) = self.process_chunk(entity_type, chunk, stage, now, report, &mut touched) {
                let remaining: Vec<i64> = chunks[index + 1..].iter().flat_map(|c| c.iter().copied()).collect();
                warn!(
                    entity_type = %entity_type,
                    error = %halt,
                    remaining = remaining.len(),
                    "Level stopped"
                );
                for id in remaining {
                    report.record_failure(entity_type, id, stage, halt.clone());
                }
                break;
            }
        }

        debug!(entity_type = %entity_type, ?stage, requested = ids.len(), touched = touched.len(), "Level done");
        touched
    }

    /// `Err` means the level has to stop (store failure or abort); the
    /// chunk's own entities are already reported
    fn process_chunk(
        &self,
        entity_type: EntityType,
        ids: &[i64],
        stage: Stage,
        now: DateTime<Utc>,
        report: &mut CalculationReport,
        touched: &mut Vec<i64>,
    ) -> Result<()> {
        if self.abort.is_aborted() {
            for id in ids {
                report.record_failure(entity_type, *id, stage, RatingError::Cancelled);
            }
            return Err(RatingError::Cancelled);
        }

        let claim: Vec<EntityRef> = ids.iter().map(|id| EntityRef::new(entity_type, *id)).collect();
        let _guard = self.locks.acquire(&claim);

        let plan = match self.plan_chunk(entity_type, ids, stage, now) {
            Ok(plan) => plan,
            Err(err) => {
                for id in ids {
                    report.record_failure(entity_type, *id, stage, err.clone());
                }
                return Err(err);
            }
        };
        for outcome in plan.outcomes {
            report.push(outcome);
        }
        touched.extend(plan.unrated);

        for (position, write) in plan.writes.iter().enumerate() {
            let halt = if self.abort.is_aborted() {
                Some(RatingError::Cancelled)
            } else {
                match self.apply(write, now) {
                    Ok(changed) => {
                        report.record(entity_type, write.id(), stage, OutcomeStatus::Updated { changed });
                        touched.push(write.id());
                        None
                    }
                    Err(err) if err.is_store_failure() => Some(err),
                    Err(err) => {
                        report.record_failure(entity_type, write.id(), stage, err);
                        None
                    }
                }
            };

            if let Some(err) = halt {
                for pending in &plan.writes[position..] {
                    report.record_failure(entity_type, pending.id(), stage, err.clone());
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn plan_chunk(&self, entity_type: EntityType, ids: &[i64], stage: Stage, now: DateTime<Utc>) -> Result<ChunkPlan> {
        match entity_type {
            EntityType::Activity => self.plan_activities(ids, stage, now),
            EntityType::Individual => self.plan_individuals(ids, stage, now),
            EntityType::Organization => self.plan_organizations(ids, stage, now),
        }
    }

    fn plan_activities(&self, ids: &[i64], stage: Stage, now: DateTime<Utc>) -> Result<ChunkPlan> {
        let mut plan = ChunkPlan::default();
        let activities = self
            .store
            .read_activities(Selection::Ids(ids), &ActivityFilter::default())?;

        let found: HashSet<i64> = activities.iter().map(|a| a.id).collect();
        for id in ids.iter().filter(|id| !found.contains(id)) {
            plan.fail(EntityType::Activity, *id, stage, RatingError::not_found(EntityType::Activity, *id));
        }

        let (rated, unrated): (Vec<Activity>, Vec<Activity>) = activities.into_iter().partition(|a| a.is_rated());
        for activity in &unrated {
            debug!(
                activity_id = activity.id,
                status = %activity.status,
                activity_type = %activity.activity_type,
                "Activity is not rated, skipped"
            );
            plan.record(EntityType::Activity, activity.id, stage, OutcomeStatus::Skipped);
            plan.unrated.push(activity.id);
        }

        let previous: HashMap<i64, Option<f64>> = rated.iter().map(|a| (a.id, a.computed_rating)).collect();
        for (id, result) in score_activities(&rated, &self.tables, now, self.config.parallel) {
            match result {
                Ok(rating) => plan.writes.push(PendingWrite::Activity {
                    id,
                    rating: rating.weighted_rating,
                    previous: previous.get(&id).copied().flatten(),
                }),
                Err(err) => {
                    warn!(activity_id = id, error = %err, "Activity could not be scored");
                    plan.fail(EntityType::Activity, id, stage, err);
                }
            }
        }
        Ok(plan)
    }

    fn plan_individuals(&self, ids: &[i64], stage: Stage, now: DateTime<Utc>) -> Result<ChunkPlan> {
        let mut plan = ChunkPlan::default();
        let individuals = self.read_contacts_of_type(EntityType::Individual, ids, stage, &mut plan)?;
        if individuals.is_empty() {
            return Ok(plan);
        }

        let individual_ids: Vec<i64> = individuals.iter().map(|c| c.id).collect();
        let (scores, _) = self.aggregate_own_activities(&individual_ids, now, &mut plan)?;

        for individual in individuals {
            if let Some(scores) = scores.get(&individual.id) {
                plan.writes.push(PendingWrite::Contact {
                    entity_type: EntityType::Individual,
                    id: individual.id,
                    scores: *scores,
                    previous: individual.scores,
                });
            }
        }
        Ok(plan)
    }

    fn plan_organizations(&self, ids: &[i64], stage: Stage, now: DateTime<Utc>) -> Result<ChunkPlan> {
        let mut plan = ChunkPlan::default();
        let organizations = self.read_contacts_of_type(EntityType::Organization, ids, stage, &mut plan)?;
        if organizations.is_empty() {
            return Ok(plan);
        }

        let organization_ids: Vec<i64> = organizations.iter().map(|c| c.id).collect();
        let (own_scores, activity_counts) = self.aggregate_own_activities(&organization_ids, now, &mut plan)?;

        let pairs = self.store.memberships(&organization_ids)?;
        let mut member_ids: Vec<i64> = pairs.iter().map(|(_, individual_id)| *individual_id).collect();
        member_ids.sort_unstable();
        member_ids.dedup();
        let members: HashMap<i64, Contact> = self
            .store
            .read_contacts(&member_ids)?
            .into_iter()
            .filter(|c| c.contact_type == ContactType::Individual)
            .map(|c| (c.id, c))
            .collect();

        let mut member_scores = Vec::with_capacity(pairs.len());
        for (organization_id, individual_id) in pairs {
            match members.get(&individual_id).and_then(|c| c.scores.map(|s| (c, s))) {
                Some((member, scores)) => member_scores.push((
                    organization_id,
                    MemberScore {
                        individual_id,
                        importance_weight: member.importance_weight,
                        scores,
                    },
                )),
                None => debug!(
                    organization_id,
                    individual_id, "Member has no stored scores, left out of the blend"
                ),
            }
        }

        let blends = blend_organizations(&own_scores, &member_scores);
        for organization in organizations {
            let Some(blend) = blends.get(&organization.id) else {
                continue;
            };
            if blend.is_low_information(activity_counts.get(&organization.id).copied().unwrap_or(0)) {
                debug!(
                    organization_id = organization.id,
                    score = blend.scores.overall,
                    "No scored members and no own activities, storing the low-information score"
                );
            }
            plan.writes.push(PendingWrite::Contact {
                entity_type: EntityType::Organization,
                id: organization.id,
                scores: blend.scores,
                previous: organization.scores,
            });
        }
        Ok(plan)
    }

    /// Contacts of the requested type; everything else is reported not found
    fn read_contacts_of_type(
        &self,
        entity_type: EntityType,
        ids: &[i64],
        stage: Stage,
        plan: &mut ChunkPlan,
    ) -> Result<Vec<Contact>> {
        let Some(contact_type) = entity_type.contact_type() else {
            return Ok(Vec::new());
        };
        let contacts: Vec<Contact> = self
            .store
            .read_contacts(ids)?
            .into_iter()
            .filter(|c| c.contact_type == contact_type)
            .collect();

        let found: HashSet<i64> = contacts.iter().map(|c| c.id).collect();
        for id in ids.iter().filter(|id| !found.contains(id)) {
            plan.fail(entity_type, *id, stage, RatingError::not_found(entity_type, *id));
        }
        Ok(contacts)
    }

    /// Ballasted aggregates of the contacts' own rated activities, plus the
    /// number of activities that went into each
    fn aggregate_own_activities(
        &self,
        contact_ids: &[i64],
        now: DateTime<Utc>,
        plan: &mut ChunkPlan,
    ) -> Result<(BTreeMap<i64, CategoryScores>, HashMap<i64, usize>)> {
        let activities = self
            .store
            .activities_targeting(contact_ids, &ActivityFilter::rated())?;

        let mut counts: HashMap<i64, usize> = HashMap::new();
        for activity in &activities {
            *counts.entry(activity.target_contact_id).or_default() += 1;
        }

        let outcome = aggregate_contacts(contact_ids, &activities, &self.tables, now, self.config.parallel);
        for (activity_id, err) in outcome.rejected {
            plan.fail(EntityType::Activity, activity_id, Stage::Input, err);
        }
        Ok((outcome.scores, counts))
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write one value; Ok(false) when the stored value was already current
    fn apply(&self, write: &PendingWrite, now: DateTime<Utc>) -> Result<bool> {
        match write {
            PendingWrite::Activity { id, rating, previous } => {
                if *previous == Some(*rating) {
                    debug!(activity_id = id, "Rating not updated (score hasn't changed)");
                    return Ok(false);
                }
                self.store.write_activity_rating(*id, *rating)?;
                self.audit(EntityType::Activity, *id, json!({ "old": previous, "new": rating }));
                Ok(true)
            }
            PendingWrite::Contact {
                entity_type,
                id,
                scores,
                previous,
            } => {
                if previous.as_ref() == Some(scores) {
                    debug!(entity = %EntityRef::new(*entity_type, *id), "Rating not updated (score hasn't changed)");
                    return Ok(false);
                }
                self.store.write_contact_scores(*id, scores, now)?;

                let categories: serde_json::Map<String, serde_json::Value> = scores
                    .iter()
                    .map(|(category, value)| (category.as_str().to_string(), json!(value)))
                    .collect();
                self.audit(
                    *entity_type,
                    *id,
                    json!({
                        "old": previous.map(|p| p.overall),
                        "new": scores.overall,
                        "categories": categories,
                    }),
                );
                Ok(true)
            }
        }
    }

    // The rating is already committed; a lost audit entry is logged, not fatal
    fn audit(&self, entity_type: EntityType, id: i64, data: serde_json::Value) {
        let event = Event::new(RATING_UPDATED_EVENT, entity_type, id, data, ENGINE_ACTOR);
        if let Err(err) = self.store.record_event(&event) {
            warn!(entity = %EntityRef::new(entity_type, id), error = %err, "Failed to record audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::entities::Category;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// Individuals 1 (Alice) and 2 (Bob, importance 3), organization 10 with
    /// both as active members, organization 20 without members.
    ///
    /// Activity 100: Alice, livestock speech (kind 2, weight 1.0, score 7), today
    /// Activity 101: Bob, draft
    /// Activity 102: organization 10, one year old vote (kind 10, weight 1.5, score 10)
    fn seeded_store() -> Arc<SqliteStore> {
        let now = fixed_now();
        let store = SqliteStore::open_in_memory().unwrap();

        store.upsert_contact(&Contact::new(1, ContactType::Individual, "Alice")).unwrap();
        store
            .upsert_contact(&Contact::new(2, ContactType::Individual, "Bob").with_importance(3.0))
            .unwrap();
        store.upsert_contact(&Contact::new(10, ContactType::Organization, "Party")).unwrap();
        store.upsert_contact(&Contact::new(20, ContactType::Organization, "Empty club")).unwrap();
        store.upsert_membership(10, 1, true).unwrap();
        store.upsert_membership(10, 2, true).unwrap();

        store
            .upsert_activity(&Activity::new(100, 1, Category::Livestock, 2, 10, 7, now))
            .unwrap();
        let mut draft = Activity::new(101, 2, Category::Pets, 10, 30, 10, now);
        draft.status = crate::entities::ActivityStatus::Draft;
        store.upsert_activity(&draft).unwrap();
        store
            .upsert_activity(&Activity::new(102, 10, Category::Aquaculture, 10, 15, 10, now - Duration::days(365)))
            .unwrap();

        Arc::new(store)
    }

    fn engine(store: &Arc<SqliteStore>) -> RatingEngine {
        RatingEngine::new(store.clone())
    }

    fn request(entity_type: EntityType, scope: &str) -> CalculationRequest {
        CalculationRequest::new(entity_type, EntityScope::parse(scope).unwrap()).at(fixed_now())
    }

    fn stored_rating(store: &SqliteStore, id: i64) -> Option<f64> {
        store
            .read_activities(Selection::Ids(&[id]), &ActivityFilter::default())
            .unwrap()
            .pop()
            .and_then(|a| a.computed_rating)
    }

    fn stored_scores(store: &SqliteStore, id: i64) -> Option<CategoryScores> {
        store.read_contact(id).unwrap().scores
    }

    #[test]
    fn test_activity_calculation() {
        let store = seeded_store();
        let report = engine(&store).calculate(&request(EntityType::Activity, "100,102")).unwrap();

        assert!(report.is_success());
        assert_eq!(report.updated(EntityType::Activity, Stage::Primary), vec![100, 102]);
        assert_eq!(stored_rating(&store, 100), Some(14.0));
        assert!((stored_rating(&store, 102).unwrap() - 148.43).abs() < 0.01);

        // no propagation requested
        assert_eq!(stored_scores(&store, 1), None);
    }

    #[test]
    fn test_draft_activity_is_skipped() {
        let store = seeded_store();
        let report = engine(&store).calculate(&request(EntityType::Activity, "101")).unwrap();

        assert!(report.is_success());
        assert_eq!(report.primary(101).unwrap().status, OutcomeStatus::Skipped);
        assert_eq!(stored_rating(&store, 101), None);
    }

    #[test]
    fn test_individual_calculation() {
        let store = seeded_store();
        let report = engine(&store).calculate(&request(EntityType::Individual, "1,2")).unwrap();

        assert!(report.is_success());
        let alice = stored_scores(&store, 1).unwrap();
        assert_eq!(alice.get(Category::Livestock), 7.25);
        assert_eq!(alice.overall, 7.25);
        assert_eq!(alice.get(Category::Pets), 5.0);

        // drafts do not count
        assert_eq!(stored_scores(&store, 2).unwrap(), CategoryScores::uniform(5.0));
    }

    #[test]
    fn test_organization_blend() {
        let store = seeded_store();
        let engine = engine(&store);
        engine.calculate(&request(EntityType::Individual, "all")).unwrap();

        let report = engine.calculate(&request(EntityType::Organization, "10,20")).unwrap();
        assert!(report.is_success());

        // own: (148.43 + 15) / (1.5 + 3) in aquaculture, 5.0 elsewhere
        // members: (7.25 * 1 + 5.0 * 3) / 4 = 5.5625 in livestock and overall
        let party = stored_scores(&store, 10).unwrap();
        assert!((party.get(Category::Livestock) - (0.5 + 0.9 * 5.5625)).abs() < 1e-9);
        let own_aquaculture = (stored_rating_free_vote() + 15.0) / 4.5;
        assert!((party.get(Category::Aquaculture) - (0.1 * own_aquaculture + 0.9 * 5.0)).abs() < 1e-9);

        // no members, no activities: low-information score
        let empty = stored_scores(&store, 20).unwrap();
        assert!((empty.overall - 0.5).abs() < 1e-12);
    }

    fn stored_rating_free_vote() -> f64 {
        let now = fixed_now();
        let vote = Activity::new(102, 10, Category::Aquaculture, 10, 15, 10, now - Duration::days(365));
        crate::scoring::score_activity(&vote, &CoefficientTables::standard(), now)
            .unwrap()
            .weighted_rating
    }

    #[test]
    fn test_members_without_scores_are_left_out() {
        let store = seeded_store();
        let engine = engine(&store);
        engine.calculate(&request(EntityType::Individual, "1")).unwrap();

        engine.calculate(&request(EntityType::Organization, "10")).unwrap();

        // only Alice is scored, so the member term is hers alone
        let party = stored_scores(&store, 10).unwrap();
        assert!((party.get(Category::Livestock) - (0.5 + 0.9 * 7.25)).abs() < 1e-9);
    }

    #[test]
    fn test_propagation_depth_is_respected() {
        let store = seeded_store();
        let report = engine(&store)
            .calculate(&request(EntityType::Activity, "100").with_propagation(1))
            .unwrap();

        assert_eq!(report.updated(EntityType::Individual, Stage::Propagation), vec![1]);
        assert!(report.updated(EntityType::Organization, Stage::Propagation).is_empty());
        assert!(stored_scores(&store, 1).is_some());
        assert_eq!(stored_scores(&store, 10), None);
    }

    #[test]
    fn test_full_propagation_reaches_organizations() {
        let store = seeded_store();
        let report = engine(&store)
            .calculate(&request(EntityType::Activity, "100").with_propagation(2))
            .unwrap();

        assert_eq!(report.updated(EntityType::Individual, Stage::Propagation), vec![1]);
        assert_eq!(report.updated(EntityType::Organization, Stage::Propagation), vec![10]);
        // the empty organization is not a dependent of activity 100
        assert_eq!(stored_scores(&store, 20), None);
    }

    #[test]
    fn test_activity_on_organization_propagates_directly() {
        let store = seeded_store();
        let report = engine(&store)
            .calculate(&request(EntityType::Activity, "102").with_propagation(1))
            .unwrap();

        assert_eq!(report.updated(EntityType::Organization, Stage::Propagation), vec![10]);
        assert!(report.updated(EntityType::Individual, Stage::Propagation).is_empty());
    }

    #[test]
    fn test_source_update_runs_before_the_entity() {
        let store = seeded_store();
        let report = engine(&store)
            .calculate(&request(EntityType::Organization, "10").with_source_update(2))
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.updated(EntityType::Activity, Stage::SourceUpdate), vec![102, 100]);
        assert_eq!(report.updated(EntityType::Individual, Stage::SourceUpdate), vec![1, 2]);
        assert_eq!(stored_rating(&store, 100), Some(14.0));

        // the blend saw both freshly scored members
        let party = stored_scores(&store, 10).unwrap();
        assert!((party.get(Category::Livestock) - (0.5 + 0.9 * 5.5625)).abs() < 1e-9);

        // source updates and their results come before the primary write
        let position = |entity: EntityRef| report.outcomes.iter().position(|o| o.entity == entity).unwrap();
        assert!(
            position(EntityRef::new(EntityType::Individual, 1))
                < position(EntityRef::new(EntityType::Organization, 10))
        );
    }

    #[test]
    fn test_single_level_source_update_stops_at_direct_sources() {
        let store = seeded_store();
        let report = engine(&store)
            .calculate(&request(EntityType::Organization, "10").with_source_update(1))
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.updated(EntityType::Activity, Stage::SourceUpdate), vec![102]);
        assert_eq!(report.updated(EntityType::Individual, Stage::SourceUpdate), vec![1, 2]);
        assert!(stored_rating(&store, 102).is_some());
        // the members' own activities are one level further away
        assert_eq!(stored_rating(&store, 100), None);

        // Alice was still aggregated from her activity inputs
        assert_eq!(stored_scores(&store, 1).unwrap().get(Category::Livestock), 7.25);
    }

    #[test]
    fn test_unpublished_activity_is_removed_from_its_contact() {
        let store = seeded_store();
        let engine = engine(&store);
        engine
            .calculate(&request(EntityType::Activity, "100").with_propagation(1))
            .unwrap();
        assert_eq!(stored_scores(&store, 1).unwrap().overall, 7.25);

        let mut unpublished = Activity::new(100, 1, Category::Livestock, 2, 10, 7, fixed_now());
        unpublished.status = crate::entities::ActivityStatus::Draft;
        store.upsert_activity(&unpublished).unwrap();

        let report = engine
            .calculate(&request(EntityType::Activity, "100").with_propagation(1))
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.primary(100).unwrap().status, OutcomeStatus::Skipped);
        assert_eq!(report.updated(EntityType::Individual, Stage::Propagation), vec![1]);
        assert_eq!(stored_scores(&store, 1).unwrap(), CategoryScores::uniform(5.0));
    }

    #[test]
    fn test_recalculation_is_idempotent() {
        let store = seeded_store();
        let engine = engine(&store);
        let request = request(EntityType::Activity, "all").with_propagation(2);

        let first = engine.calculate(&request).unwrap();
        let events_after_first = store.count("events").unwrap();
        let alice = stored_scores(&store, 1);

        let second = engine.calculate(&request).unwrap();
        assert!(second.is_success());
        assert_eq!(store.count("events").unwrap(), events_after_first);
        assert_eq!(stored_scores(&store, 1), alice);
        assert!(second
            .outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::Updated { changed: false }));
        assert_eq!(first.outcomes.len(), second.outcomes.len());
    }

    #[test]
    fn test_changes_are_audited() {
        let store = seeded_store();
        engine(&store).calculate(&request(EntityType::Individual, "1")).unwrap();

        let events = store.events_for_entity(EntityType::Individual, 1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, RATING_UPDATED_EVENT);
        assert_eq!(events[0].actor, ENGINE_ACTOR);
        assert_eq!(events[0].data["old"], serde_json::Value::Null);
        assert_eq!(events[0].data["new"], json!(7.25));
        assert_eq!(events[0].data["categories"]["livestock"], json!(7.25));
    }

    #[test]
    fn test_missing_entities_do_not_stop_the_others() {
        let store = seeded_store();
        // 10 is an organization, not an individual
        let report = engine(&store).calculate(&request(EntityType::Individual, "1,10,999")).unwrap();

        assert!(!report.is_success());
        assert_eq!(report.updated(EntityType::Individual, Stage::Primary), vec![1]);
        assert_eq!(
            report.primary(999).unwrap().status,
            OutcomeStatus::Failed(RatingError::not_found(EntityType::Individual, 999))
        );
        assert!(report.primary(10).unwrap().is_failure());
        assert_eq!(stored_scores(&store, 10), None);
    }

    #[test]
    fn test_unknown_coefficient_is_isolated() {
        let store = seeded_store();
        store
            .upsert_activity(&Activity::new(103, 1, Category::Pets, 9, 10, 5, fixed_now()))
            .unwrap();
        let engine = engine(&store);

        let report = engine.calculate(&request(EntityType::Activity, "100,103")).unwrap();
        assert_eq!(report.updated(EntityType::Activity, Stage::Primary), vec![100]);
        assert_eq!(
            report.primary(103).unwrap().status,
            OutcomeStatus::Failed(RatingError::UnknownCoefficientKey { table: "kind", key: 9 })
        );

        // the contact is still rated, the bad activity shows up as an input failure
        let report = engine.calculate(&request(EntityType::Individual, "1")).unwrap();
        assert!(report.is_success());
        assert_eq!(report.stage(Stage::Input).count(), 1);
        assert_eq!(stored_scores(&store, 1).unwrap().overall, 7.25);
    }

    #[test]
    fn test_invalid_requests_write_nothing() {
        let store = seeded_store();
        let engine = engine(&store);

        let empty = CalculationRequest::new(EntityType::Individual, EntityScope::Ids(vec![]));
        assert!(matches!(engine.calculate(&empty), Err(RatingError::InvalidScope(_))));

        let too_deep = request(EntityType::Activity, "all").with_propagation(3);
        assert!(matches!(engine.calculate(&too_deep), Err(RatingError::InvalidLevel { .. })));

        assert_eq!(store.count("events").unwrap(), 0);
        assert_eq!(stored_rating(&store, 100), None);
    }

    #[test]
    fn test_abort_cancels_remaining_entities() {
        let store = seeded_store();
        let engine = engine(&store);
        engine.abort_handle().abort();

        let report = engine.calculate(&request(EntityType::Individual, "all")).unwrap();
        assert!(!report.is_success());
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::Failed(RatingError::Cancelled)));
        assert_eq!(store.count("events").unwrap(), 0);

        engine.abort_handle().reset();
        assert!(engine.calculate(&request(EntityType::Individual, "all")).unwrap().is_success());
    }

    #[test]
    fn test_chunked_all_request() {
        let store = seeded_store();
        for id in 3..=7 {
            store
                .upsert_contact(&Contact::new(id, ContactType::Individual, "Voter"))
                .unwrap();
        }
        let config = CalculationConfig {
            chunk_size: 2,
            parallel: false,
            ..CalculationConfig::default()
        };

        let report = engine(&store)
            .with_config(config)
            .calculate(&request(EntityType::Individual, "all"))
            .unwrap();

        assert!(report.is_success());
        assert_eq!(
            report.updated(EntityType::Individual, Stage::Primary),
            vec![1, 2, 3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn test_concurrent_calculations_agree() {
        let store = seeded_store();
        let engine = engine(&store);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                thread::spawn(move || {
                    engine
                        .calculate(&request(EntityType::Activity, "all").with_propagation(2))
                        .unwrap()
                        .is_success()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        // each rating changed exactly once, whoever wrote it
        assert_eq!(store.events_for_entity(EntityType::Individual, 1).unwrap().len(), 1);
        assert_eq!(stored_scores(&store, 1).unwrap().overall, 7.25);
    }

    // ------------------------------------------------------------------------
    // Store failures
    // ------------------------------------------------------------------------

    /// Delegates to SQLite, but contact writes fail once `budget` is used up
    struct FlakyStore {
        inner: Arc<SqliteStore>,
        budget: AtomicUsize,
    }

    impl DataStore for FlakyStore {
        fn read_activities(&self, selection: Selection<'_>, filter: &ActivityFilter) -> Result<Vec<Activity>> {
            self.inner.read_activities(selection, filter)
        }
        fn activities_targeting(&self, contact_ids: &[i64], filter: &ActivityFilter) -> Result<Vec<Activity>> {
            self.inner.activities_targeting(contact_ids, filter)
        }
        fn write_activity_rating(&self, id: i64, rating: f64) -> Result<()> {
            self.inner.write_activity_rating(id, rating)
        }
        fn read_contact(&self, id: i64) -> Result<Contact> {
            self.inner.read_contact(id)
        }
        fn read_contacts(&self, ids: &[i64]) -> Result<Vec<Contact>> {
            self.inner.read_contacts(ids)
        }
        fn contact_ids(&self, contact_type: ContactType) -> Result<Vec<i64>> {
            self.inner.contact_ids(contact_type)
        }
        fn write_contact_scores(&self, id: i64, scores: &CategoryScores, scored_at: DateTime<Utc>) -> Result<()> {
            let left = self.budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(RatingError::StoreUnavailable("database is locked".to_string()));
            }
            self.budget.store(left - 1, Ordering::SeqCst);
            self.inner.write_contact_scores(id, scores, scored_at)
        }
        fn members_of(&self, organization_id: i64) -> Result<Vec<i64>> {
            self.inner.members_of(organization_id)
        }
        fn organizations_of(&self, individual_id: i64) -> Result<Vec<i64>> {
            self.inner.organizations_of(individual_id)
        }
        fn activities_of(&self, contact_id: i64) -> Result<Vec<i64>> {
            self.inner.activities_of(contact_id)
        }
        fn record_event(&self, event: &Event) -> Result<()> {
            self.inner.record_event(event)
        }
    }

    #[test]
    fn test_store_failure_keeps_committed_writes() {
        let store = seeded_store();
        for id in 3..=5 {
            store
                .upsert_contact(&Contact::new(id, ContactType::Individual, "Voter"))
                .unwrap();
        }
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            budget: AtomicUsize::new(2),
        });
        let config = CalculationConfig {
            chunk_size: 2,
            ..CalculationConfig::default()
        };

        let report = RatingEngine::new(flaky)
            .with_config(config)
            .calculate(&request(EntityType::Individual, "all").with_propagation(1))
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.updated(EntityType::Individual, Stage::Primary), vec![1, 2]);
        for id in 3..=5 {
            assert!(matches!(
                report.primary(id).unwrap().status,
                OutcomeStatus::Failed(RatingError::StoreUnavailable(_))
            ));
            assert_eq!(stored_scores(&store, id), None);
        }

        // committed before the failure
        assert_eq!(stored_scores(&store, 1).unwrap().overall, 7.25);

        // propagation still ran for what was written, and failed on the store
        assert!(report.stage(Stage::Propagation).all(|o| o.is_failure()));
        assert_eq!(report.stage(Stage::Propagation).count(), 1);
    }
}
