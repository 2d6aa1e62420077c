//! Process-local store with the same semantics as the Postgres
//! repositories. Every operation runs under one mutex, which plays the role
//! of the database transaction. Used by tests and local experiments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::rubric::models::{
    sort_categories, sort_red_flags, NewRubricConfig, RubricCategory, RubricConfig,
    RubricConfigWithRelations, RubricContent, RubricRedFlag, RubricUpdate, RubricVersionSummary,
};
use crate::rubric::repositories::RubricRepository;
use crate::scripts::models::{NewSalesScript, SalesScript, ScriptFilter};
use crate::scripts::repositories::ScriptRepository;
use crate::sync::models::{RubricSyncLog, SyncClaim, SyncStatus, SyncTransition};
use crate::sync::repositories::SyncLogRepository;
use coach_common::error::{CoachError, CoachResult};

#[derive(Default)]
struct State {
    configs: HashMap<Uuid, RubricConfig>,
    categories: Vec<RubricCategory>,
    red_flags: Vec<RubricRedFlag>,
    active: Option<Uuid>,
    scripts: HashMap<Uuid, SalesScript>,
    sync_logs: HashMap<Uuid, RubricSyncLog>,
}

impl State {
    fn with_relations(&self, config: &RubricConfig) -> RubricConfigWithRelations {
        let mut categories: Vec<RubricCategory> = self
            .categories
            .iter()
            .filter(|c| c.config_id == config.id)
            .cloned()
            .collect();
        sort_categories(&mut categories);

        let mut red_flags: Vec<RubricRedFlag> = self
            .red_flags
            .iter()
            .filter(|f| f.config_id == config.id)
            .cloned()
            .collect();
        sort_red_flags(&mut red_flags);

        RubricConfigWithRelations {
            config: config.clone(),
            categories,
            red_flags,
        }
    }

    fn require(&self, id: Uuid) -> CoachResult<RubricConfigWithRelations> {
        self.configs
            .get(&id)
            .map(|c| self.with_relations(c))
            .ok_or_else(|| CoachError::NotFound(format!("rubric config not found: {id}")))
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CoachResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| CoachError::Internal(format!("memory store poisoned: {e}")))
    }
}

#[async_trait]
impl RubricRepository for MemoryStore {
    async fn create_draft(&self, new: NewRubricConfig) -> CoachResult<RubricConfigWithRelations> {
        let mut state = self.lock()?;

        let source: Option<RubricContent> = match new.clone_from_id {
            Some(source_id) => Some(state.require(source_id)?.content()),
            None => None,
        };

        let now = Utc::now();
        let config = RubricConfig {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            version: None,
            is_active: false,
            is_draft: true,
            created_at: now,
            updated_at: now,
        };

        if let Some(content) = source {
            let (categories, red_flags) = content.instantiate(config.id, now);
            state.categories.extend(categories);
            state.red_flags.extend(red_flags);
        }

        let id = config.id;
        state.configs.insert(id, config);
        state.require(id)
    }

    async fn get_by_id(&self, id: Uuid) -> CoachResult<Option<RubricConfigWithRelations>> {
        let state = self.lock()?;
        Ok(state.configs.get(&id).map(|c| state.with_relations(c)))
    }

    async fn get_active(&self) -> CoachResult<Option<RubricConfigWithRelations>> {
        let state = self.lock()?;
        Ok(state
            .active
            .and_then(|id| state.configs.get(&id))
            .map(|c| state.with_relations(c)))
    }

    async fn list_versions(&self) -> CoachResult<Vec<RubricVersionSummary>> {
        let state = self.lock()?;
        let mut summaries: Vec<RubricVersionSummary> = state
            .configs
            .values()
            .map(|c| RubricVersionSummary {
                id: c.id,
                name: c.name.clone(),
                version: c.version,
                is_active: c.is_active,
                is_draft: c.is_draft,
                category_count: state.categories.iter().filter(|x| x.config_id == c.id).count()
                    as i64,
                red_flag_count: state.red_flags.iter().filter(|x| x.config_id == c.id).count()
                    as i64,
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect();

        // Drafts (no version) first, then newest version first.
        summaries.sort_by(|a, b| match (a.version, b.version) {
            (None, None) => b.created_at.cmp(&a.created_at),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => y.cmp(&x),
        });
        Ok(summaries)
    }

    async fn update_draft(
        &self,
        id: Uuid,
        update: RubricUpdate,
    ) -> CoachResult<RubricConfigWithRelations> {
        let mut state = self.lock()?;
        let now = Utc::now();

        let config = state
            .configs
            .get_mut(&id)
            .ok_or_else(|| CoachError::NotFound(format!("rubric config not found: {id}")))?;
        if !config.is_draft {
            return Err(CoachError::InvalidState(format!(
                "rubric config {id} has been activated and can no longer be edited"
            )));
        }

        if let Some(name) = update.name {
            config.name = name;
        }
        if let Some(description) = update.description {
            config.description = Some(description);
        }
        config.updated_at = now;

        let content = RubricContent {
            categories: update.categories.clone().unwrap_or_default(),
            red_flags: update.red_flags.clone().unwrap_or_default(),
        };
        let (categories, red_flags) = content.instantiate(id, now);

        if update.categories.is_some() {
            state.categories.retain(|c| c.config_id != id);
            state.categories.extend(categories);
        }
        if update.red_flags.is_some() {
            state.red_flags.retain(|f| f.config_id != id);
            state.red_flags.extend(red_flags);
        }

        state.require(id)
    }

    async fn delete_draft(&self, id: Uuid) -> CoachResult<()> {
        let mut state = self.lock()?;

        match state.configs.get(&id) {
            None => {
                return Err(CoachError::NotFound(format!(
                    "rubric config not found: {id}"
                )))
            }
            Some(config) if !config.is_draft => {
                return Err(CoachError::InvalidState(format!(
                    "rubric config {id} has been activated; only drafts can be deleted"
                )))
            }
            Some(_) => {}
        }

        state.configs.remove(&id);
        state.categories.retain(|c| c.config_id != id);
        state.red_flags.retain(|f| f.config_id != id);
        Ok(())
    }

    async fn active_id(&self) -> CoachResult<Option<Uuid>> {
        Ok(self.lock()?.active)
    }

    async fn promote(
        &self,
        draft_id: Uuid,
        expected_active: Option<Uuid>,
        claim: Option<SyncClaim>,
    ) -> CoachResult<Option<RubricConfig>> {
        if let Some(claim) = &claim {
            claim.transition.check_from(claim.from)?;
        }
        let mut state = self.lock()?;

        if state.active != expected_active {
            return Ok(None);
        }
        match state.configs.get(&draft_id) {
            None => {
                return Err(CoachError::NotFound(format!(
                    "rubric config not found: {draft_id}"
                )))
            }
            Some(config) if !config.is_draft => return Ok(None),
            Some(_) => {}
        }
        if let Some(claim) = &claim {
            let claimable = state
                .sync_logs
                .get(&claim.sync_log_id)
                .is_some_and(|log| log.status == claim.from);
            if !claimable {
                return Err(claim.moved_on());
            }
        }

        let next_version = state
            .configs
            .values()
            .filter_map(|c| c.version)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();

        for config in state.configs.values_mut() {
            if config.is_active && config.id != draft_id {
                config.is_active = false;
                config.updated_at = now;
            }
        }

        let promoted = match state.configs.get_mut(&draft_id) {
            Some(config) => {
                config.is_draft = false;
                config.is_active = true;
                config.version = Some(next_version);
                config.updated_at = now;
                config.clone()
            }
            None => return Err(CoachError::Internal("draft vanished during promotion".into())),
        };
        state.active = Some(draft_id);

        if let Some(claim) = claim {
            if let Some(log) = state.sync_logs.get_mut(&claim.sync_log_id) {
                claim.transition.apply_to(log, now);
            }
        }

        Ok(Some(promoted))
    }
}

#[async_trait]
impl ScriptRepository for MemoryStore {
    async fn upload(&self, script: NewSalesScript) -> CoachResult<SalesScript> {
        let mut state = self.lock()?;
        let version = state
            .scripts
            .values()
            .filter(|s| s.product_type == script.product_type)
            .map(|s| s.version)
            .max()
            .unwrap_or(0)
            + 1;

        let now = Utc::now();
        let saved = SalesScript {
            id: Uuid::new_v4(),
            product_type: script.product_type,
            name: script.name,
            version,
            content: script.content,
            is_active: false,
            created_at: now,
            updated_at: now,
        };
        state.scripts.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn get_by_id(&self, id: Uuid) -> CoachResult<Option<SalesScript>> {
        Ok(self.lock()?.scripts.get(&id).cloned())
    }

    async fn get_active(&self, product_type: &str) -> CoachResult<Option<SalesScript>> {
        Ok(self
            .lock()?
            .scripts
            .values()
            .find(|s| s.product_type == product_type && s.is_active)
            .cloned())
    }

    async fn list(&self, filter: ScriptFilter) -> CoachResult<Vec<SalesScript>> {
        let (limit, offset) = filter.page()?;
        let state = self.lock()?;
        let mut scripts: Vec<SalesScript> = state
            .scripts
            .values()
            .filter(|s| {
                filter
                    .product_type
                    .as_deref()
                    .map_or(true, |p| s.product_type == p)
            })
            .cloned()
            .collect();
        scripts.sort_by(|a, b| {
            a.product_type
                .cmp(&b.product_type)
                .then_with(|| b.version.cmp(&a.version))
        });

        Ok(scripts
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn activate(&self, id: Uuid) -> CoachResult<SalesScript> {
        let mut state = self.lock()?;
        let product_type = state
            .scripts
            .get(&id)
            .map(|s| s.product_type.clone())
            .ok_or_else(|| CoachError::NotFound(format!("script not found: {id}")))?;

        let now = Utc::now();
        for script in state.scripts.values_mut() {
            if script.product_type == product_type {
                let active = script.id == id;
                if script.is_active != active {
                    script.is_active = active;
                    script.updated_at = now;
                }
            }
        }

        state
            .scripts
            .get(&id)
            .cloned()
            .ok_or_else(|| CoachError::NotFound(format!("script not found: {id}")))
    }

    async fn delete(&self, id: Uuid) -> CoachResult<()> {
        self.lock()?
            .scripts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoachError::NotFound(format!("script not found: {id}")))
    }
}

#[async_trait]
impl SyncLogRepository for MemoryStore {
    async fn create(
        &self,
        script_id: Uuid,
        rubric_config_id: Option<Uuid>,
    ) -> CoachResult<RubricSyncLog> {
        let now = Utc::now();
        let log = RubricSyncLog {
            id: Uuid::new_v4(),
            script_id,
            rubric_config_id,
            status: SyncStatus::Pending,
            changes_proposed: None,
            changes_approved: None,
            changes_rejected: None,
            error_message: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            applied_at: None,
            applied_config_id: None,
            created_at: now,
            updated_at: now,
        };
        self.lock()?.sync_logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn get(&self, id: Uuid) -> CoachResult<Option<RubricSyncLog>> {
        Ok(self.lock()?.sync_logs.get(&id).cloned())
    }

    async fn list_for_script(&self, script_id: Uuid) -> CoachResult<Vec<RubricSyncLog>> {
        let state = self.lock()?;
        let mut logs: Vec<RubricSyncLog> = state
            .sync_logs
            .values()
            .filter(|l| l.script_id == script_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SyncStatus,
        transition: SyncTransition,
    ) -> CoachResult<Option<RubricSyncLog>> {
        transition.check_from(from)?;

        let mut state = self.lock()?;
        match state.sync_logs.get_mut(&id) {
            Some(log) if log.status == from => {
                transition.apply_to(log, Utc::now());
                Ok(Some(log.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::models::{CategoryInput, CriterionInput, RedFlagInput, Severity, ThresholdType};
    use crate::sync::proposal::ProposedChanges;

    fn category(slug: &str, weight: f64, sort_order: i32) -> CategoryInput {
        CategoryInput {
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            description: None,
            weight,
            sort_order,
            is_enabled: true,
            criteria: vec![
                CriterionInput {
                    score: 1,
                    description: "missed".to_string(),
                },
                CriterionInput {
                    score: 3,
                    description: "partial".to_string(),
                },
            ],
        }
    }

    fn flag(key: &str) -> RedFlagInput {
        RedFlagInput {
            flag_key: key.to_string(),
            display_name: key.to_string(),
            description: None,
            severity: Severity::Medium,
            threshold_type: ThresholdType::Boolean,
            threshold_value: None,
            is_enabled: true,
            sort_order: 0,
        }
    }

    async fn seeded(store: &MemoryStore) -> RubricConfigWithRelations {
        let draft = store
            .create_draft(NewRubricConfig {
                name: "seed".to_string(),
                ..NewRubricConfig::default()
            })
            .await
            .unwrap();
        store
            .update_draft(
                draft.config.id,
                RubricUpdate {
                    categories: Some(vec![category("rapport", 40.0, 1), category("closing", 60.0, 0)]),
                    red_flags: Some(vec![flag("pressure")]),
                    ..RubricUpdate::default()
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn clone_preserves_content_with_fresh_ids() {
        let store = MemoryStore::new();
        let source = seeded(&store).await;

        let clone = store
            .create_draft(NewRubricConfig {
                name: "copy".to_string(),
                description: None,
                clone_from_id: Some(source.config.id),
            })
            .await
            .unwrap();

        assert_ne!(clone.config.id, source.config.id);
        assert_eq!(clone.content(), source.content());
        // sorted by sort_order
        assert_eq!(clone.categories[0].slug, "closing");
        for (a, b) in clone.categories.iter().zip(&source.categories) {
            assert_ne!(a.id, b.id);
            assert_eq!(a.weight, b.weight);
            for (ca, cb) in a.criteria.iter().zip(&b.criteria) {
                assert_ne!(ca.id, cb.id);
            }
        }
        assert_ne!(clone.red_flags[0].id, source.red_flags[0].id);
    }

    #[tokio::test]
    async fn clone_of_missing_source_is_not_found() {
        let store = MemoryStore::new();
        let result = store
            .create_draft(NewRubricConfig {
                name: "copy".to_string(),
                description: None,
                clone_from_id: Some(Uuid::new_v4()),
            })
            .await;
        assert!(matches!(result, Err(CoachError::NotFound(_))));
    }

    #[tokio::test]
    async fn promote_is_compare_and_swap() {
        let store = MemoryStore::new();
        let a = seeded(&store).await;
        let b = seeded(&store).await;

        let won = store.promote(a.config.id, None, None).await.unwrap().unwrap();
        assert_eq!(won.version, Some(1));
        let lost = store.promote(b.config.id, None, None).await.unwrap();
        assert!(lost.is_none());

        let b_row = RubricRepository::get_by_id(&store, b.config.id).await.unwrap().unwrap();
        assert!(b_row.config.is_draft);
        assert_eq!(store.active_id().await.unwrap(), Some(a.config.id));

        let second = store
            .promote(b.config.id, Some(a.config.id), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.version, Some(2));
        let a_row = RubricRepository::get_by_id(&store, a.config.id).await.unwrap().unwrap();
        assert!(!a_row.config.is_active);
    }

    #[tokio::test]
    async fn list_versions_puts_drafts_first() {
        let store = MemoryStore::new();
        let a = seeded(&store).await;
        store.promote(a.config.id, None, None).await.unwrap();
        let _draft = seeded(&store).await;

        let versions = store.list_versions().await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_draft);
        assert_eq!(versions[1].version, Some(1));
        assert_eq!(versions[1].category_count, 2);
        assert_eq!(versions[1].red_flag_count, 1);
    }

    #[tokio::test]
    async fn script_activation_is_per_product() {
        let store = MemoryStore::new();
        let upload = |product: &str| NewSalesScript {
            product_type: product.to_string(),
            name: "script".to_string(),
            content: "text".to_string(),
        };
        let aca_1 = store.upload(upload("aca")).await.unwrap();
        let aca_2 = store.upload(upload("aca")).await.unwrap();
        let life = store.upload(upload("life_insurance")).await.unwrap();
        assert_eq!(aca_2.version, 2);
        assert_eq!(life.version, 1);

        store.activate(aca_1.id).await.unwrap();
        store.activate(life.id).await.unwrap();
        store.activate(aca_2.id).await.unwrap();

        assert_eq!(ScriptRepository::get_active(&store, "aca").await.unwrap().unwrap().id, aca_2.id);
        assert_eq!(
            ScriptRepository::get_active(&store, "life_insurance").await.unwrap().unwrap().id,
            life.id
        );
    }

    #[tokio::test]
    async fn sync_transition_checks_current_status() {
        let store = MemoryStore::new();
        let log = SyncLogRepository::create(&store, Uuid::new_v4(), None)
            .await
            .unwrap();

        let moved = store
            .transition(log.id, SyncStatus::Pending, SyncTransition::BeginAnalysis)
            .await
            .unwrap();
        assert_eq!(moved.unwrap().status, SyncStatus::Analyzing);

        let stale = store
            .transition(log.id, SyncStatus::Pending, SyncTransition::BeginAnalysis)
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    fn applied_claim(sync_log_id: Uuid, config_id: Uuid) -> SyncClaim {
        SyncClaim {
            sync_log_id,
            from: SyncStatus::PendingApproval,
            transition: SyncTransition::Applied {
                approved: ProposedChanges::default(),
                rejected: ProposedChanges::default(),
                approved_by: "lead".to_string(),
                applied_config_id: config_id,
            },
        }
    }

    async fn log_in(store: &MemoryStore, steps: Vec<(SyncStatus, SyncTransition)>) -> Uuid {
        let log = SyncLogRepository::create(store, Uuid::new_v4(), None)
            .await
            .unwrap();
        for (from, transition) in steps {
            store.transition(log.id, from, transition).await.unwrap().unwrap();
        }
        log.id
    }

    #[tokio::test]
    async fn promote_with_claim_moves_the_log_in_the_same_step() {
        let store = MemoryStore::new();
        let draft = seeded(&store).await;
        let log_id = log_in(
            &store,
            vec![
                (SyncStatus::Pending, SyncTransition::BeginAnalysis),
                (SyncStatus::Analyzing, SyncTransition::Proposed(ProposedChanges::default())),
            ],
        )
        .await;

        store
            .promote(draft.config.id, None, Some(applied_claim(log_id, draft.config.id)))
            .await
            .unwrap()
            .unwrap();

        let log = store.get(log_id).await.unwrap().unwrap();
        assert_eq!(log.status, SyncStatus::Applied);
        assert_eq!(log.applied_config_id, Some(draft.config.id));
    }

    #[tokio::test]
    async fn promote_with_stale_claim_changes_nothing() {
        let store = MemoryStore::new();
        let draft = seeded(&store).await;
        let log_id = log_in(
            &store,
            vec![(SyncStatus::Pending, SyncTransition::Failed("no rubric".to_string()))],
        )
        .await;

        let err = store
            .promote(draft.config.id, None, Some(applied_claim(log_id, draft.config.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::InvalidState(_)));

        assert_eq!(store.active_id().await.unwrap(), None);
        let row = RubricRepository::get_by_id(&store, draft.config.id).await.unwrap().unwrap();
        assert!(row.config.is_draft);
        let log = store.get(log_id).await.unwrap().unwrap();
        assert_eq!(log.status, SyncStatus::Rejected);
        assert!(log.applied_config_id.is_none());
    }
}
