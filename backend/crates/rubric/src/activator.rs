use uuid::Uuid;

use coach_common::error::{CoachError, CoachResult};
use coach_db::rubric::models::RubricConfig;
use coach_db::rubric::repositories::RubricRepository;
use coach_db::sync::models::SyncClaim;

use crate::validation;

/// Promotes drafts to the single active rubric version.
#[derive(Clone)]
pub struct VersionActivator<R: RubricRepository> {
    repo: R,
}

impl<R: RubricRepository> VersionActivator<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Activate `draft_id` against whatever version is active right now.
    pub async fn activate(&self, draft_id: Uuid) -> CoachResult<RubricConfig> {
        let baseline = self.repo.active_id().await?;
        self.activate_against(draft_id, baseline).await
    }

    /// Activate `draft_id` only if the active version is still
    /// `expected_active`. Fails with `Conflict` if another activation got
    /// there first.
    pub async fn activate_against(
        &self,
        draft_id: Uuid,
        expected_active: Option<Uuid>,
    ) -> CoachResult<RubricConfig> {
        self.activate_claiming(draft_id, expected_active, None).await
    }

    /// Like [`activate_against`](Self::activate_against), committing the
    /// `claim` on a sync log together with the promotion.
    pub async fn activate_claiming(
        &self,
        draft_id: Uuid,
        expected_active: Option<Uuid>,
        claim: Option<SyncClaim>,
    ) -> CoachResult<RubricConfig> {
        let draft = self
            .repo
            .get_by_id(draft_id)
            .await?
            .ok_or_else(|| CoachError::NotFound(format!("rubric config not found: {draft_id}")))?;

        if !draft.config.is_draft {
            return Err(CoachError::InvalidState(format!(
                "rubric config {draft_id} is not a draft"
            )));
        }

        let weights = validation::validate(&draft.categories);
        if !weights.is_valid {
            tracing::info!(
                config_id = %draft_id,
                total = weights.total,
                "activation refused: weights out of balance"
            );
            return Err(CoachError::Validation(format!(
                "category weights must sum to 100: {}",
                weights.message
            )));
        }

        match self.repo.promote(draft_id, expected_active, claim).await? {
            Some(config) => {
                tracing::info!(
                    config_id = %config.id,
                    version = config.version,
                    previous = ?expected_active,
                    "rubric version activated"
                );
                Ok(config)
            }
            None => {
                tracing::warn!(config_id = %draft_id, "activation lost a concurrent race");
                Err(CoachError::Conflict(format!(
                    "the active rubric changed while activating {draft_id}; reload and retry"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{draft_with_weights, seed_active};
    use coach_db::memory::MemoryStore;

    #[tokio::test]
    async fn first_activation_gets_version_one() {
        let store = MemoryStore::new();
        let draft = draft_with_weights(&store, &[60.0, 40.0]).await;
        let activator = VersionActivator::new(store.clone());

        let config = activator.activate(draft).await.unwrap();
        assert_eq!(config.version, Some(1));
        assert!(config.is_active);
        assert!(!config.is_draft);
    }

    #[tokio::test]
    async fn activation_bumps_version_and_deactivates_previous() {
        let store = MemoryStore::new();
        let first = seed_active(&store, &[50.0, 50.0]).await;
        let draft = draft_with_weights(&store, &[70.0, 30.0]).await;

        let config = VersionActivator::new(store.clone())
            .activate(draft)
            .await
            .unwrap();
        assert_eq!(config.version, Some(2));

        let previous = store.get_by_id(first.config.id).await.unwrap().unwrap();
        assert!(!previous.config.is_active);
        assert_eq!(previous.config.version, Some(1));
        let active = store.get_active().await.unwrap().unwrap();
        assert_eq!(active.config.id, draft);
    }

    #[tokio::test]
    async fn unbalanced_draft_stays_a_draft() {
        let store = MemoryStore::new();
        let first = seed_active(&store, &[50.0, 50.0]).await;
        let draft = draft_with_weights(&store, &[60.0, 30.0]).await;

        let err = VersionActivator::new(store.clone())
            .activate(draft)
            .await
            .unwrap_err();
        match err {
            CoachError::Validation(message) => assert!(message.contains("10% remaining")),
            other => panic!("expected validation error, got {other:?}"),
        }

        let row = store.get_by_id(draft).await.unwrap().unwrap();
        assert!(row.config.is_draft);
        assert_eq!(store.active_id().await.unwrap(), Some(first.config.id));
    }

    #[tokio::test]
    async fn activating_an_active_config_is_invalid_state() {
        let store = MemoryStore::new();
        let active = seed_active(&store, &[100.0]).await;
        let err = VersionActivator::new(store)
            .activate(active.config.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::InvalidState(_)));
    }

    #[tokio::test]
    async fn missing_draft_is_not_found() {
        let err = VersionActivator::new(MemoryStore::new())
            .activate(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_activation_against_same_baseline_has_one_winner() {
        let store = MemoryStore::new();
        let baseline = seed_active(&store, &[100.0]).await;
        let a = draft_with_weights(&store, &[40.0, 60.0]).await;
        let b = draft_with_weights(&store, &[20.0, 80.0]).await;
        let activator = VersionActivator::new(store.clone());

        let (ra, rb) = tokio::join!(
            activator.activate_against(a, Some(baseline.config.id)),
            activator.activate_against(b, Some(baseline.config.id)),
        );

        let (winner, loser) = match (ra, rb) {
            (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
            other => panic!("expected exactly one winner, got {other:?}"),
        };
        assert_eq!(winner.version, Some(2));
        assert!(matches!(loser, CoachError::Conflict(_)));
        assert!(loser.is_retryable());

        let versions = store.list_versions().await.unwrap();
        assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
    }
}
