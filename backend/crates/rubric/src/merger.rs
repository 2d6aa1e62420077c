use uuid::Uuid;

use coach_common::error::{CoachError, CoachResult};
use coach_db::rubric::models::{NewRubricConfig, RubricConfigWithRelations, RubricUpdate};
use coach_db::rubric::repositories::RubricRepository;
use coach_db::sync::models::{RubricSyncLog, SyncClaim, SyncStatus, SyncTransition};
use coach_db::sync::proposal::ProposedChanges;
use coach_db::sync::repositories::SyncLogRepository;

use crate::activator::VersionActivator;
use crate::merge::{apply_changes, select, ApprovedChangeKeys};
use crate::validation;

/// Turns a reviewed proposal into a new active rubric version, or
/// records its rejection.
#[derive(Clone)]
pub struct ApprovalMerger<R, L>
where
    R: RubricRepository + Clone,
    L: SyncLogRepository,
{
    rubric_repo: R,
    sync_repo: L,
    activator: VersionActivator<R>,
}

impl<R, L> ApprovalMerger<R, L>
where
    R: RubricRepository + Clone,
    L: SyncLogRepository,
{
    pub fn new(rubric_repo: R, sync_repo: L) -> Self {
        Self {
            activator: VersionActivator::new(rubric_repo.clone()),
            rubric_repo,
            sync_repo,
        }
    }

    async fn pending_log(&self, sync_log_id: Uuid) -> CoachResult<(RubricSyncLog, ProposedChanges)> {
        let log = self
            .sync_repo
            .get(sync_log_id)
            .await?
            .ok_or_else(|| CoachError::NotFound(format!("sync log not found: {sync_log_id}")))?;

        if log.status != SyncStatus::PendingApproval {
            return Err(CoachError::InvalidState(format!(
                "sync log {sync_log_id} is {}, expected pending_approval",
                log.status.as_str()
            )));
        }

        let proposal = log.changes_proposed.clone().ok_or_else(|| {
            CoachError::Internal(format!("sync log {sync_log_id} has no proposal"))
        })?;
        Ok((log, proposal))
    }

    /// Layer the approved subset of the log's proposal onto the active
    /// rubric and activate the result as the next version.
    ///
    /// Nothing is persisted unless activation succeeds: the log stays in
    /// `pending_approval` (or whatever a concurrent reject left it in) and
    /// the working draft is removed.
    pub async fn apply(
        &self,
        sync_log_id: Uuid,
        approved_keys: &ApprovedChangeKeys,
        approved_by: &str,
    ) -> CoachResult<RubricConfigWithRelations> {
        let (log, proposal) = self.pending_log(sync_log_id).await?;
        let (approved, rejected) = select(&proposal, approved_keys)?;

        let baseline = self
            .rubric_repo
            .get_active()
            .await?
            .ok_or_else(|| CoachError::InvalidState("there is no active rubric to apply changes to".into()))?;
        if log.rubric_config_id != Some(baseline.config.id) {
            tracing::warn!(
                sync_log_id = %log.id,
                analyzed = ?log.rubric_config_id,
                active = %baseline.config.id,
                "active rubric changed since analysis; applying onto the current version"
            );
        }

        let mut content = baseline.content();
        apply_changes(&mut content, &approved)?;
        content.normalize();
        validation::check_content(&content)?;

        let weights = validation::validate(&content.categories);
        if !weights.is_valid {
            return Err(CoachError::Validation(format!(
                "approved changes leave category weights unbalanced: {}",
                weights.message
            )));
        }

        let draft = self
            .rubric_repo
            .create_draft(NewRubricConfig {
                name: baseline.config.name.clone(),
                description: baseline.config.description.clone(),
                clone_from_id: Some(baseline.config.id),
            })
            .await?;
        let draft_id = draft.config.id;

        let claim = SyncClaim {
            sync_log_id: log.id,
            from: SyncStatus::PendingApproval,
            transition: SyncTransition::Applied {
                approved: approved.clone(),
                rejected,
                approved_by: approved_by.to_string(),
                applied_config_id: draft_id,
            },
        };

        let activated = match self
            .write_and_activate(draft_id, baseline.config.id, RubricUpdate::from_content(content), claim)
            .await
        {
            Ok(activated) => activated,
            Err(err) => {
                if let Err(cleanup) = self.rubric_repo.delete_draft(draft_id).await {
                    tracing::error!(config_id = %draft_id, error = %cleanup, "failed to discard merge draft");
                }
                return Err(err);
            }
        };

        tracing::info!(
            sync_log_id = %log.id,
            config_id = %activated.config.id,
            version = activated.config.version,
            approved = approved.len(),
            approved_by,
            "sync changes applied"
        );
        Ok(activated)
    }

    /// Fill the draft and promote it; the log moves to `applied` in the
    /// same step or not at all.
    async fn write_and_activate(
        &self,
        draft_id: Uuid,
        baseline_id: Uuid,
        update: RubricUpdate,
        claim: SyncClaim,
    ) -> CoachResult<RubricConfigWithRelations> {
        let mut written = self.rubric_repo.update_draft(draft_id, update).await?;
        let config = self
            .activator
            .activate_claiming(draft_id, Some(baseline_id), Some(claim))
            .await?;
        written.config = config;
        Ok(written)
    }

    /// Reject the whole proposal. No rubric is touched.
    pub async fn reject(&self, sync_log_id: Uuid, rejected_by: &str) -> CoachResult<RubricSyncLog> {
        let (log, proposal) = self.pending_log(sync_log_id).await?;

        let updated = self
            .sync_repo
            .transition(
                log.id,
                SyncStatus::PendingApproval,
                SyncTransition::Rejected {
                    rejected: proposal,
                    rejected_by: rejected_by.to_string(),
                },
            )
            .await?
            .ok_or_else(|| {
                CoachError::InvalidState(format!("sync log {sync_log_id} is no longer pending_approval"))
            })?;

        tracing::info!(sync_log_id = %log.id, rejected_by, "sync proposal rejected");
        Ok(updated)
    }
}
