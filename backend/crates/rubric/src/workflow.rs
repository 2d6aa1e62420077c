use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use coach_common::error::{CoachError, CoachResult};
use coach_db::rubric::repositories::RubricRepository;
use coach_db::scripts::repositories::ScriptRepository;
use coach_db::sync::models::{RubricSyncLog, SyncStatus, SyncTransition};
use coach_db::sync::repositories::SyncLogRepository;

use crate::analyzer::{validate_proposal, ChangeAnalyzer};

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    /// Upper bound on one analyzer call.
    pub analysis_timeout: Duration,
    /// An `analyzing` log untouched for longer than this is abandoned.
    pub stale_after: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            analysis_timeout: Duration::from_secs(90),
            stale_after: Duration::from_secs(900),
        }
    }
}

/// Drives a sync log from `pending` to `pending_approval` or `rejected`.
#[derive(Clone)]
pub struct SyncWorkflow<R, S, L, A>
where
    R: RubricRepository,
    S: ScriptRepository,
    L: SyncLogRepository,
    A: ChangeAnalyzer,
{
    rubric_repo: R,
    script_repo: S,
    sync_repo: L,
    analyzer: A,
    settings: SyncSettings,
}

impl<R, S, L, A> SyncWorkflow<R, S, L, A>
where
    R: RubricRepository,
    S: ScriptRepository,
    L: SyncLogRepository,
    A: ChangeAnalyzer,
{
    pub fn new(rubric_repo: R, script_repo: S, sync_repo: L, analyzer: A, settings: SyncSettings) -> Self {
        Self {
            rubric_repo,
            script_repo,
            sync_repo,
            analyzer,
            settings,
        }
    }

    /// Open a sync log for `script_id` against the active rubric.
    ///
    /// The returned log is `analyzing` and waits for [`Self::run_analysis`],
    /// or is already `rejected` when there is nothing to compare.
    pub async fn start(&self, script_id: Uuid) -> CoachResult<RubricSyncLog> {
        let script = self
            .script_repo
            .get_by_id(script_id)
            .await?
            .ok_or_else(|| CoachError::NotFound(format!("script not found: {script_id}")))?;
        let active = self.rubric_repo.active_id().await?;

        let log = self.sync_repo.create(script_id, active).await?;
        tracing::info!(sync_log_id = %log.id, %script_id, rubric_config_id = ?active, "sync started");

        if active.is_none() {
            return self
                .fail(log.id, SyncStatus::Pending, "no active rubric to compare against")
                .await;
        }
        if script.content.trim().is_empty() {
            return self
                .fail(log.id, SyncStatus::Pending, "script has no content to analyze")
                .await;
        }

        self.sync_repo
            .transition(log.id, SyncStatus::Pending, SyncTransition::BeginAnalysis)
            .await?
            .ok_or_else(|| CoachError::InvalidState(format!("sync log {} left pending early", log.id)))
    }

    /// Run the analyzer for an `analyzing` log and record the outcome.
    /// Analyzer failures end the log in `rejected`; they are not returned
    /// as errors. Logs in any other state are returned unchanged.
    pub async fn run_analysis(&self, sync_log_id: Uuid) -> CoachResult<RubricSyncLog> {
        let log = self.require(sync_log_id).await?;
        if log.status != SyncStatus::Analyzing {
            return Ok(log);
        }

        let outcome = self.analyze(&log).await;
        let transition = match outcome {
            Ok(proposal) => {
                tracing::info!(
                    sync_log_id = %log.id,
                    changes = proposal.len(),
                    "analysis produced a proposal"
                );
                SyncTransition::Proposed(proposal)
            }
            Err(err) => {
                tracing::warn!(sync_log_id = %log.id, error = %err, "analysis failed");
                SyncTransition::Failed(err.to_string())
            }
        };

        match self
            .sync_repo
            .transition(log.id, SyncStatus::Analyzing, transition)
            .await?
        {
            Some(updated) => Ok(updated),
            None => {
                tracing::warn!(sync_log_id = %log.id, "sync log resolved elsewhere during analysis");
                self.require(sync_log_id).await
            }
        }
    }

    async fn analyze(
        &self,
        log: &RubricSyncLog,
    ) -> CoachResult<coach_db::sync::proposal::ProposedChanges> {
        let script = self
            .script_repo
            .get_by_id(log.script_id)
            .await?
            .ok_or_else(|| CoachError::Analysis("script was deleted before analysis".into()))?;
        let rubric_id = log
            .rubric_config_id
            .ok_or_else(|| CoachError::Analysis("no rubric recorded for this sync".into()))?;
        let rubric = self
            .rubric_repo
            .get_by_id(rubric_id)
            .await?
            .ok_or_else(|| CoachError::Analysis(format!("rubric {rubric_id} no longer exists")))?;

        let timeout = self.settings.analysis_timeout;
        let proposal = tokio::time::timeout(timeout, self.analyzer.analyze(&script.content, &rubric))
            .await
            .map_err(|_| {
                CoachError::Analysis(format!("analysis timed out after {}s", timeout.as_secs()))
            })??;

        validate_proposal(&proposal)?;
        Ok(proposal)
    }

    /// Current state of a sync log. Safe to poll; an `analyzing` log that
    /// has gone stale is resolved to `rejected` first.
    pub async fn get_status(&self, sync_log_id: Uuid) -> CoachResult<RubricSyncLog> {
        let log = self.require(sync_log_id).await?;
        if log.status != SyncStatus::Analyzing {
            return Ok(log);
        }

        let stale = (Utc::now() - log.updated_at)
            .to_std()
            .map_or(false, |age| age > self.settings.stale_after);
        if !stale {
            return Ok(log);
        }

        let message = format!(
            "analysis abandoned after {}s without a result",
            self.settings.stale_after.as_secs()
        );
        tracing::warn!(sync_log_id = %log.id, "resolving stale analysis");
        match self
            .sync_repo
            .transition(log.id, SyncStatus::Analyzing, SyncTransition::Failed(message))
            .await?
        {
            Some(updated) => Ok(updated),
            None => self.require(sync_log_id).await,
        }
    }

    pub async fn list_for_script(&self, script_id: Uuid) -> CoachResult<Vec<RubricSyncLog>> {
        self.sync_repo.list_for_script(script_id).await
    }

    async fn require(&self, sync_log_id: Uuid) -> CoachResult<RubricSyncLog> {
        self.sync_repo
            .get(sync_log_id)
            .await?
            .ok_or_else(|| CoachError::NotFound(format!("sync log not found: {sync_log_id}")))
    }

    async fn fail(&self, id: Uuid, from: SyncStatus, reason: &str) -> CoachResult<RubricSyncLog> {
        tracing::info!(sync_log_id = %id, reason, "sync rejected without analysis");
        match self
            .sync_repo
            .transition(id, from, SyncTransition::Failed(reason.to_string()))
            .await?
        {
            Some(log) => Ok(log),
            None => self.require(id).await,
        }
    }
}
