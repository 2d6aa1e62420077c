use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sync::proposal::ProposedChanges;
use coach_common::error::{CoachError, CoachResult};

/// Lifecycle of one script-to-rubric reconciliation.
///
/// ```text
/// pending -> analyzing -> pending_approval -> applied
///    |           |               |
///    +-----------+---------------+----> rejected
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Analyzing,
    PendingApproval,
    Applied,
    Rejected,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::PendingApproval => "pending_approval",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Rejected)
    }

    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Analyzing)
                | (Self::Pending, Self::Rejected)
                | (Self::Analyzing, Self::PendingApproval)
                | (Self::Analyzing, Self::Rejected)
                | (Self::PendingApproval, Self::Applied)
                | (Self::PendingApproval, Self::Rejected)
        )
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "analyzing" => Ok(Self::Analyzing),
            "pending_approval" => Ok(Self::PendingApproval),
            "applied" => Ok(Self::Applied),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("unknown sync status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricSyncLog {
    pub id: Uuid,
    pub script_id: Uuid,
    /// Rubric version the script was compared against; `None` when no
    /// rubric was active when the sync started.
    pub rubric_config_id: Option<Uuid>,
    pub status: SyncStatus,
    pub changes_proposed: Option<ProposedChanges>,
    pub changes_approved: Option<ProposedChanges>,
    pub changes_rejected: Option<ProposedChanges>,
    pub error_message: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub applied_config_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A requested state change together with the data it records.
#[derive(Debug, Clone)]
pub enum SyncTransition {
    BeginAnalysis,
    Proposed(ProposedChanges),
    /// System rejection: analysis could not produce a proposal.
    Failed(String),
    /// User rejection of the whole proposal.
    Rejected {
        rejected: ProposedChanges,
        rejected_by: String,
    },
    Applied {
        approved: ProposedChanges,
        rejected: ProposedChanges,
        approved_by: String,
        applied_config_id: Uuid,
    },
}

/// A log transition that commits together with a rubric promotion, or not
/// at all.
#[derive(Debug, Clone)]
pub struct SyncClaim {
    pub sync_log_id: Uuid,
    pub from: SyncStatus,
    pub transition: SyncTransition,
}

impl SyncClaim {
    pub fn moved_on(&self) -> CoachError {
        CoachError::InvalidState(format!(
            "sync log {} is no longer {}",
            self.sync_log_id,
            self.from.as_str()
        ))
    }
}

impl SyncTransition {
    pub fn target(&self) -> SyncStatus {
        match self {
            Self::BeginAnalysis => SyncStatus::Analyzing,
            Self::Proposed(_) => SyncStatus::PendingApproval,
            Self::Failed(_) | Self::Rejected { .. } => SyncStatus::Rejected,
            Self::Applied { .. } => SyncStatus::Applied,
        }
    }

    /// Reject transitions that are not edges of the status graph.
    pub fn check_from(&self, from: SyncStatus) -> CoachResult<()> {
        let target = self.target();
        let allowed = from.can_transition_to(target)
            && match self {
                Self::Failed(_) => matches!(from, SyncStatus::Pending | SyncStatus::Analyzing),
                Self::Rejected { .. } => from == SyncStatus::PendingApproval,
                _ => true,
            };

        if allowed {
            Ok(())
        } else {
            Err(CoachError::Internal(format!(
                "illegal sync transition {} -> {}",
                from.as_str(),
                target.as_str()
            )))
        }
    }

    /// Fold this transition into `log`, stamping times with `now`.
    pub fn apply_to(self, log: &mut RubricSyncLog, now: DateTime<Utc>) {
        log.status = self.target();
        log.updated_at = now;
        match self {
            Self::BeginAnalysis => {}
            Self::Proposed(changes) => log.changes_proposed = Some(changes),
            Self::Failed(message) => log.error_message = Some(message),
            Self::Rejected {
                rejected,
                rejected_by,
            } => {
                log.changes_rejected = Some(rejected);
                log.rejected_by = Some(rejected_by);
            }
            Self::Applied {
                approved,
                rejected,
                approved_by,
                applied_config_id,
            } => {
                log.changes_approved = Some(approved);
                log.changes_rejected = Some(rejected);
                log.approved_by = Some(approved_by);
                log.approved_at = Some(now);
                log.applied_at = Some(now);
                log.applied_config_id = Some(applied_config_id);
            }
        }
    }
}
