//! Rubric versioning and the script-sync change-proposal workflow.

pub mod activator;
pub mod analyzer;
pub mod merge;
pub mod merger;
pub mod validation;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use activator::VersionActivator;
pub use analyzer::{ChangeAnalyzer, UnconfiguredAnalyzer};
pub use merge::ApprovedChangeKeys;
pub use merger::ApprovalMerger;
pub use workflow::{SyncSettings, SyncWorkflow};
