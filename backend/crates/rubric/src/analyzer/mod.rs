pub mod llm;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use coach_common::error::{CoachError, CoachResult};
use coach_db::rubric::models::RubricConfigWithRelations;
use coach_db::sync::proposal::{CategoryAction, CriterionAction, ProposedChanges, RedFlagAction};

/// Compares a sales script with a rubric and proposes edits to the rubric.
#[async_trait]
pub trait ChangeAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        script_content: &str,
        rubric: &RubricConfigWithRelations,
    ) -> CoachResult<ProposedChanges>;

    /// Short label reported by `/info`.
    fn describe(&self) -> String;
}

#[async_trait]
impl<T: ChangeAnalyzer + ?Sized> ChangeAnalyzer for Arc<T> {
    async fn analyze(
        &self,
        script_content: &str,
        rubric: &RubricConfigWithRelations,
    ) -> CoachResult<ProposedChanges> {
        (**self).analyze(script_content, rubric).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Stand-in used when no reasoning service is configured. Every sync
/// ends in a rejected log that says so.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredAnalyzer;

#[async_trait]
impl ChangeAnalyzer for UnconfiguredAnalyzer {
    async fn analyze(
        &self,
        _script_content: &str,
        _rubric: &RubricConfigWithRelations,
    ) -> CoachResult<ProposedChanges> {
        Err(CoachError::Analysis("analyzer is not configured".into()))
    }

    fn describe(&self) -> String {
        "unconfigured".to_string()
    }
}

fn check_change(kind: &str, key: &str, reason: &str, confidence: f64) -> CoachResult<()> {
    if reason.trim().is_empty() {
        return Err(CoachError::Analysis(format!(
            "{kind} change {key} has no reason"
        )));
    }
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(CoachError::Analysis(format!(
            "{kind} change {key} has confidence {confidence} outside [0, 1]"
        )));
    }
    Ok(())
}

fn check_effect(kind: &str, key: &str, empty: bool) -> CoachResult<()> {
    if empty {
        return Err(CoachError::Analysis(format!(
            "{kind} change {key} changes nothing"
        )));
    }
    Ok(())
}

fn check_unique(kind: &str, keys: impl Iterator<Item = String>) -> CoachResult<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key.clone()) {
            return Err(CoachError::Analysis(format!(
                "{kind} change key {key} appears more than once"
            )));
        }
    }
    Ok(())
}

/// Reject analyzer output that reviewers could not act on: changes
/// without a reason, confidences outside [0, 1], or keys that do not
/// identify a single change.
pub fn validate_proposal(proposal: &ProposedChanges) -> CoachResult<()> {
    for c in &proposal.category_changes {
        if c.slug.trim().is_empty() {
            return Err(CoachError::Analysis("category change without a slug".into()));
        }
        check_change("category", &c.key(), &c.reason, c.confidence)?;
        if let CategoryAction::Modify { after, .. } = &c.action {
            check_effect("category", &c.key(), after.is_empty())?;
        }
    }
    for c in &proposal.criteria_changes {
        if c.category_slug.trim().is_empty() {
            return Err(CoachError::Analysis(
                "criteria change without a category slug".into(),
            ));
        }
        check_change("criteria", &c.key(), &c.reason, c.confidence)?;
        match &c.action {
            CriterionAction::Add { after } | CriterionAction::Modify { after, .. } => {
                check_effect("criteria", &c.key(), after.trim().is_empty())?;
            }
            CriterionAction::Remove { .. } => {}
        }
    }
    for c in &proposal.red_flag_changes {
        if c.flag_key.trim().is_empty() {
            return Err(CoachError::Analysis("red flag change without a key".into()));
        }
        check_change("red flag", &c.key(), &c.reason, c.confidence)?;
        if let RedFlagAction::Modify { after, .. } = &c.action {
            check_effect("red flag", &c.key(), after.is_empty())?;
        }
    }

    check_unique("category", proposal.category_changes.iter().map(|c| c.key()))?;
    check_unique("criteria", proposal.criteria_changes.iter().map(|c| c.key()))?;
    check_unique("red flag", proposal.red_flag_changes.iter().map(|c| c.key()))?;
    Ok(())
}
