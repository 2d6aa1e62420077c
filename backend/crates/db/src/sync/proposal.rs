//! Machine-proposed rubric edits.
//!
//! A proposal is three flat lists of atomic changes. Every change carries a
//! stable key so that a reviewer can approve any subset of them:
//!
//! - categories: `<slug>:<change_type>`
//! - criteria: `<category_slug>:<score>`
//! - red flags: `<flag_key>:<change_type>`

use serde::{Deserialize, Serialize};

use crate::rubric::models::{CriterionInput, Severity, ThresholdType};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Modify,
    Remove,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProposedChanges {
    #[serde(default)]
    pub category_changes: Vec<CategoryChange>,
    #[serde(default)]
    pub criteria_changes: Vec<CriterionChange>,
    #[serde(default)]
    pub red_flag_changes: Vec<RedFlagChange>,
    /// Free-text overview written by the analyzer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ProposedChanges {
    pub fn len(&self) -> usize {
        self.category_changes.len() + self.criteria_changes.len() + self.red_flag_changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Categories ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryChange {
    pub slug: String,
    pub reason: String,
    pub confidence: f64,
    #[serde(flatten)]
    pub action: CategoryAction,
}

impl CategoryChange {
    pub fn key(&self) -> String {
        format!("{}:{}", self.slug, self.action.kind().as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "change_type", rename_all = "snake_case")]
pub enum CategoryAction {
    Add {
        after: NewCategory,
    },
    Modify {
        #[serde(default)]
        before: CategoryFields,
        after: CategoryFields,
    },
    Remove {
        #[serde(default)]
        before: CategoryFields,
    },
}

impl CategoryAction {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Modify { .. } => ChangeKind::Modify,
            Self::Remove { .. } => ChangeKind::Remove,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub weight: f64,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    /// Appended after the existing categories when absent.
    #[serde(default)]
    pub sort_order: Option<i32>,
    #[serde(default)]
    pub criteria: Vec<CriterionInput>,
}

/// Field values of a category; `None` means "not part of this change".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

impl CategoryFields {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.weight.is_none()
            && self.is_enabled.is_none()
            && self.sort_order.is_none()
    }
}

// ── Scoring criteria ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionChange {
    pub category_slug: String,
    pub score: i32,
    pub reason: String,
    pub confidence: f64,
    #[serde(flatten)]
    pub action: CriterionAction,
}

impl CriterionChange {
    pub fn key(&self) -> String {
        format!("{}:{}", self.category_slug, self.score)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "change_type", rename_all = "snake_case")]
pub enum CriterionAction {
    Add {
        after: String,
    },
    Modify {
        #[serde(default)]
        before: Option<String>,
        after: String,
    },
    Remove {
        #[serde(default)]
        before: Option<String>,
    },
}

impl CriterionAction {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Modify { .. } => ChangeKind::Modify,
            Self::Remove { .. } => ChangeKind::Remove,
        }
    }
}

// ── Red flags ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedFlagChange {
    pub flag_key: String,
    pub reason: String,
    pub confidence: f64,
    #[serde(flatten)]
    pub action: RedFlagAction,
}

impl RedFlagChange {
    pub fn key(&self) -> String {
        format!("{}:{}", self.flag_key, self.action.kind().as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "change_type", rename_all = "snake_case")]
pub enum RedFlagAction {
    Add {
        after: NewRedFlag,
    },
    Modify {
        #[serde(default)]
        before: RedFlagFields,
        after: RedFlagFields,
    },
    Remove {
        #[serde(default)]
        before: RedFlagFields,
    },
}

impl RedFlagAction {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Modify { .. } => ChangeKind::Modify,
            Self::Remove { .. } => ChangeKind::Remove,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRedFlag {
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub threshold_type: ThresholdType,
    #[serde(default)]
    pub threshold_value: Option<f64>,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RedFlagFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_type: Option<ThresholdType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

impl RedFlagFields {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.description.is_none()
            && self.severity.is_none()
            && self.threshold_type.is_none()
            && self.threshold_value.is_none()
            && self.is_enabled.is_none()
            && self.sort_order.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn category_change_parses_tagged_modify() {
        let raw = json!({
            "slug": "objection-handling",
            "change_type": "modify",
            "reason": "Script now dedicates a full section to objections",
            "confidence": 0.82,
            "before": { "weight": 15 },
            "after": { "weight": 25 }
        });
        let change: CategoryChange = serde_json::from_value(raw).unwrap();
        assert_eq!(change.key(), "objection-handling:modify");
        match change.action {
            CategoryAction::Modify { before, after } => {
                assert_eq!(before.weight, Some(15.0));
                assert_eq!(after.weight, Some(25.0));
                assert!(after.name.is_none());
            }
            other => panic!("expected modify, got {other:?}"),
        }
    }

    #[test]
    fn criterion_key_uses_slug_and_score() {
        let raw = json!({
            "category_slug": "closing",
            "score": 4,
            "change_type": "add",
            "reason": "new level",
            "confidence": 0.5,
            "after": "Asks for the sale twice"
        });
        let change: CriterionChange = serde_json::from_value(raw).unwrap();
        assert_eq!(change.key(), "closing:4");
        assert_eq!(change.action.kind(), ChangeKind::Add);
    }

    #[test]
    fn red_flag_remove_needs_no_payload() {
        let raw = json!({
            "flag_key": "pressure-tactics",
            "change_type": "remove",
            "reason": "No longer in the script",
            "confidence": 0.9
        });
        let change: RedFlagChange = serde_json::from_value(raw).unwrap();
        assert_eq!(change.key(), "pressure-tactics:remove");
        assert!(matches!(change.action, RedFlagAction::Remove { ref before } if before.is_empty()));
    }

    #[test]
    fn unknown_change_type_is_rejected() {
        let raw = json!({
            "slug": "rapport",
            "change_type": "rename",
            "reason": "x",
            "confidence": 0.1
        });
        assert!(serde_json::from_value::<CategoryChange>(raw).is_err());
    }

    #[test]
    fn empty_proposal_defaults_all_lists() {
        let proposal: ProposedChanges = serde_json::from_value(json!({})).unwrap();
        assert!(proposal.is_empty());
        assert_eq!(proposal.len(), 0);
    }
}
