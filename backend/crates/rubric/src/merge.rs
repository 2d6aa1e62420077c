//! Selecting a subset of a proposal and layering it onto rubric content.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use coach_common::error::{CoachError, CoachResult};
use coach_db::rubric::models::{CategoryInput, CriterionInput, RedFlagInput, RubricContent};
use coach_db::sync::proposal::{
    CategoryAction, CategoryChange, CriterionAction, CriterionChange, ProposedChanges,
    RedFlagAction, RedFlagChange,
};

/// Keys of the proposed changes a reviewer accepted, one list per kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApprovedChangeKeys {
    #[serde(default)]
    pub category_changes: Vec<String>,
    #[serde(default)]
    pub criteria_changes: Vec<String>,
    #[serde(default)]
    pub red_flag_changes: Vec<String>,
}

fn partition<T: Clone>(
    kind: &str,
    changes: &[T],
    approved: &[String],
    key: impl Fn(&T) -> String,
) -> CoachResult<(Vec<T>, Vec<T>)> {
    let wanted: HashSet<&str> = approved.iter().map(String::as_str).collect();
    let known: HashSet<String> = changes.iter().map(&key).collect();

    if let Some(unknown) = wanted.iter().find(|k| !known.contains(**k)) {
        return Err(CoachError::InvalidInput(format!(
            "unknown {kind} change key: {unknown}"
        )));
    }

    Ok(changes
        .iter()
        .cloned()
        .partition(|change| wanted.contains(key(change).as_str())))
}

/// Split `proposal` into the approved changes and the rest, keeping the
/// proposal's order. Every approved key must name a proposed change.
pub fn select(
    proposal: &ProposedChanges,
    approved: &ApprovedChangeKeys,
) -> CoachResult<(ProposedChanges, ProposedChanges)> {
    let (cat_yes, cat_no) = partition(
        "category",
        &proposal.category_changes,
        &approved.category_changes,
        CategoryChange::key,
    )?;
    let (crit_yes, crit_no) = partition(
        "criteria",
        &proposal.criteria_changes,
        &approved.criteria_changes,
        CriterionChange::key,
    )?;
    let (flag_yes, flag_no) = partition(
        "red flag",
        &proposal.red_flag_changes,
        &approved.red_flag_changes,
        RedFlagChange::key,
    )?;

    Ok((
        ProposedChanges {
            category_changes: cat_yes,
            criteria_changes: crit_yes,
            red_flag_changes: flag_yes,
            summary: None,
        },
        ProposedChanges {
            category_changes: cat_no,
            criteria_changes: crit_no,
            red_flag_changes: flag_no,
            summary: None,
        },
    ))
}

fn next_sort_order<'a>(orders: impl Iterator<Item = &'a i32>) -> i32 {
    orders.max().map_or(0, |max| max + 1)
}

fn find_category<'a>(
    content: &'a mut RubricContent,
    slug: &str,
) -> CoachResult<&'a mut CategoryInput> {
    content
        .categories
        .iter_mut()
        .find(|c| c.slug == slug)
        .ok_or_else(|| CoachError::InvalidInput(format!("category '{slug}' does not exist")))
}

fn apply_category(content: &mut RubricContent, change: &CategoryChange) -> CoachResult<()> {
    let slug = change.slug.as_str();
    match &change.action {
        CategoryAction::Add { after } => {
            if content.categories.iter().any(|c| c.slug == slug) {
                return Err(CoachError::InvalidInput(format!(
                    "category '{slug}' already exists"
                )));
            }
            let sort_order = after
                .sort_order
                .unwrap_or_else(|| next_sort_order(content.categories.iter().map(|c| &c.sort_order)));
            content.categories.push(CategoryInput {
                name: after.name.clone(),
                slug: slug.to_string(),
                description: after.description.clone(),
                weight: after.weight,
                sort_order,
                is_enabled: after.is_enabled,
                criteria: after.criteria.clone(),
            });
        }
        CategoryAction::Modify { after, .. } => {
            let category = find_category(content, slug)?;
            if let Some(name) = &after.name {
                category.name = name.clone();
            }
            if let Some(description) = &after.description {
                category.description = Some(description.clone());
            }
            if let Some(weight) = after.weight {
                category.weight = weight;
            }
            if let Some(enabled) = after.is_enabled {
                category.is_enabled = enabled;
            }
            if let Some(order) = after.sort_order {
                category.sort_order = order;
            }
        }
        CategoryAction::Remove { .. } => {
            let before = content.categories.len();
            content.categories.retain(|c| c.slug != slug);
            if content.categories.len() == before {
                return Err(CoachError::InvalidInput(format!(
                    "category '{slug}' does not exist"
                )));
            }
        }
    }
    Ok(())
}

fn apply_criterion(content: &mut RubricContent, change: &CriterionChange) -> CoachResult<()> {
    let category = find_category(content, &change.category_slug)?;
    let score = change.score;
    let position = category.criteria.iter().position(|c| c.score == score);

    match (&change.action, position) {
        (CriterionAction::Add { after }, None) => {
            category.criteria.push(CriterionInput {
                score,
                description: after.clone(),
            });
            category.criteria.sort_by_key(|c| c.score);
        }
        (CriterionAction::Modify { after, .. }, Some(i)) => {
            category.criteria[i].description = after.clone();
        }
        (CriterionAction::Remove { .. }, Some(i)) => {
            category.criteria.remove(i);
        }
        (CriterionAction::Add { .. }, Some(_)) => {
            return Err(CoachError::InvalidInput(format!(
                "criterion {} already exists",
                change.key()
            )))
        }
        (_, None) => {
            return Err(CoachError::InvalidInput(format!(
                "criterion {} does not exist",
                change.key()
            )))
        }
    }
    Ok(())
}

fn apply_red_flag(content: &mut RubricContent, change: &RedFlagChange) -> CoachResult<()> {
    let key = change.flag_key.as_str();
    let position = content.red_flags.iter().position(|f| f.flag_key == key);

    match (&change.action, position) {
        (RedFlagAction::Add { after }, None) => {
            let sort_order = after
                .sort_order
                .unwrap_or_else(|| next_sort_order(content.red_flags.iter().map(|f| &f.sort_order)));
            content.red_flags.push(RedFlagInput {
                flag_key: key.to_string(),
                display_name: after.display_name.clone(),
                description: after.description.clone(),
                severity: after.severity,
                threshold_type: after.threshold_type,
                threshold_value: after.threshold_value,
                is_enabled: after.is_enabled,
                sort_order,
            });
        }
        (RedFlagAction::Modify { after, .. }, Some(i)) => {
            let flag = &mut content.red_flags[i];
            if let Some(name) = &after.display_name {
                flag.display_name = name.clone();
            }
            if let Some(description) = &after.description {
                flag.description = Some(description.clone());
            }
            if let Some(severity) = after.severity {
                flag.severity = severity;
            }
            if let Some(threshold_type) = after.threshold_type {
                flag.threshold_type = threshold_type;
            }
            if let Some(value) = after.threshold_value {
                flag.threshold_value = Some(value);
            }
            if let Some(enabled) = after.is_enabled {
                flag.is_enabled = enabled;
            }
            if let Some(order) = after.sort_order {
                flag.sort_order = order;
            }
        }
        (RedFlagAction::Remove { .. }, Some(i)) => {
            content.red_flags.remove(i);
        }
        (RedFlagAction::Add { .. }, Some(_)) => {
            return Err(CoachError::InvalidInput(format!(
                "red flag '{key}' already exists"
            )))
        }
        (_, None) => {
            return Err(CoachError::InvalidInput(format!(
                "red flag '{key}' does not exist"
            )))
        }
    }
    Ok(())
}

/// Layer `changes` onto `content`. Category changes go first so that
/// criteria changes can address a category added by the same proposal.
pub fn apply_changes(content: &mut RubricContent, changes: &ProposedChanges) -> CoachResult<()> {
    for change in &changes.category_changes {
        apply_category(content, change)?;
    }
    for change in &changes.criteria_changes {
        apply_criterion(content, change)?;
    }
    for change in &changes.red_flag_changes {
        apply_red_flag(content, change)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{add_category, category, proposal, red_flag, remove_category, reweigh};
    use coach_db::sync::proposal::{NewRedFlag, RedFlagFields};
    use coach_db::rubric::models::{Severity, ThresholdType};

    fn base() -> RubricContent {
        RubricContent {
            categories: vec![category("discovery", 60.0, 0), category("closing", 40.0, 1)],
            red_flags: vec![red_flag("misrepresentation")],
        }
    }

    fn criterion(slug: &str, score: i32, action: CriterionAction) -> CriterionChange {
        CriterionChange {
            category_slug: slug.to_string(),
            score,
            reason: "script wording".to_string(),
            confidence: 0.9,
            action,
        }
    }

    #[test]
    fn select_partitions_by_key() {
        let p = proposal(vec![
            reweigh("discovery", 60.0, 50.0),
            add_category("rapport", 10.0),
            remove_category("closing"),
        ]);
        let keys = ApprovedChangeKeys {
            category_changes: vec!["rapport:add".to_string()],
            ..ApprovedChangeKeys::default()
        };

        let (approved, rejected) = select(&p, &keys).unwrap();
        assert_eq!(approved.category_changes.len(), 1);
        assert_eq!(approved.category_changes[0].key(), "rapport:add");
        assert_eq!(rejected.category_changes.len(), 2);
    }

    #[test]
    fn select_rejects_unknown_keys() {
        let p = proposal(vec![reweigh("discovery", 60.0, 50.0)]);
        let keys = ApprovedChangeKeys {
            category_changes: vec!["discovery:remove".to_string()],
            ..ApprovedChangeKeys::default()
        };
        let err = select(&p, &keys).unwrap_err();
        assert!(matches!(err, CoachError::InvalidInput(ref m) if m.contains("discovery:remove")));
    }

    #[test]
    fn empty_selection_leaves_content_unchanged() {
        let p = proposal(vec![reweigh("discovery", 60.0, 50.0)]);
        let (approved, rejected) = select(&p, &ApprovedChangeKeys::default()).unwrap();
        assert!(approved.is_empty());
        assert_eq!(rejected.len(), 1);

        let mut content = base();
        apply_changes(&mut content, &approved).unwrap();
        assert_eq!(content, base());
    }

    #[test]
    fn modify_overwrites_only_named_fields() {
        let mut content = base();
        apply_changes(&mut content, &proposal(vec![reweigh("discovery", 60.0, 45.0)])).unwrap();
        let discovery = &content.categories[0];
        assert_eq!(discovery.weight, 45.0);
        assert_eq!(discovery.name, "discovery");
        assert_eq!(discovery.criteria.len(), 5);
    }

    #[test]
    fn add_appends_after_existing_order() {
        let mut content = base();
        apply_changes(&mut content, &proposal(vec![add_category("rapport", 0.0)])).unwrap();
        let added = content.categories.last().unwrap();
        assert_eq!(added.slug, "rapport");
        assert_eq!(added.sort_order, 2);
    }

    #[test]
    fn add_of_existing_slug_is_invalid() {
        let mut content = base();
        let err = apply_changes(&mut content, &proposal(vec![add_category("closing", 5.0)]));
        assert!(matches!(err, Err(CoachError::InvalidInput(_))));
    }

    #[test]
    fn remove_of_missing_category_is_invalid() {
        let mut content = base();
        let err = apply_changes(&mut content, &proposal(vec![remove_category("rapport")]));
        assert!(matches!(err, Err(CoachError::InvalidInput(_))));
    }

    #[test]
    fn criteria_can_target_a_category_added_in_the_same_proposal() {
        let mut content = base();
        let changes = ProposedChanges {
            category_changes: vec![add_category("rapport", 0.0)],
            criteria_changes: vec![criterion(
                "rapport",
                3,
                CriterionAction::Add {
                    after: "Uses the customer's name".to_string(),
                },
            )],
            ..ProposedChanges::default()
        };
        apply_changes(&mut content, &changes).unwrap();
        let rapport = content.categories.iter().find(|c| c.slug == "rapport").unwrap();
        assert_eq!(rapport.criteria.len(), 1);
        assert_eq!(rapport.criteria[0].score, 3);
    }

    #[test]
    fn criterion_modify_and_remove() {
        let mut content = base();
        let changes = ProposedChanges {
            criteria_changes: vec![
                criterion(
                    "closing",
                    5,
                    CriterionAction::Modify {
                        before: None,
                        after: "Secures a verbal commitment".to_string(),
                    },
                ),
                criterion("closing", 1, CriterionAction::Remove { before: None }),
            ],
            ..ProposedChanges::default()
        };
        apply_changes(&mut content, &changes).unwrap();

        let closing = &content.categories[1];
        assert_eq!(closing.criteria.len(), 4);
        assert_eq!(closing.criteria[0].score, 2);
        assert_eq!(closing.criteria[3].description, "Secures a verbal commitment");
    }

    #[test]
    fn red_flag_changes_apply_in_place() {
        let mut content = base();
        let changes = ProposedChanges {
            red_flag_changes: vec![
                RedFlagChange {
                    flag_key: "misrepresentation".to_string(),
                    reason: "downgraded".to_string(),
                    confidence: 0.5,
                    action: RedFlagAction::Modify {
                        before: RedFlagFields::default(),
                        after: RedFlagFields {
                            severity: Some(Severity::High),
                            ..RedFlagFields::default()
                        },
                    },
                },
                RedFlagChange {
                    flag_key: "talk-over".to_string(),
                    reason: "script warns against interrupting".to_string(),
                    confidence: 0.75,
                    action: RedFlagAction::Add {
                        after: NewRedFlag {
                            display_name: "Talks over customer".to_string(),
                            description: None,
                            severity: Severity::Medium,
                            threshold_type: ThresholdType::Percentage,
                            threshold_value: Some(20.0),
                            is_enabled: true,
                            sort_order: None,
                        },
                    },
                },
            ],
            ..ProposedChanges::default()
        };
        apply_changes(&mut content, &changes).unwrap();

        assert_eq!(content.red_flags.len(), 2);
        assert_eq!(content.red_flags[0].severity, Severity::High);
        assert_eq!(content.red_flags[1].flag_key, "talk-over");
        assert_eq!(content.red_flags[1].sort_order, 1);
    }
}
