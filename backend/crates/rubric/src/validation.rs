use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use coach_common::error::{CoachError, CoachResult};
use coach_db::rubric::models::{CategoryInput, RubricCategory, RubricContent, ThresholdType};

pub const WEIGHT_TARGET: f64 = 100.0;
pub const WEIGHT_TOLERANCE: f64 = 0.01;

/// Anything that contributes a weight to the rubric total.
pub trait Weighted {
    fn weight(&self) -> f64;
    fn is_enabled(&self) -> bool;
}

impl Weighted for RubricCategory {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn is_enabled(&self) -> bool {
        self.is_enabled
    }
}

impl Weighted for CategoryInput {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn is_enabled(&self) -> bool {
        self.is_enabled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightValidation {
    pub is_valid: bool,
    pub total: f64,
    /// Points left to allocate; negative when over-allocated.
    pub remaining: f64,
    pub message: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Check that the weights of enabled categories add up to 100.
pub fn validate<C: Weighted>(categories: &[C]) -> WeightValidation {
    let total: f64 = categories
        .iter()
        .filter(|c| c.is_enabled())
        .map(Weighted::weight)
        .sum();
    let remaining = WEIGHT_TARGET - total;
    let is_valid = remaining.abs() < WEIGHT_TOLERANCE;

    let message = if is_valid {
        "weights are fully allocated".to_string()
    } else if remaining > 0.0 {
        format!("{}% remaining to allocate", round2(remaining))
    } else {
        format!("{}% over allocation", round2(-remaining))
    };

    WeightValidation {
        is_valid,
        total: round2(total),
        remaining: round2(remaining),
        message,
    }
}

/// Structural checks on rubric content that hold for drafts as well as
/// active versions. Weight totals are not checked here; drafts may be
/// saved while still unbalanced.
pub fn check_content(content: &RubricContent) -> CoachResult<()> {
    let mut slugs = HashSet::new();
    for category in &content.categories {
        if category.name.trim().is_empty() {
            return Err(CoachError::InvalidInput(
                "category name must not be empty".into(),
            ));
        }
        if category.slug.trim().is_empty() {
            return Err(CoachError::InvalidInput(format!(
                "category '{}' has an empty slug",
                category.name
            )));
        }
        if !slugs.insert(category.slug.as_str()) {
            return Err(CoachError::InvalidInput(format!(
                "duplicate category slug: {}",
                category.slug
            )));
        }
        if !category.weight.is_finite() || !(0.0..=WEIGHT_TARGET).contains(&category.weight) {
            return Err(CoachError::InvalidInput(format!(
                "category '{}' weight must be between 0 and 100, got {}",
                category.slug, category.weight
            )));
        }

        let mut scores = HashSet::new();
        for criterion in &category.criteria {
            if !scores.insert(criterion.score) {
                return Err(CoachError::InvalidInput(format!(
                    "category '{}' has more than one criterion for score {}",
                    category.slug, criterion.score
                )));
            }
        }
    }

    let mut keys = HashSet::new();
    for flag in &content.red_flags {
        if flag.flag_key.trim().is_empty() {
            return Err(CoachError::InvalidInput(
                "red flag key must not be empty".into(),
            ));
        }
        if !keys.insert(flag.flag_key.as_str()) {
            return Err(CoachError::InvalidInput(format!(
                "duplicate red flag key: {}",
                flag.flag_key
            )));
        }
        if flag.threshold_type == ThresholdType::Percentage {
            match flag.threshold_value {
                Some(v) if v.is_finite() && (0.0..=100.0).contains(&v) => {}
                other => {
                    return Err(CoachError::InvalidInput(format!(
                        "red flag '{}' needs a percentage threshold between 0 and 100, got {other:?}",
                        flag.flag_key
                    )))
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_db::rubric::models::{CriterionInput, RedFlagInput, Severity};

    fn cat(slug: &str, weight: f64, enabled: bool) -> CategoryInput {
        CategoryInput {
            name: slug.to_string(),
            slug: slug.to_string(),
            description: None,
            weight,
            sort_order: 0,
            is_enabled: enabled,
            criteria: vec![],
        }
    }

    #[test]
    fn sixty_forty_is_valid() {
        let result = validate(&[cat("a", 60.0, true), cat("b", 40.0, true)]);
        assert!(result.is_valid);
        assert_eq!(result.total, 100.0);
        assert_eq!(result.remaining, 0.0);
    }

    #[test]
    fn disabled_categories_are_not_counted() {
        let result = validate(&[
            cat("a", 60.0, true),
            cat("b", 30.0, false),
            cat("c", 10.0, false),
        ]);
        assert!(!result.is_valid);
        assert_eq!(result.total, 60.0);
        assert_eq!(result.remaining, 40.0);
        assert_eq!(result.message, "40% remaining to allocate");
    }

    #[test]
    fn over_allocation_names_the_excess() {
        let result = validate(&[cat("a", 70.0, true), cat("b", 45.5, true)]);
        assert!(!result.is_valid);
        assert_eq!(result.remaining, -15.5);
        assert_eq!(result.message, "15.5% over allocation");
    }

    #[test]
    fn tolerance_absorbs_float_noise() {
        let thirds = [
            cat("a", 33.333, true),
            cat("b", 33.333, true),
            cat("c", 33.334, true),
        ];
        assert!(validate(&thirds).is_valid);
        assert!(!validate(&[cat("a", 99.98, true)]).is_valid);
    }

    #[test]
    fn empty_rubric_is_invalid() {
        let result = validate::<CategoryInput>(&[]);
        assert!(!result.is_valid);
        assert_eq!(result.remaining, 100.0);
    }

    #[test]
    fn duplicate_slugs_are_rejected() {
        let content = RubricContent {
            categories: vec![cat("rapport", 50.0, true), cat("rapport", 50.0, true)],
            red_flags: vec![],
        };
        let err = check_content(&content).unwrap_err();
        assert!(matches!(err, CoachError::InvalidInput(ref m) if m.contains("rapport")));
    }

    #[test]
    fn duplicate_criterion_scores_are_rejected() {
        let mut category = cat("closing", 100.0, true);
        category.criteria = vec![
            CriterionInput {
                score: 3,
                description: "ok".into(),
            },
            CriterionInput {
                score: 3,
                description: "also ok".into(),
            },
        ];
        let content = RubricContent {
            categories: vec![category],
            red_flags: vec![],
        };
        assert!(matches!(
            check_content(&content),
            Err(CoachError::InvalidInput(_))
        ));
    }

    #[test]
    fn out_of_range_weight_is_rejected() {
        let content = RubricContent {
            categories: vec![cat("a", 120.0, true)],
            red_flags: vec![],
        };
        assert!(check_content(&content).is_err());
    }

    #[test]
    fn percentage_flag_needs_threshold() {
        let flag = RedFlagInput {
            flag_key: "talk-ratio".into(),
            display_name: "Talk ratio".into(),
            description: None,
            severity: Severity::High,
            threshold_type: ThresholdType::Percentage,
            threshold_value: None,
            is_enabled: true,
            sort_order: 0,
        };
        let mut content = RubricContent {
            categories: vec![],
            red_flags: vec![flag],
        };
        assert!(check_content(&content).is_err());

        content.red_flags[0].threshold_value = Some(70.0);
        assert!(check_content(&content).is_ok());
    }
}
