use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            _ => Err(format!("unknown red flag severity: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdType {
    #[default]
    Boolean,
    Percentage,
}

impl ThresholdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Percentage => "percentage",
        }
    }
}

impl FromStr for ThresholdType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "boolean" => Ok(Self::Boolean),
            "percentage" => Ok(Self::Percentage),
            _ => Err(format!("unknown threshold type: {value}")),
        }
    }
}

/// One version of the scoring rubric. `version` stays `None` until the
/// config is activated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricConfig {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<i32>,
    pub is_active: bool,
    pub is_draft: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringCriterion {
    pub id: Uuid,
    pub category_id: Uuid,
    pub score: i32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricCategory {
    pub id: Uuid,
    pub config_id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub weight: f64,
    pub sort_order: i32,
    pub is_enabled: bool,
    pub criteria: Vec<ScoringCriterion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricRedFlag {
    pub id: Uuid,
    pub config_id: Uuid,
    pub flag_key: String,
    pub display_name: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub threshold_type: ThresholdType,
    pub threshold_value: Option<f64>,
    pub is_enabled: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricConfigWithRelations {
    #[serde(flatten)]
    pub config: RubricConfig,
    pub categories: Vec<RubricCategory>,
    pub red_flags: Vec<RubricRedFlag>,
}

impl RubricConfigWithRelations {
    /// Editable snapshot of the children, without row identities.
    pub fn content(&self) -> RubricContent {
        RubricContent {
            categories: self.categories.iter().map(CategoryInput::from).collect(),
            red_flags: self.red_flags.iter().map(RedFlagInput::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricVersionSummary {
    pub id: Uuid,
    pub name: String,
    pub version: Option<i32>,
    pub is_active: bool,
    pub is_draft: bool,
    pub category_count: i64,
    pub red_flag_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Inputs ──────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionInput {
    pub score: i32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryInput {
    pub name: String,
    /// Derived from `name` when left empty.
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    pub weight: f64,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub criteria: Vec<CriterionInput>,
}

impl From<&RubricCategory> for CategoryInput {
    fn from(category: &RubricCategory) -> Self {
        Self {
            name: category.name.clone(),
            slug: category.slug.clone(),
            description: category.description.clone(),
            weight: category.weight,
            sort_order: category.sort_order,
            is_enabled: category.is_enabled,
            criteria: category
                .criteria
                .iter()
                .map(|c| CriterionInput {
                    score: c.score,
                    description: c.description.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedFlagInput {
    pub flag_key: String,
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
    pub sort_order: i32,
}

impl From<&RubricRedFlag> for RedFlagInput {
    fn from(flag: &RubricRedFlag) -> Self {
        Self {
            flag_key: flag.flag_key.clone(),
            display_name: flag.display_name.clone(),
            description: flag.description.clone(),
            severity: flag.severity,
            threshold_type: flag.threshold_type,
            threshold_value: flag.threshold_value,
            is_enabled: flag.is_enabled,
            sort_order: flag.sort_order,
        }
    }
}

/// The mutable body of a rubric: everything a draft owns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RubricContent {
    pub categories: Vec<CategoryInput>,
    pub red_flags: Vec<RedFlagInput>,
}

impl RubricContent {
    /// Fill in slugs left empty by the caller.
    pub fn normalize(&mut self) {
        for category in &mut self.categories {
            if category.slug.trim().is_empty() {
                category.slug = slug::slugify(&category.name);
            }
        }
    }

    /// Materialise the content as rows owned by `config_id`. Every row,
    /// criteria included, gets a fresh identifier.
    pub fn instantiate(
        &self,
        config_id: Uuid,
        now: DateTime<Utc>,
    ) -> (Vec<RubricCategory>, Vec<RubricRedFlag>) {
        let categories = self
            .categories
            .iter()
            .map(|input| {
                let id = Uuid::new_v4();
                let mut criteria: Vec<ScoringCriterion> = input
                    .criteria
                    .iter()
                    .map(|c| ScoringCriterion {
                        id: Uuid::new_v4(),
                        category_id: id,
                        score: c.score,
                        description: c.description.clone(),
                    })
                    .collect();
                criteria.sort_by_key(|c| c.score);

                RubricCategory {
                    id,
                    config_id,
                    name: input.name.clone(),
                    slug: input.slug.clone(),
                    description: input.description.clone(),
                    weight: input.weight,
                    sort_order: input.sort_order,
                    is_enabled: input.is_enabled,
                    criteria,
                    created_at: now,
                    updated_at: now,
                }
            })
            .collect();

        let red_flags = self
            .red_flags
            .iter()
            .map(|input| RubricRedFlag {
                id: Uuid::new_v4(),
                config_id,
                flag_key: input.flag_key.clone(),
                display_name: input.display_name.clone(),
                description: input.description.clone(),
                severity: input.severity,
                threshold_type: input.threshold_type,
                threshold_value: input.threshold_value,
                is_enabled: input.is_enabled,
                sort_order: input.sort_order,
                created_at: now,
                updated_at: now,
            })
            .collect();

        (categories, red_flags)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRubricConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub clone_from_id: Option<Uuid>,
}

/// Partial update of a draft. Child lists, when present, replace the
/// draft's current children wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RubricUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<CategoryInput>>,
    #[serde(default)]
    pub red_flags: Option<Vec<RedFlagInput>>,
}

impl RubricUpdate {
    pub fn from_content(content: RubricContent) -> Self {
        Self {
            categories: Some(content.categories),
            red_flags: Some(content.red_flags),
            ..Self::default()
        }
    }
}

/// Display order for children: `sort_order`, then name.
pub fn sort_categories(categories: &mut [RubricCategory]) {
    categories.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
    });
}

pub fn sort_red_flags(flags: &mut [RubricRedFlag]) {
    flags.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.flag_key.cmp(&b.flag_key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, slug: &str, weight: f64) -> CategoryInput {
        CategoryInput {
            name: name.to_string(),
            slug: slug.to_string(),
            description: None,
            weight,
            sort_order: 0,
            is_enabled: true,
            criteria: vec![
                CriterionInput {
                    score: 5,
                    description: "excellent".to_string(),
                },
                CriterionInput {
                    score: 1,
                    description: "poor".to_string(),
                },
            ],
        }
    }

    #[test]
    fn severity_round_trips_through_str() {
        for s in [Severity::Critical, Severity::High, Severity::Medium] {
            assert_eq!(Severity::from_str(s.as_str()).unwrap(), s);
        }
        assert!(Severity::from_str("low").is_err());
    }

    #[test]
    fn normalize_derives_missing_slug_from_name() {
        let mut content = RubricContent {
            categories: vec![category("Objection Handling", "", 50.0)],
            red_flags: vec![],
        };
        content.normalize();
        assert_eq!(content.categories[0].slug, "objection-handling");
    }

    #[test]
    fn instantiate_assigns_fresh_ids_and_parents() {
        let content = RubricContent {
            categories: vec![category("Rapport", "rapport", 40.0)],
            red_flags: vec![RedFlagInput {
                flag_key: "misrepresentation".to_string(),
                display_name: "Misrepresentation".to_string(),
                description: None,
                severity: Severity::Critical,
                threshold_type: ThresholdType::Boolean,
                threshold_value: None,
                is_enabled: true,
                sort_order: 0,
            }],
        };
        let config_id = Uuid::new_v4();
        let (first, flags) = content.instantiate(config_id, Utc::now());
        let (second, _) = content.instantiate(config_id, Utc::now());

        assert_eq!(first[0].config_id, config_id);
        assert_eq!(flags[0].config_id, config_id);
        assert_ne!(first[0].id, second[0].id);
        assert!(first[0].criteria.iter().all(|c| c.category_id == first[0].id));
        // criteria come back ordered by score
        assert_eq!(first[0].criteria[0].score, 1);
    }

    #[test]
    fn category_input_defaults_enabled_when_omitted() {
        let input: CategoryInput =
            serde_json::from_value(serde_json::json!({ "name": "Closing", "weight": 20 }))
                .unwrap();
        assert!(input.is_enabled);
        assert!(input.slug.is_empty());
        assert_eq!(input.weight, 20.0);
    }
}
