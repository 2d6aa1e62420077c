//! Fixtures shared by the unit tests of this crate.

use uuid::Uuid;

use coach_db::memory::MemoryStore;
use coach_db::rubric::models::{
    CategoryInput, CriterionInput, NewRubricConfig, RedFlagInput, RubricConfigWithRelations,
    RubricUpdate, Severity, ThresholdType,
};
use coach_db::rubric::repositories::RubricRepository;
use coach_db::scripts::models::NewSalesScript;
use coach_db::scripts::repositories::ScriptRepository;
use coach_db::sync::proposal::{
    CategoryAction, CategoryChange, CategoryFields, NewCategory, ProposedChanges,
};

pub const SLUGS: [&str; 4] = ["discovery", "presentation", "objection-handling", "closing"];

pub fn category(slug: &str, weight: f64, sort_order: i32) -> CategoryInput {
    CategoryInput {
        name: slug.replace('-', " "),
        slug: slug.to_string(),
        description: None,
        weight,
        sort_order,
        is_enabled: true,
        criteria: (1..=5)
            .map(|score| CriterionInput {
                score,
                description: format!("{slug} level {score}"),
            })
            .collect(),
    }
}

pub fn red_flag(key: &str) -> RedFlagInput {
    RedFlagInput {
        flag_key: key.to_string(),
        display_name: key.replace('-', " "),
        description: None,
        severity: Severity::Critical,
        threshold_type: ThresholdType::Boolean,
        threshold_value: None,
        is_enabled: true,
        sort_order: 0,
    }
}

/// A draft with one category per weight, slugs taken from `SLUGS`.
pub async fn draft_with_weights(store: &MemoryStore, weights: &[f64]) -> Uuid {
    let draft = store
        .create_draft(NewRubricConfig {
            name: "Call quality".to_string(),
            ..NewRubricConfig::default()
        })
        .await
        .unwrap();

    let categories = weights
        .iter()
        .enumerate()
        .map(|(i, w)| category(SLUGS[i], *w, i as i32))
        .collect();
    store
        .update_draft(
            draft.config.id,
            RubricUpdate {
                categories: Some(categories),
                red_flags: Some(vec![red_flag("misrepresentation")]),
                ..RubricUpdate::default()
            },
        )
        .await
        .unwrap();

    draft.config.id
}

pub async fn seed_active(store: &MemoryStore, weights: &[f64]) -> RubricConfigWithRelations {
    let id = draft_with_weights(store, weights).await;
    let expected = store.active_id().await.unwrap();
    store.promote(id, expected, None).await.unwrap().unwrap();
    RubricRepository::get_by_id(store, id).await.unwrap().unwrap()
}

pub async fn upload_script(store: &MemoryStore, content: &str) -> Uuid {
    store
        .upload(NewSalesScript {
            product_type: "aca".to_string(),
            name: "ACA opener".to_string(),
            content: content.to_string(),
        })
        .await
        .unwrap()
        .id
}

pub fn reweigh(slug: &str, before: f64, after: f64) -> CategoryChange {
    CategoryChange {
        slug: slug.to_string(),
        reason: format!("script emphasis on {slug} changed"),
        confidence: 0.8,
        action: CategoryAction::Modify {
            before: CategoryFields {
                weight: Some(before),
                ..CategoryFields::default()
            },
            after: CategoryFields {
                weight: Some(after),
                ..CategoryFields::default()
            },
        },
    }
}

pub fn add_category(slug: &str, weight: f64) -> CategoryChange {
    CategoryChange {
        slug: slug.to_string(),
        reason: format!("script introduces {slug}"),
        confidence: 0.7,
        action: CategoryAction::Add {
            after: NewCategory {
                name: slug.replace('-', " "),
                description: None,
                weight,
                is_enabled: true,
                sort_order: None,
                criteria: vec![],
            },
        },
    }
}

pub fn remove_category(slug: &str) -> CategoryChange {
    CategoryChange {
        slug: slug.to_string(),
        reason: format!("script no longer covers {slug}"),
        confidence: 0.6,
        action: CategoryAction::Remove {
            before: CategoryFields::default(),
        },
    }
}

pub fn proposal(category_changes: Vec<CategoryChange>) -> ProposedChanges {
    ProposedChanges {
        category_changes,
        ..ProposedChanges::default()
    }
}
