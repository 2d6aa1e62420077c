use coach_db::rubric::models::{CategoryInput, RedFlagInput};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateRubricRequest {
    pub name: String,
    pub description: Option<String>,
    pub clone_from_id: Option<Uuid>,
    /// `false` activates the new config straight away.
    pub is_draft: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRubricRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub categories: Option<Vec<CategoryInput>>,
    pub red_flags: Option<Vec<RedFlagInput>>,
}
