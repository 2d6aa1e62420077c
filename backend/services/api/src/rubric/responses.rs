use coach_db::rubric::models::{RubricConfigWithRelations, RubricVersionSummary};
use coach_rubric::validation::WeightValidation;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RubricResponse {
    pub data: RubricConfigWithRelations,
    pub weights: WeightValidation,
}

#[derive(Debug, Serialize)]
pub struct ActiveRubricResponse {
    pub data: Option<RubricConfigWithRelations>,
}

#[derive(Debug, Serialize)]
pub struct VersionListResponse {
    pub data: Vec<RubricVersionSummary>,
    pub count: usize,
}
