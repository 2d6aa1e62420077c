use coach_db::scripts::models::ScriptFilter;
use coach_rubric::ApprovedChangeKeys;
use serde::Deserialize;

/// Query string of `GET /scripts`. With `active=true` only the active
/// script of `product_type` is returned.
#[derive(Debug, Default, Deserialize)]
pub struct ListScriptsQuery {
    pub product_type: Option<String>,
    #[serde(default)]
    pub active: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<ListScriptsQuery> for ScriptFilter {
    fn from(query: ListScriptsQuery) -> Self {
        Self {
            product_type: query.product_type.map(|p| p.trim().to_lowercase()),
            limit: query.limit,
            offset: query.offset,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadScriptRequest {
    pub product_type: String,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApplyChangesRequest {
    #[serde(default)]
    pub approved_category_changes: Vec<String>,
    #[serde(default)]
    pub approved_criteria_changes: Vec<String>,
    #[serde(default)]
    pub approved_red_flag_changes: Vec<String>,
}

impl From<ApplyChangesRequest> for ApprovedChangeKeys {
    fn from(req: ApplyChangesRequest) -> Self {
        Self {
            category_changes: req.approved_category_changes,
            criteria_changes: req.approved_criteria_changes,
            red_flag_changes: req.approved_red_flag_changes,
        }
    }
}
