use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity card served by `GET /info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub instance_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Which change-proposal backend this instance talks to.
    pub analyzer: String,
}

impl ServiceInfo {
    pub fn new(name: &str, analyzer: &str) -> Self {
        Self {
            name: name.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            instance_id: Uuid::new_v4(),
            started_at: Utc::now(),
            analyzer: analyzer.to_owned(),
        }
    }
}
