use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::scripts::models::{NewSalesScript, SalesScript, ScriptFilter};
use coach_common::error::CoachResult;

#[async_trait]
pub trait ScriptRepository: Send + Sync {
    /// Store a new, inactive script as the next version of its product type.
    async fn upload(&self, script: NewSalesScript) -> CoachResult<SalesScript>;

    async fn get_by_id(&self, id: Uuid) -> CoachResult<Option<SalesScript>>;

    async fn get_active(&self, product_type: &str) -> CoachResult<Option<SalesScript>>;

    async fn list(&self, filter: ScriptFilter) -> CoachResult<Vec<SalesScript>>;

    /// Mark the script active and deactivate its product-type siblings.
    async fn activate(&self, id: Uuid) -> CoachResult<SalesScript>;

    async fn delete(&self, id: Uuid) -> CoachResult<()>;
}

#[async_trait]
impl<T: ScriptRepository + ?Sized> ScriptRepository for Arc<T> {
    async fn upload(&self, script: NewSalesScript) -> CoachResult<SalesScript> {
        (**self).upload(script).await
    }

    async fn get_by_id(&self, id: Uuid) -> CoachResult<Option<SalesScript>> {
        (**self).get_by_id(id).await
    }

    async fn get_active(&self, product_type: &str) -> CoachResult<Option<SalesScript>> {
        (**self).get_active(product_type).await
    }

    async fn list(&self, filter: ScriptFilter) -> CoachResult<Vec<SalesScript>> {
        (**self).list(filter).await
    }

    async fn activate(&self, id: Uuid) -> CoachResult<SalesScript> {
        (**self).activate(id).await
    }

    async fn delete(&self, id: Uuid) -> CoachResult<()> {
        (**self).delete(id).await
    }
}
