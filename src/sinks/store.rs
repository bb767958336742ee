use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{LeadSink, SinkDelivery, SinkError};
use crate::models::{LeadSubmission, SinkKind};
use crate::store::DocumentStore;

pub const NEW_LEAD_STATUS: &str = "new";

// Writes the lead into the leads collection; the store assigns id and createdAt
pub struct StoreSink {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl StoreSink {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }
}

pub fn lead_document(lead: &LeadSubmission) -> Result<Value, SinkError> {
    let mut document = serde_json::to_value(lead)
        .map_err(|e| SinkError::Rejected(format!("lead not serializable: {e}")))?;
    if let Some(fields) = document.as_object_mut() {
        fields.insert("status".to_string(), Value::from(NEW_LEAD_STATUS));
    }
    Ok(document)
}

#[async_trait]
impl LeadSink for StoreSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Store
    }

    async fn deliver(&self, lead: &LeadSubmission) -> Result<SinkDelivery, SinkError> {
        let id = self.store.insert(&self.collection, lead_document(lead)?).await?;
        Ok(SinkDelivery::Delivered(Some(id)))
    }
}
