//! Index naming and provisioning

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::client::{DocumentStore, StoreError};

/// How the target index name is derived from the agent name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexPolicy {
    /// Always the agent name
    Static,
    /// `{name}-{yyyy}-{mm}-{dd}`, rotating daily (UTC)
    #[default]
    Daily,
}

impl IndexPolicy {
    pub fn index_name_at(&self, agent_name: &str, now: DateTime<Utc>) -> String {
        match self {
            IndexPolicy::Static => agent_name.to_string(),
            IndexPolicy::Daily => format!(
                "{}-{}-{:02}-{:02}",
                agent_name,
                now.year(),
                now.month(),
                now.day()
            ),
        }
    }

    /// Index name for the current moment
    pub fn index_name(&self, agent_name: &str) -> String {
        self.index_name_at(agent_name, Utc::now())
    }
}

/// Field mapping shared by index creation and mapping updates
pub fn mapping_properties() -> Value {
    json!({
        "properties": {
            "@timestamp": { "type": "date" },
            "meter": {
                "properties": {
                    "timestamp": { "type": "date" },
                    "value": { "type": "double" },
                    "unit": { "type": "text" },
                    "operationID": { "type": "keyword" },
                    "name": { "type": "text" },
                    "appendix": { "type": "text" }
                }
            },
            "log": {
                "properties": {
                    "timestamp": { "type": "date" },
                    "value": { "type": "text" }
                }
            }
        }
    })
}

/// Full body for creating the index
pub fn index_body() -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": mapping_properties()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    Updated,
}

/// Make sure `index` exists with the agent's mapping.
///
/// Creates the index when absent, otherwise reconciles the mapping. If
/// another agent creates the index between the existence check and the
/// create call, the mapping update path is taken instead.
pub async fn ensure_index(
    store: &dyn DocumentStore,
    index: &str,
) -> Result<Provisioned, StoreError> {
    if !store.index_exists(index).await? {
        tracing::info!(index = %index, "creating index");
        match store.create_index(index, &index_body()).await {
            Ok(()) => return Ok(Provisioned::Created),
            Err(StoreError::AlreadyExists(_)) => {
                tracing::info!(index = %index, "index created concurrently, updating mapping");
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(index = %index, "updating index mapping");
    store.put_mapping(index, &mapping_properties()).await?;
    Ok(Provisioned::Updated)
}
