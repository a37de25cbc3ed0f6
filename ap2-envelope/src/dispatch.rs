//! Typed dispatch of an inbound `dataPart` to a registered handler (§4.2 step 7).

use crate::envelope::DataPartType;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a handler hands back to the envelope layer (§4.2 "Reply shape").
pub enum Reply {
    /// A plain value; the caller wraps it as a response envelope signed by
    /// the recipient.
    Value(Value),
    /// An A2A Artifact response, used when returning a collection such as
    /// multiple cart candidates.
    Artifact {
        artifact_name: String,
        data_type_key: DataPartType,
        artifact_data: Value,
    },
}

/// A typed handler for one `dataPart.type`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, payload: Value) -> Result<Reply>;
}

/// A registry mapping `dataPart.type` to the handler that serves it. Built
/// once at service startup and shared across requests.
#[derive(Default, Clone)]
pub struct Router {
    handlers: HashMap<DataPartType, Arc<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, data_type: DataPartType, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(data_type, handler);
        self
    }

    pub async fn dispatch(&self, data_type: DataPartType, payload: Value) -> Result<Reply> {
        let handler = self
            .handlers
            .get(&data_type)
            .ok_or_else(|| Error::NoHandler(data_type.as_str().to_string()))?;
        handler.handle(payload).await
    }
}

/// Wire shape of an Artifact response, serialised as the `dataPart.payload`
/// of the envelope sent back to the caller (§4.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ArtifactResponse {
    pub is_artifact: bool,
    pub artifact_name: String,
    pub data_type_key: String,
    pub artifact_data: Value,
}

impl From<Reply> for Option<ArtifactResponse> {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Artifact {
                artifact_name,
                data_type_key,
                artifact_data,
            } => Some(ArtifactResponse {
                is_artifact: true,
                artifact_name,
                data_type_key: data_type_key.as_str().to_string(),
                artifact_data,
            }),
            Reply::Value(_) => None,
        }
    }
}
