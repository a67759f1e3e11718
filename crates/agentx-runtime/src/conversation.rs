//! Conversation records: which container and session an image resolves to.

use std::collections::HashMap;

use agentx_core::DriverConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub image_id: String,
    pub container_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ConversationRecord {
    pub fn new(
        image_id: impl Into<String>,
        container_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            container_id: container_id.into(),
            session_id: session_id.into(),
            name: None,
            model: None,
            system_prompt: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn driver_config(&self, agent_id: &str) -> DriverConfig {
        DriverConfig {
            agent_id: agent_id.to_string(),
            session_id: self.session_id.clone(),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
        }
    }
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn load(&self, image_id: &str) -> Result<Option<ConversationRecord>>;
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    records: RwLock<HashMap<String, ConversationRecord>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: ConversationRecord) {
        self.records
            .write()
            .await
            .insert(record.image_id.clone(), record);
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn load(&self, image_id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.records.read().await.get(image_id).cloned())
    }
}
