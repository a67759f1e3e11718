//! Driver abstraction.
//!
//! A driver turns one [`UserMessage`] into a finite, non-restartable stream of
//! [`StreamEvent`]s from some LLM provider. Concrete drivers (Claude, OpenAI,
//! ...) live outside this workspace.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::message::UserMessage;
use crate::stream::StreamEvent;

pub type StreamEventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// What a factory needs to know to build a driver for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    pub agent_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver identifier (e.g., "claude", "openai").
    fn name(&self) -> &str;

    async fn initialize(&self) -> anyhow::Result<()>;

    /// Start answering `message`. The driver should stop producing events once
    /// `cancel` fires, but must still end the stream.
    async fn receive(
        &self,
        message: &UserMessage,
        cancel: CancellationToken,
    ) -> anyhow::Result<StreamEventStream>;

    /// Ask the provider to stop the current response. Advisory.
    fn interrupt(&self);

    async fn dispose(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self, config: &DriverConfig) -> anyhow::Result<Arc<dyn Driver>>;
}
