//! Agent trait and supporting types.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::AgentKind;
use crate::error::Result;
use crate::messaging::MessageBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Created,
    Running,
    Stopped,
    Failed,
}

/// Self-reported agent status.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub detail: Value,
}

impl AgentStatus {
    pub fn new(state: AgentState) -> Self {
        Self {
            state,
            detail: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Everything an agent constructor receives: its id, the bus to register
/// with, and the configured settings passed through untouched.
#[derive(Clone)]
pub struct AgentContext {
    pub id: String,
    pub bus: Arc<MessageBus>,
    pub settings: Value,
}

/// Capability interface for lifecycle-managed agents.
///
/// These are the only methods the orchestration core depends on; any
/// further behavior (message handling, domain logic) is opaque and flows
/// through the bus.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> AgentKind;

    /// Register with the bus and get ready to receive messages.
    async fn initialize(&self) -> Result<()>;

    /// Detach from the bus and release resources.
    async fn shutdown(&self) -> Result<()>;

    fn status(&self) -> AgentStatus;
}
