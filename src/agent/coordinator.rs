//! Privileged coordinator agent.
//!
//! Tracks the roster of peer agents from the lifecycle events the manager
//! sends it (`agentStarted`, `agentStopping`, `agentStopped`) and answers
//! roster queries.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::core::{Agent, AgentContext, AgentState, AgentStatus};
use super::registry::AgentKind;
use crate::error::Result;
use crate::messaging::{
    AgentMessage, MessageBus, MessageHandler, MessagePayload, SubscriptionId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    Running,
    Stopping,
}

struct CoordinatorInner {
    id: String,
    bus: Arc<MessageBus>,
    state: Mutex<AgentState>,
    roster: Mutex<HashMap<String, PeerState>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

pub struct CoordinatorAgent {
    inner: Arc<CoordinatorInner>,
}

impl CoordinatorAgent {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                id: ctx.id,
                bus: ctx.bus,
                state: Mutex::new(AgentState::Created),
                roster: Mutex::new(HashMap::new()),
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn roster(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.inner.roster.lock().keys().cloned().collect();
        peers.sort();
        peers
    }
}

#[async_trait]
impl Agent for CoordinatorAgent {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Coordinator
    }

    async fn initialize(&self) -> Result<()> {
        self.inner.bus.register_agent(&self.inner.id);
        let subscription = self.inner.bus.subscribe_to_agent(
            &self.inner.id,
            Arc::new(CoordinatorInbox {
                inner: self.inner.clone(),
            }),
        );
        *self.inner.subscription.lock() = Some(subscription);
        *self.inner.state.lock() = AgentState::Running;
        debug!(agent = %self.inner.id, "coordinator initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(subscription) = self.inner.subscription.lock().take() {
            self.inner.bus.unsubscribe_from_agent(&self.inner.id, subscription);
        }
        self.inner.bus.unregister_agent(&self.inner.id);
        *self.inner.state.lock() = AgentState::Stopped;
        debug!(agent = %self.inner.id, "coordinator shut down");
        Ok(())
    }

    fn status(&self) -> AgentStatus {
        let roster = self.inner.roster.lock();
        let peers: Vec<&String> = roster.keys().collect();
        AgentStatus::new(*self.inner.state.lock())
            .with_detail(json!({"peers": peers, "peerCount": roster.len()}))
    }
}

struct CoordinatorInbox {
    inner: Arc<CoordinatorInner>,
}

impl CoordinatorInbox {
    fn apply_lifecycle_event(&self, name: &str, data: &Value) {
        let Some(agent_id) = data.get("agentId").and_then(Value::as_str) else {
            warn!(event = %name, "lifecycle event without agentId");
            return;
        };
        let mut roster = self.inner.roster.lock();
        match name {
            "agentStarted" => {
                roster.insert(agent_id.to_string(), PeerState::Running);
            }
            "agentStopping" => {
                roster.insert(agent_id.to_string(), PeerState::Stopping);
            }
            "agentStopped" => {
                roster.remove(agent_id);
            }
            _ => {}
        }
    }

    fn roster_body(&self) -> Value {
        let roster = self.inner.roster.lock();
        let mut agents: Vec<Value> = roster
            .iter()
            .map(|(id, state)| {
                json!({
                    "agentId": id,
                    "state": match state {
                        PeerState::Running => "running",
                        PeerState::Stopping => "stopping",
                    },
                })
            })
            .collect();
        agents.sort_by_key(|a| a["agentId"].as_str().unwrap_or_default().to_string());
        json!({"status": "success", "agents": agents})
    }
}

impl MessageHandler for CoordinatorInbox {
    fn handle<'a>(
        &'a self,
        message: &'a AgentMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match &message.payload {
                MessagePayload::Event { name, data } => {
                    self.apply_lifecycle_event(name, data);
                }
                MessagePayload::Query { name, .. } if message.requires_response => {
                    let body = if name == "roster" {
                        self.roster_body()
                    } else {
                        json!({"status": "success", "query": name})
                    };
                    let reply = AgentMessage::success_response(message, body);
                    self.inner.bus.send_message(reply).await;
                }
                _ => {}
            }
            Ok(())
        })
    }
}
