//! Agent lifecycle orchestration.
//!
//! The manager starts the privileged coordinator first, starts and stops
//! named agent instances, announces lifecycle transitions to the
//! coordinator through the bus, and owns the replay buffer fed from all bus
//! traffic via [`ReplayTap`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::tap::ReplayTap;
use crate::agent::{Agent, AgentContext, AgentKind, AgentRegistry, AgentStatus};
use crate::config::{AgentSpec, MeshConfig};
use crate::error::{MeshError, Result};
use crate::messaging::{AgentMessage, MessageBus, MessagePayload, SubscriptionId};
use crate::replay::{ReplayBuffer, ReplayBufferStats};

/// Reserved id of the privileged coordinator: started first, stopped last,
/// notified of every other agent's lifecycle transitions.
pub const COORDINATOR_ID: &str = "mcp";

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusReport {
    pub id: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
}

pub struct AgentManager {
    bus: Arc<MessageBus>,
    registry: AgentRegistry,
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
    buffer: Arc<ReplayBuffer>,
    tap: Mutex<Option<SubscriptionId>>,
    configured: HashMap<String, AgentSpec>,
    shutdown_timeout: Duration,
    ready: AtomicBool,
}

impl AgentManager {
    /// Build a manager and install its replay tap on the bus. The agent
    /// table from `config.manager` is captured here and consumed by
    /// [`initialize`](Self::initialize).
    pub fn new(bus: Arc<MessageBus>, registry: AgentRegistry, config: &MeshConfig) -> Self {
        let buffer = Arc::new(ReplayBuffer::new(config.replay.clone()));
        let tap = bus.add_tap(Arc::new(ReplayTap::new(buffer.clone())));
        Self {
            bus,
            registry,
            agents: RwLock::new(HashMap::new()),
            buffer,
            tap: Mutex::new(Some(tap)),
            configured: config.manager.agents.clone(),
            shutdown_timeout: Duration::from_secs(config.manager.shutdown_timeout_secs),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn replay_buffer(&self) -> &Arc<ReplayBuffer> {
        &self.buffer
    }

    /// Start the coordinator, then every configured agent concurrently.
    ///
    /// An unknown kind string is recoverable: logged and skipped without
    /// affecting siblings. A startup failure is fatal and propagates, with
    /// `ready` left false.
    pub async fn initialize(&self) -> Result<()> {
        let coordinator_settings = self
            .configured
            .get(COORDINATOR_ID)
            .map(|spec| spec.settings.clone())
            .unwrap_or_else(|| json!({}));
        self.start_agent_inner(COORDINATOR_ID, AgentKind::Coordinator, coordinator_settings)
            .await?;

        let mut startups = Vec::new();
        for (id, spec) in &self.configured {
            if id == COORDINATOR_ID {
                continue;
            }
            let Some(kind) = AgentKind::parse(&spec.kind) else {
                error!(agent = %id, kind = %spec.kind, "unknown agent kind, skipping");
                continue;
            };
            if !self.registry.contains(kind) {
                error!(agent = %id, kind = %kind, "no constructor registered, skipping");
                continue;
            }
            startups.push(self.start_agent_inner(id, kind, spec.settings.clone()));
        }
        for result in join_all(startups).await {
            result?;
        }

        self.ready.store(true, Ordering::SeqCst);
        info!(agents = self.agent_count(), "agent manager ready");
        Ok(())
    }

    /// Start one agent. Idempotent: an existing id returns the live
    /// instance. Failures are caught at this boundary and reported as
    /// `None`.
    pub async fn start_agent(
        &self,
        id: &str,
        kind: AgentKind,
        settings: Value,
    ) -> Option<Arc<dyn Agent>> {
        match self.start_agent_inner(id, kind, settings).await {
            Ok(agent) => Some(agent),
            Err(e) => {
                error!(agent = %id, error = %e, "failed to start agent");
                None
            }
        }
    }

    async fn start_agent_inner(
        &self,
        id: &str,
        kind: AgentKind,
        settings: Value,
    ) -> Result<Arc<dyn Agent>> {
        if let Some(existing) = self.agents.read().get(id) {
            warn!(agent = %id, "agent already started");
            return Ok(existing.clone());
        }

        let agent = self
            .registry
            .build(
                kind,
                AgentContext {
                    id: id.to_string(),
                    bus: self.bus.clone(),
                    settings,
                },
            )
            .ok_or_else(|| {
                MeshError::Agent(format!("no constructor registered for kind '{kind}'"))
            })?;

        // Reserve the slot before awaiting initialize so a concurrent start
        // of the same id observes this instance instead of building another.
        {
            let mut agents = self.agents.write();
            if let Some(existing) = agents.get(id) {
                warn!(agent = %id, "agent already started");
                return Ok(existing.clone());
            }
            agents.insert(id.to_string(), agent.clone());
        }

        if let Err(e) = agent.initialize().await {
            self.agents.write().remove(id);
            return Err(MeshError::Agent(format!(
                "agent '{id}' failed to initialize: {e}"
            )));
        }

        if id != COORDINATOR_ID {
            self.notify_coordinator(id, "agentStarted").await;
        }
        info!(agent = %id, kind = %kind, "agent started");
        Ok(agent)
    }

    /// Stop one agent, bounding its `shutdown()` by the configured timeout.
    /// Returns `false` when the agent is unknown or its shutdown fails; a
    /// failed instance stays registered so the caller can retry.
    pub async fn stop_agent(&self, id: &str) -> bool {
        let Some(agent) = self.agents.read().get(id).cloned() else {
            warn!(agent = %id, "cannot stop unknown agent");
            return false;
        };

        if id != COORDINATOR_ID {
            self.notify_coordinator(id, "agentStopping").await;
        }

        match tokio::time::timeout(self.shutdown_timeout, agent.shutdown()).await {
            Ok(Ok(())) => {
                self.agents.write().remove(id);
                if id != COORDINATOR_ID {
                    self.notify_coordinator(id, "agentStopped").await;
                }
                info!(agent = %id, "agent stopped");
                true
            }
            Ok(Err(e)) => {
                error!(agent = %id, error = %e, "agent shutdown failed");
                false
            }
            Err(_) => {
                error!(
                    agent = %id,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "agent shutdown timed out"
                );
                false
            }
        }
    }

    /// Tear everything down: non-coordinator agents concurrently, then the
    /// coordinator last (it must stay reachable while the others announce
    /// their stop), then the replay tap. No-op unless ready; concurrent
    /// calls collapse to one.
    pub async fn shutdown(&self) {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return;
        }

        let peers: Vec<String> = self
            .agents
            .read()
            .keys()
            .filter(|id| *id != COORDINATOR_ID)
            .cloned()
            .collect();
        join_all(peers.iter().map(|id| self.stop_agent(id))).await;

        self.stop_agent(COORDINATOR_ID).await;

        if let Some(tap) = self.tap.lock().take() {
            self.bus.remove_tap(tap);
        }
        info!("agent manager shut down");
    }

    /// Every tracked agent's id, kind, and self-reported status, sorted by
    /// id.
    pub fn agent_status(&self) -> Vec<AgentStatusReport> {
        let mut reports: Vec<AgentStatusReport> = self
            .agents
            .read()
            .iter()
            .map(|(id, agent)| AgentStatusReport {
                id: id.clone(),
                kind: agent.kind(),
                status: agent.status(),
            })
            .collect();
        reports.sort_by(|a, b| a.id.cmp(&b.id));
        reports
    }

    pub fn replay_stats(&self) -> ReplayBufferStats {
        self.buffer.stats()
    }

    async fn notify_coordinator(&self, agent_id: &str, event: &str) {
        let message = AgentMessage::new(
            agent_id,
            COORDINATOR_ID,
            MessagePayload::Event {
                name: event.to_string(),
                data: json!({"agentId": agent_id}),
            },
        );
        self.bus.send_message(message).await;
    }
}
