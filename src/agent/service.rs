//! Generic service agent shell.
//!
//! Stands in for the specialized implementations (validation, compliance,
//! domain leads) at their interface boundary: registers with the bus, counts
//! inbound traffic, and answers response-requiring messages with a status
//! body. Domain logic lives outside this crate.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use super::core::{Agent, AgentContext, AgentState, AgentStatus};
use super::registry::AgentKind;
use crate::error::Result;
use crate::messaging::{
    AgentMessage, EventKind, MessageBus, MessageHandler, MessagePayload, SubscriptionId,
};

struct ServiceInner {
    id: String,
    kind: AgentKind,
    bus: Arc<MessageBus>,
    settings: Value,
    state: Mutex<AgentState>,
    handled: AtomicU64,
    subscription: Mutex<Option<SubscriptionId>>,
}

pub struct ServiceAgent {
    inner: Arc<ServiceInner>,
}

impl ServiceAgent {
    pub fn new(kind: AgentKind, ctx: AgentContext) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                id: ctx.id,
                kind,
                bus: ctx.bus,
                settings: ctx.settings,
                state: Mutex::new(AgentState::Created),
                handled: AtomicU64::new(0),
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn handled(&self) -> u64 {
        self.inner.handled.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Agent for ServiceAgent {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn kind(&self) -> AgentKind {
        self.inner.kind
    }

    async fn initialize(&self) -> Result<()> {
        self.inner.bus.register_agent(&self.inner.id);
        let subscription = self.inner.bus.subscribe_to_agent(
            &self.inner.id,
            Arc::new(ServiceInbox {
                inner: self.inner.clone(),
            }),
        );
        *self.inner.subscription.lock() = Some(subscription);
        *self.inner.state.lock() = AgentState::Running;
        debug!(agent = %self.inner.id, kind = %self.inner.kind, "service agent initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(subscription) = self.inner.subscription.lock().take() {
            self.inner.bus.unsubscribe_from_agent(&self.inner.id, subscription);
        }
        self.inner.bus.unregister_agent(&self.inner.id);
        *self.inner.state.lock() = AgentState::Stopped;
        debug!(agent = %self.inner.id, "service agent shut down");
        Ok(())
    }

    fn status(&self) -> AgentStatus {
        AgentStatus::new(*self.inner.state.lock()).with_detail(json!({
            "kind": self.inner.kind.as_str(),
            "handled": self.inner.handled.load(Ordering::Relaxed),
            "settings": self.inner.settings,
        }))
    }
}

struct ServiceInbox {
    inner: Arc<ServiceInner>,
}

impl MessageHandler for ServiceInbox {
    fn handle<'a>(
        &'a self,
        message: &'a AgentMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.inner.handled.fetch_add(1, Ordering::Relaxed);

            if message.requires_response && message.kind != EventKind::Response {
                let subject = match &message.payload {
                    MessagePayload::Command { name, .. } => name.clone(),
                    MessagePayload::Query { name, .. } => name.clone(),
                    MessagePayload::ValidationRequest { subject, .. } => subject.clone(),
                    MessagePayload::ComplianceRequest { subject, .. } => subject.clone(),
                    _ => String::new(),
                };
                let reply = AgentMessage::success_response(
                    message,
                    json!({
                        "status": "success",
                        "agent": self.inner.id,
                        "subject": subject,
                    }),
                );
                self.inner.bus.send_message(reply).await;
            }
            Ok(())
        })
    }
}
