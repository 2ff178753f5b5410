//! Handler trait for receiving bus-dispatched messages.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::message::AgentMessage;
use crate::error::Result;

/// Trait for handling messages dispatched by the bus.
///
/// Handlers are invoked inline during dispatch and awaited before the
/// submitting `send_message` call returns; a handler that sends a response
/// before returning has that response already routable. Handler errors are
/// logged by the bus, never propagated to the sender.
pub trait MessageHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        message: &'a AgentMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Type alias for shared message handlers.
pub type BoxedHandler = Arc<dyn MessageHandler>;

/// Opaque token returned by subscribe operations; detach by handing it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}
