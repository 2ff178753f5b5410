//! Bridge between bus traffic and the replay buffer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::messaging::{AgentMessage, EventKind, MessageHandler, MessagePayload, Priority};
use crate::replay::ReplayBuffer;

/// Bus tap feeding the manager's replay buffer.
///
/// Commands, queries, events, and the other non-response kinds are retained
/// at a priority derived from message metadata; correlated responses close
/// the loop by recording the original message's outcome. Status updates are
/// ignored.
pub struct ReplayTap {
    buffer: Arc<ReplayBuffer>,
}

impl ReplayTap {
    pub fn new(buffer: Arc<ReplayBuffer>) -> Self {
        Self { buffer }
    }

    fn bucket_for(priority: Priority) -> usize {
        match priority {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl MessageHandler for ReplayTap {
    fn handle<'a>(
        &'a self,
        message: &'a AgentMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match message.kind {
                EventKind::Response => {
                    if let (Some(correlation_id), MessagePayload::Response(body)) =
                        (message.correlation_id, &message.payload)
                    {
                        self.buffer.update_outcome(correlation_id, body.success);
                    }
                }
                EventKind::StatusUpdate => {}
                _ => {
                    let bucket = Self::bucket_for(message.metadata.priority);
                    self.buffer.add(message.clone(), bucket);
                }
            }
            Ok(())
        })
    }
}
