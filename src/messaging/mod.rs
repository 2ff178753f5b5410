//! Inter-agent messaging: envelope, handler trait, and the central bus.
//!
//! ```text
//! ┌─────────────┐   send_message    ┌────────────┐   handlers   ┌─────────────┐
//! │   Agent A   │──────────────────▶│ MessageBus │─────────────▶│   Agent B   │
//! └─────────────┘                   │  (routing) │              └─────────────┘
//!                                   └─────┬──────┘
//!                                         │ taps
//!                                         ▼
//!                                  ┌──────────────┐
//!                                  │ ReplayBuffer │
//!                                  └──────────────┘
//! ```

mod bus;
mod handler;
mod message;

pub use bus::{BusStats, MessageBus};
pub use handler::{BoxedHandler, MessageHandler, SubscriptionId};
pub use message::{
    AgentMessage, EventKind, MessageMetadata, MessagePayload, Priority, ResponseBody,
    ResponseError, BROADCAST,
};
