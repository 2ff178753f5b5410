//! In-process agent orchestration core.
//!
//! Independent logical workers ("agents") exchange structured messages,
//! request/response pairs, and broadcasts over a central [`MessageBus`];
//! an [`AgentManager`] starts, tracks, and shuts them down in a defined
//! order; and a prioritized [`ReplayBuffer`] retains a sample of the
//! traffic for later replay and analysis.
//!
//! Delivery is in-process and at-most-once, but the envelope serializes
//! losslessly so the contracts stay transport-agnostic.

pub mod agent;
pub mod config;
pub mod error;
pub mod manager;
pub mod messaging;
pub mod replay;

pub use agent::{Agent, AgentContext, AgentKind, AgentRegistry, AgentState, AgentStatus};
pub use config::{AgentSpec, BusConfig, ManagerConfig, MeshConfig, ReplayConfig};
pub use error::{MeshError, Result};
pub use manager::{AgentManager, AgentStatusReport, ReplayTap, COORDINATOR_ID};
pub use messaging::{
    AgentMessage, BusStats, EventKind, MessageBus, MessageHandler, MessageMetadata,
    MessagePayload, Priority, ResponseBody, SubscriptionId, BROADCAST,
};
pub use replay::{ExperienceEntry, Outcome, ReplayBuffer, ReplayBufferStats};
