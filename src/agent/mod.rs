//! Agent capability interface, constructor registry, and built-in shells.

mod coordinator;
mod core;
mod registry;
mod service;

pub use coordinator::CoordinatorAgent;
pub use core::{Agent, AgentContext, AgentState, AgentStatus};
pub use registry::{AgentKind, AgentRegistry};
pub use service::ServiceAgent;
