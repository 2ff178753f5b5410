//! Lifecycle orchestration and the bus-to-replay-buffer tap.

mod lifecycle;
mod tap;

pub use lifecycle::{AgentManager, AgentStatusReport, COORDINATOR_ID};
pub use tap::ReplayTap;
