//! Per-job agent: reachability probe, conversation state, and the
//! interaction loop.

pub mod agent_loop;
pub mod conversation;
pub mod job_runner;
pub mod probe;

pub use agent_loop::{Agent, AgentDeps};
pub use conversation::{ConversationContext, TiktokenCounter, TokenCounter};
pub use job_runner::AgentJobRunner;
pub use probe::ConnectivityProbe;
