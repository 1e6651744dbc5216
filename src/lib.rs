//! SSHerlock runner: LLM-driven remote administration jobs over SSH.

pub mod agent;
pub mod config;
pub mod control_plane;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod llm;
pub mod remote;
