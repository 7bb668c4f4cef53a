//! Data types shared by the orchestrator, strategies and stores.

pub mod config;
pub mod conversation;
pub mod finding;
pub mod person;
pub mod phase;
pub mod pii;
pub mod prompt;
