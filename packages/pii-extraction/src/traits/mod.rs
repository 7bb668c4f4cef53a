//! Trait seams to the outside world.
//!
//! The orchestrator only needs a chat-completion transport and three
//! persistence operations; applications implement these traits to plug in
//! their model provider and graph database.

pub mod llm;
pub mod store;
