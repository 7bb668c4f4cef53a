//! Testing utilities including a scripted model.
//!
//! These are useful for testing applications that use the orchestrator
//! without making real LLM calls.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::error::{ExtractionError, Result};
use crate::traits::llm::LlmClient;
use crate::types::conversation::{Role, Turn};

/// A deterministic [`LlmClient`] for tests.
///
/// Replies are routed by substring. User routes are matched against the
/// last user turn and take precedence over system routes, which are matched
/// against the system prompt. Within each kind, routes are tried in the
/// order they were added. A route with several replies hands them out in
/// order and keeps repeating the last one.
#[derive(Default)]
pub struct ScriptedLlm {
    system_routes: Arc<RwLock<Vec<Route>>>,
    user_routes: Arc<RwLock<Vec<Route>>>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<LlmCall>>>,
}

struct Route {
    needle: String,
    replies: VecDeque<Reply>,
}

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// Record of a call made to the scripted model.
#[derive(Debug, Clone)]
pub struct LlmCall {
    pub system_prompt: String,
    pub turns: Vec<Turn>,
}

impl LlmCall {
    /// Content of the last user turn.
    pub fn last_user(&self) -> &str {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or("")
    }
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `reply` when the system prompt contains `needle`.
    pub fn with_reply(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.push_system(needle.into(), vec![Reply::Text(reply.into())]);
        self
    }

    /// Answer with `replies` in order when the system prompt contains `needle`.
    pub fn with_replies<I, S>(self, needle: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies = replies.into_iter().map(|r| Reply::Text(r.into())).collect();
        self.push_system(needle.into(), replies);
        self
    }

    /// Answer `reply` when the last user turn contains `needle`.
    pub fn with_user_reply(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.user_routes.write().unwrap().push(Route {
            needle: needle.into(),
            replies: VecDeque::from([Reply::Text(reply.into())]),
        });
        self
    }

    /// Fail with a transport error when the last user turn contains `needle`.
    pub fn with_user_failure(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.user_routes.write().unwrap().push(Route {
            needle: needle.into(),
            replies: VecDeque::from([Reply::Fail(message.into())]),
        });
        self
    }

    /// Fail with a transport error when the system prompt contains `needle`.
    pub fn with_failure(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.push_system(needle.into(), vec![Reply::Fail(message.into())]);
        self
    }

    fn push_system(&self, needle: String, replies: Vec<Reply>) {
        self.system_routes.write().unwrap().push(Route {
            needle,
            replies: replies.into(),
        });
    }

    /// Get all calls made to this model.
    pub fn calls(&self) -> Vec<LlmCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Calls whose system prompt contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> Vec<LlmCall> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.system_prompt.contains(needle))
            .cloned()
            .collect()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    fn next_reply(routes: &RwLock<Vec<Route>>, haystack: &str) -> Option<Reply> {
        let mut routes = routes.write().unwrap();
        let route = routes.iter_mut().find(|r| haystack.contains(&r.needle))?;
        if route.replies.len() > 1 {
            route.replies.pop_front()
        } else {
            route.replies.front().cloned()
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn send(&self, system_prompt: &str, turns: &[Turn]) -> Result<String> {
        let call = LlmCall {
            system_prompt: system_prompt.to_string(),
            turns: turns.to_vec(),
        };
        let last_user = call.last_user().to_string();
        self.calls.write().unwrap().push(call);

        let reply = Self::next_reply(&self.user_routes, &last_user)
            .or_else(|| Self::next_reply(&self.system_routes, system_prompt));

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(ExtractionError::AI(message.into())),
            None => {
                let excerpt: String = system_prompt.chars().take(80).collect();
                Err(ExtractionError::AI(
                    format!("no scripted reply for system prompt: {excerpt}").into(),
                ))
            }
        }
    }
}
