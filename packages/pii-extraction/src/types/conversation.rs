//! Conversation turns and the bounded transcript kept by a controller.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of trailing turns the meta-expert sees when asked for new
/// instructions or the next phase.
pub const META_EXPERT_WINDOW: usize = 6;

/// Speaker of a turn. System prompts are passed separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only transcript that retains at most `max_retained` turns.
///
/// Older turns are evicted first; the number of evicted turns is kept so
/// the audit trail still reports the true conversation length.
#[derive(Debug, Clone)]
pub struct Transcript {
    turns: VecDeque<Turn>,
    max_retained: usize,
    evicted: usize,
}

impl Transcript {
    /// Create a transcript. Retention never drops below the meta-expert window.
    pub fn new(max_retained: usize) -> Self {
        let max_retained = max_retained.max(META_EXPERT_WINDOW);
        Self {
            turns: VecDeque::with_capacity(max_retained),
            max_retained,
            evicted: 0,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        if self.turns.len() == self.max_retained {
            self.turns.pop_front();
            self.evicted += 1;
        }
        self.turns.push_back(turn);
    }

    /// The last `n` retained turns, oldest first.
    pub fn window(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    /// The turns the meta-expert is shown.
    pub fn meta_window(&self) -> Vec<Turn> {
        self.window(META_EXPERT_WINDOW)
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    /// Most recent assistant turn, if any is still retained.
    pub fn last_assistant(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == Role::Assistant)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Total turns ever pushed, evicted ones included.
    pub fn total(&self) -> usize {
        self.turns.len() + self.evicted
    }
}
