//! Critique-and-revise loop for generated prompts.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::pipeline::parser::scores_satisfied;
use crate::traits::llm::LlmClient;
use crate::types::config::RefinerConfig;
use crate::types::conversation::Turn;

/// Hard upper bound on refinement rounds, whatever the configuration says.
pub const MAX_REFINEMENT_ROUNDS: usize = 5;

/// User turn requesting a critique of the latest revision.
pub const CRITIQUE_REQUEST: &str = "Please provide feedback on the new prompt.";

/// Outcome of refining one prompt.
#[derive(Debug, Clone)]
pub struct Refinement {
    /// The last revision before the final critique.
    pub prompt: String,

    /// Every model reply in order: critique, revision, critique, ...
    pub responses: Vec<String>,

    /// Revise-and-critique rounds performed.
    pub rounds: usize,
}

/// Improves a draft prompt until every critique score reaches the cutoff.
///
/// One initial critique is followed by rounds of "incorporate the feedback"
/// and "critique the new prompt". At least one round runs when enabled.
#[derive(Clone)]
pub struct PromptRefiner {
    llm: Arc<dyn LlmClient>,
    config: RefinerConfig,
    feedback_prompt: String,
    incorporate_request: String,
}

impl PromptRefiner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        config: RefinerConfig,
        feedback_prompt: impl Into<String>,
        incorporate_request: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            config,
            feedback_prompt: feedback_prompt.into(),
            incorporate_request: incorporate_request.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn refine(&self, draft: &str) -> Result<Refinement> {
        if !self.config.enabled {
            return Ok(Refinement {
                prompt: draft.to_string(),
                responses: Vec::new(),
                rounds: 0,
            });
        }

        let max_rounds = self.config.max_rounds.clamp(1, MAX_REFINEMENT_ROUNDS);
        let mut turns = vec![Turn::user(format!("<prompt>{draft}</prompt>"))];
        let mut responses = vec![self.llm.send(&self.feedback_prompt, &turns).await?];
        debug!(critique = %responses[0], "Initial critique");

        let mut rounds = 0;
        let mut satisfied = false;
        while !satisfied && rounds < max_rounds {
            rounds += 1;

            turns.push(Turn::assistant(responses[responses.len() - 1].clone()));
            turns.push(Turn::user(self.incorporate_request.clone()));
            let revision = self.llm.send(&self.feedback_prompt, &turns).await?;
            responses.push(revision.clone());

            turns.push(Turn::assistant(revision));
            turns.push(Turn::user(CRITIQUE_REQUEST));
            let critique = self.llm.send(&self.feedback_prompt, &turns).await?;
            satisfied = scores_satisfied(&critique, self.config.score_cutoff);
            debug!(round = rounds, satisfied, "Refinement critique");
            responses.push(critique);
        }

        info!(rounds, satisfied, "Prompt refinement finished");
        Ok(Refinement {
            prompt: responses[responses.len() - 2].clone(),
            responses,
            rounds,
        })
    }
}
