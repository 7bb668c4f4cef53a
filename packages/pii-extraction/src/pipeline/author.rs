//! Turns meta-expert instructions into finished phase prompts.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{ExtractionError, Result};
use crate::pipeline::prompts::{PromptLibrary, EXAMPLE_MARKER};
use crate::pipeline::refiner::PromptRefiner;
use crate::traits::llm::LlmClient;
use crate::types::config::GuidelinesConfig;
use crate::types::pii::PiiType;
use crate::types::prompt::{Instructions, PromptKind};

/// Drafts, refines and illustrates phase prompts with the prompt-creator model.
#[derive(Clone)]
pub struct PromptAuthor {
    llm: Arc<dyn LlmClient>,
    library: Arc<PromptLibrary>,
    refiner: PromptRefiner,
    guidelines: GuidelinesConfig,
}

impl PromptAuthor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        library: Arc<PromptLibrary>,
        refiner: PromptRefiner,
        guidelines: GuidelinesConfig,
    ) -> Self {
        Self {
            llm,
            library,
            refiner,
            guidelines,
        }
    }

    /// Guideline text configured for a prompt kind.
    pub async fn guidelines(&self, kind: PromptKind) -> Result<Option<String>> {
        let Some(path) = self.guidelines.path(kind) else {
            return Ok(None);
        };
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            ExtractionError::Config(format!("cannot read guidelines {}: {e}", path.display()))
        })?;
        Ok(Some(text))
    }

    /// Write the prompt for one phase.
    #[instrument(skip_all, fields(pii = %pii.name, kind = %kind))]
    pub async fn author(
        &self,
        pii: &PiiType,
        kind: PromptKind,
        instructions: &Instructions,
        guidelines: Option<&str>,
    ) -> Result<String> {
        let payload = generation_payload(pii, instructions, guidelines);
        let system = self.library.generation(pii.category, kind);
        let draft = self.llm.ask(system, &payload.to_string()).await?;
        debug!(chars = draft.len(), "Prompt drafted");

        let refined = self.refiner.refine(&draft).await?;
        let prompt = self.with_examples(pii, kind, &refined.prompt).await?;
        info!(rounds = refined.rounds, "Prompt authored");
        Ok(prompt)
    }

    async fn with_examples(&self, pii: &PiiType, kind: PromptKind, prompt: &str) -> Result<String> {
        let examples = match self.library.example_generation(pii.category, kind) {
            Some(system) => {
                let user = format!(
                    "<prompt>{prompt}</prompt>\n<example_list>{}</example_list>",
                    Value::from(pii.examples.clone())
                );
                self.llm.ask(system, &user).await?.replace(EXAMPLE_MARKER, "")
            }
            None => self.library.category(pii.category).issue_examples.clone(),
        };
        Ok(format!("{prompt}\n## Examples\n{examples}"))
    }
}

/// JSON handed to the prompt creator.
pub fn generation_payload(pii: &PiiType, instructions: &Instructions, guidelines: Option<&str>) -> Value {
    let mut payload = json!({
        "job description": instructions.job_description,
        "instructions": instructions.instructions,
        "pii": pii.name,
        "description of pii": pii.description,
        "examples": pii.examples,
    });
    if let Some(guidelines) = guidelines {
        payload["guidelines"] = Value::from(guidelines);
    }
    payload
}
