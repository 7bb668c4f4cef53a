//! The conversation controller - one state machine per (document chunk, PII type).
//!
//! The meta-expert model decides which phase runs next; the controller owns
//! the phase history, the bounded transcript and the working finding set,
//! and coerces decisions that would loop or skip a required review.
//!
//! ```text
//! Start -> Extracting -> (Verification <-> IssueSolving)* -> End
//! ```

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{ExtractionError, Result};
use crate::pipeline::author::PromptAuthor;
use crate::pipeline::cache::{fingerprint, PromptCache, PromptKey};
use crate::pipeline::parser::{parse_instructions, parse_next_step, response_section};
use crate::pipeline::prompts::PromptLibrary;
use crate::pipeline::refiner::PromptRefiner;
use crate::pipeline::strategy::{ExtractionStrategy, WorkUnit};
use crate::traits::llm::LlmClient;
use crate::types::config::ExtractionConfig;
use crate::types::conversation::{Transcript, Turn};
use crate::types::finding::{Finding, FindingRecord, Review, VerificationVerdict};
use crate::types::person::PersonDirectory;
use crate::types::phase::{Phase, PhaseHistory, TransitionContext};
use crate::types::pii::PiiType;
use crate::types::prompt::{GeneratedPrompt, Instructions, PromptKind};

/// Shared handles for running conversations.
///
/// Cheap to clone; every conversation of a batch shares the same cache,
/// templates and model clients.
#[derive(Clone)]
pub struct Orchestrator {
    /// Serves the meta-expert and the phase experts
    expert: Arc<dyn LlmClient>,
    author: Arc<PromptAuthor>,
    cache: Arc<PromptCache>,
    library: Arc<PromptLibrary>,
    config: Arc<ExtractionConfig>,
}

impl Orchestrator {
    /// `expert` runs the conversation; `creator` writes and refines prompts.
    /// Both may be the same client.
    pub fn new(
        expert: Arc<dyn LlmClient>,
        creator: Arc<dyn LlmClient>,
        library: PromptLibrary,
        config: ExtractionConfig,
    ) -> Self {
        let library = Arc::new(library);
        let refiner = PromptRefiner::new(
            creator.clone(),
            config.refiner.clone(),
            library.general.feedback.clone(),
            library.general.incorporate_feedback.clone(),
        );
        let author = PromptAuthor::new(creator, library.clone(), refiner, config.guidelines.clone());

        Self {
            expert,
            author: Arc::new(author),
            cache: Arc::new(PromptCache::from_config(&config.cache)),
            library,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn library(&self) -> &PromptLibrary {
        &self.library
    }

    pub fn cache(&self) -> &PromptCache {
        &self.cache
    }

    /// The client that runs conversations.
    pub(crate) fn expert(&self) -> &Arc<dyn LlmClient> {
        &self.expert
    }

    /// Prepare a conversation over one chunk of text.
    ///
    /// The PII type is bound to the strategy's category so templates and
    /// cache keys always agree.
    pub fn conversation(
        &self,
        strategy: Arc<dyn ExtractionStrategy>,
        document_id: impl Into<String>,
        text: impl Into<String>,
        mut pii: PiiType,
    ) -> ConversationController {
        if pii.category != strategy.category() {
            debug!(
                pii = %pii.name,
                declared = %pii.category,
                strategy = %strategy.category(),
                "Binding PII type to strategy category"
            );
            pii.category = strategy.category();
        }

        ConversationController {
            orchestrator: self.clone(),
            strategy,
            document_id: document_id.into(),
            text: text.into(),
            pii,
            history: PhaseHistory::new(),
            transcript: Transcript::new(self.config.transcript_retention),
            instructions: None,
            prompts: HashMap::new(),
            persons: PersonDirectory::new(),
            working: WorkingSet::Empty,
        }
    }
}

// =============================================================================
// Working set
// =============================================================================

/// The finding set the next phase operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkingSet {
    Empty,
    /// Fresh extraction output
    Proposed(Vec<Finding>),
    /// Output of the latest verification
    Reviewed(Review),
    /// Accepted findings merged with corrections
    Resolved(Vec<Finding>),
}

impl WorkingSet {
    fn context(&self) -> TransitionContext {
        TransitionContext {
            awaiting_review: matches!(self, Self::Proposed(_) | Self::Resolved(_)),
            reviewed: matches!(self, Self::Reviewed(_)),
            unverified: matches!(self, Self::Proposed(findings) if !findings.is_empty()),
        }
    }

    /// Findings that still need a verdict.
    fn pending(&self) -> &[Finding] {
        match self {
            Self::Proposed(findings) | Self::Resolved(findings) => findings,
            Self::Empty | Self::Reviewed(_) => &[],
        }
    }
}

/// Result of a finished conversation.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    pub document_id: String,
    pub pii: String,
    pub records: Vec<FindingRecord>,
    pub history: PhaseHistory,
    /// Every phase prompt used, in first-use order
    pub prompts: Vec<GeneratedPrompt>,
    /// Turns exchanged with the meta-expert, evicted ones included
    pub transcript_turns: usize,
}

impl ConversationOutcome {
    /// Records as a JSON list of single-key `{id: finding}` objects.
    pub fn records_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.records)?)
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Drives one conversation from `Start` to `End`.
pub struct ConversationController {
    orchestrator: Orchestrator,
    strategy: Arc<dyn ExtractionStrategy>,
    document_id: String,
    text: String,
    pii: PiiType,
    history: PhaseHistory,
    transcript: Transcript,
    instructions: Option<Instructions>,
    prompts: HashMap<PromptKind, GeneratedPrompt>,
    persons: PersonDirectory,
    working: WorkingSet,
}

impl ConversationController {
    pub fn history(&self) -> &PhaseHistory {
        &self.history
    }

    /// Run every phase until `End`.
    ///
    /// Any error is fatal for this conversation only.
    #[instrument(
        skip(self),
        fields(document_id = %self.document_id, pii = %self.pii.name, category = %self.pii.category)
    )]
    pub async fn run(mut self) -> Result<ConversationOutcome> {
        let deadline = self.orchestrator.config.phase_timeout_secs;
        while !self.history.current().is_terminal() {
            let phase = self.history.current();
            with_deadline(phase, deadline, self.step(phase)).await?;
        }
        Ok(self.finish())
    }

    async fn step(&mut self, phase: Phase) -> Result<()> {
        let summary = match phase {
            Phase::Start => return self.start().await,
            Phase::End => return Ok(()),
            Phase::Extracting => {
                self.refresh_persons().await?;
                self.extracting().await?
            }
            Phase::Verification => {
                self.refresh_persons().await?;
                self.verification().await?
            }
            Phase::IssueSolving => {
                self.refresh_persons().await?;
                self.issue_solving().await?
            }
        };
        self.advance(phase, &summary).await
    }

    async fn refresh_persons(&mut self) -> Result<()> {
        self.persons = self.strategy.load_persons(&self.document_id).await?;
        Ok(())
    }

    fn unit(&self) -> WorkUnit<'_> {
        WorkUnit {
            document_id: &self.document_id,
            text: &self.text,
            pii: &self.pii,
            persons: &self.persons,
        }
    }

    /// Ask the meta-expert for instructions and prepare the extraction prompt.
    async fn start(&mut self) -> Result<()> {
        let templates = self.orchestrator.library.category(self.pii.category);
        let request = format!("<pii>{}</pii>", self.pii.to_prompt_json());
        let reply = self
            .orchestrator
            .expert
            .ask(&templates.meta_expert, &request)
            .await?;
        let instructions = parse_instructions(&reply)?;
        debug!(job = %instructions.job_description, "Meta-expert instructions received");

        self.transcript.push(Turn::user(request));
        self.transcript.push(Turn::assistant(instructions.to_json_string()));
        self.instructions = Some(instructions);

        self.ensure_prompt(PromptKind::Extracting).await?;
        self.history.push(Phase::Extracting);
        info!(from = %Phase::Start, to = %Phase::Extracting, "Phase transition");
        Ok(())
    }

    async fn extracting(&mut self) -> Result<Value> {
        let prompt = self.ensure_prompt(PromptKind::Extracting).await?;
        let findings = self
            .strategy
            .extract(self.orchestrator.expert.as_ref(), &prompt, &self.unit())
            .await?;
        info!(findings = findings.len(), "Extraction finished");

        let summary = records_value(&findings)?;
        self.working = WorkingSet::Proposed(findings);
        Ok(summary)
    }

    async fn verification(&mut self) -> Result<Value> {
        let findings = self.working.pending().to_vec();
        let prompt = self.ensure_prompt(PromptKind::Verifying).await?;
        let verdicts = self
            .strategy
            .verify(self.orchestrator.expert.as_ref(), &prompt, &self.unit(), &findings)
            .await?;
        let review = self.strategy.categorize(&findings, &verdicts)?;
        info!(
            accepted = review.accepted.len(),
            rejected = review.rejected.len(),
            "Verification finished"
        );

        self.working = WorkingSet::Reviewed(review);
        Ok(verdicts_value(&verdicts))
    }

    async fn issue_solving(&mut self) -> Result<Value> {
        let review = match &self.working {
            WorkingSet::Reviewed(review) => review.clone(),
            _ => Review::default(),
        };
        let prompt = self.ensure_prompt(PromptKind::Issue).await?;
        let merged = self
            .strategy
            .correct(self.orchestrator.expert.as_ref(), &prompt, &self.unit(), &review)
            .await?;
        info!(
            findings = merged.len(),
            dropped = review.rejected.len(),
            "Issue solving finished"
        );

        let summary = records_value(&merged)?;
        self.working = WorkingSet::Resolved(merged);
        Ok(summary)
    }

    /// Report a finished phase and let the meta-expert pick the next one.
    async fn advance(&mut self, phase: Phase, summary: &Value) -> Result<()> {
        let library = &self.orchestrator.library;
        let templates = library.category(self.pii.category);
        let response = summary.to_string();

        let expert = self
            .instructions
            .as_ref()
            .map(|i| i.job_description.as_str())
            .unwrap_or("expert");
        let report = library.render_next_instruction(expert, phase.token(), &response);
        let section = response_section(&report).unwrap_or(&response);
        let decision_request = library.render_next_step(phase.token(), section);
        self.transcript.push(Turn::user(report.clone()));

        let reply = self
            .orchestrator
            .expert
            .ask(&templates.meta_expert_next_step, &decision_request)
            .await?;
        let decision = parse_next_step(&reply)?;

        let transition = self.history.transition(
            decision,
            &self.working.context(),
            &self.orchestrator.config.limits,
        );
        if let Some(reason) = transition.coerced {
            warn!(
                requested = decision.token(),
                next = %transition.next,
                reason,
                "Phase decision coerced"
            );
        }
        info!(from = %phase, to = %transition.next, "Phase transition");
        self.history.push(transition.next);

        if !transition.next.is_terminal() {
            let reply = self
                .orchestrator
                .expert
                .send(&templates.meta_expert, &self.transcript.meta_window())
                .await?;
            let instructions = parse_instructions(&reply)?;
            self.transcript.push(Turn::assistant(instructions.to_json_string()));
            self.instructions = Some(instructions);
        }
        Ok(())
    }

    /// Prompt text for `kind`, generated and cached on first use.
    async fn ensure_prompt(&mut self, kind: PromptKind) -> Result<String> {
        if let Some(prompt) = self.prompts.get(&kind) {
            return Ok(prompt.text.clone());
        }

        let instructions = self.instructions.clone().ok_or_else(|| {
            ExtractionError::protocol("meta-expert instructions before prompt generation", "")
        })?;
        let author = self.orchestrator.author.clone();
        let guidelines = author.guidelines(kind).await?;
        let fingerprint = fingerprint(&self.pii, kind, guidelines.as_deref());
        let key = PromptKey::new(self.pii.category, self.pii.name.clone(), kind);
        let force = self.orchestrator.config.cache.force_regenerate;

        let pii = &self.pii;
        let prompt = self
            .orchestrator
            .cache
            .get_or_generate(&key, &fingerprint, force, move || async move {
                author
                    .author(pii, kind, &instructions, guidelines.as_deref())
                    .await
            })
            .await?;
        debug!(kind = %kind, origin = ?prompt.origin, "Phase prompt ready");

        let text = prompt.text.clone();
        self.prompts.insert(kind, prompt);
        Ok(text)
    }

    fn finish(self) -> ConversationOutcome {
        let findings = match self.working {
            WorkingSet::Reviewed(review) => review.accepted,
            WorkingSet::Resolved(findings) => findings,
            WorkingSet::Proposed(findings) => {
                if !findings.is_empty() {
                    warn!(
                        dropped = findings.len(),
                        "Conversation ended before verification; dropping unverified findings"
                    );
                }
                Vec::new()
            }
            WorkingSet::Empty => Vec::new(),
        };
        info!(
            records = findings.len(),
            steps = self.history.len(),
            "Conversation finished"
        );

        let mut prompts: Vec<GeneratedPrompt> = self.prompts.into_values().collect();
        prompts.sort_by_key(|p| PromptKind::ALL.iter().position(|k| *k == p.kind));

        ConversationOutcome {
            document_id: self.document_id,
            pii: self.pii.name,
            records: findings.into_iter().map(FindingRecord).collect(),
            history: self.history,
            prompts,
            transcript_turns: self.transcript.total(),
        }
    }
}

/// Await `fut`, failing with [`ExtractionError::PhaseTimeout`] after `seconds`.
async fn with_deadline<T>(
    phase: Phase,
    seconds: Option<u64>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match seconds {
        Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds), fut)
            .await
            .map_err(|_| ExtractionError::PhaseTimeout { phase, seconds })?,
        None => fut.await,
    }
}

fn records_value(findings: &[Finding]) -> Result<Value> {
    let records: Vec<FindingRecord> = findings.iter().cloned().map(FindingRecord).collect();
    Ok(serde_json::to_value(records)?)
}

fn verdicts_value(verdicts: &[VerificationVerdict]) -> Value {
    let map: Map<String, Value> = verdicts
        .iter()
        .map(|v| {
            (
                v.finding_id.to_string(),
                json!({ "bool": v.accepted, "reasoning": v.reasoning }),
            )
        })
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::strategy::IndependentStrategy;
    use crate::testing::ScriptedLlm;
    use crate::types::phase::RoundLimits;

    const INSTRUCTIONS: &str =
        r#"{"job description": "Date of birth expert", "instructions": ["find dates of birth"]}"#;

    fn dob() -> PiiType {
        PiiType::new("date_of_birth", "The date a person was born").with_example("12.05.1980")
    }

    fn scripted(library: &PromptLibrary) -> ScriptedLlm {
        let t = &library.independent;
        ScriptedLlm::new()
            .with_reply(t.meta_expert.clone(), INSTRUCTIONS)
            .with_reply(t.extracting_generation.clone(), "EXTRACT DATES")
            .with_reply(t.extracting_examples.clone(), "born 12.05.1980")
            .with_reply(t.verifying_generation.clone(), "VERIFY DATES")
            .with_reply(t.verifying_examples.clone(), "verified 12.05.1980")
            .with_reply(
                "EXTRACT DATES",
                r#"{"extracted_information": [{"identifier": "12.05.1980", "context": "born on 12.05.1980", "reasoning": "birth date"}]}"#,
            )
            .with_reply("VERIFY DATES", r#"{"bool": true, "reasoning": "explicit birth date"}"#)
    }

    fn orchestrator(llm: ScriptedLlm, config: ExtractionConfig) -> (Orchestrator, Arc<ScriptedLlm>) {
        let llm = Arc::new(llm);
        let orchestrator = Orchestrator::new(llm.clone(), llm.clone(), PromptLibrary::builtin(), config);
        (orchestrator, llm)
    }

    #[test]
    fn test_working_set_context() {
        assert_eq!(WorkingSet::Empty.context(), TransitionContext::default());
        let proposed = WorkingSet::Proposed(vec![Finding::new("x")]);
        assert!(proposed.context().awaiting_review);
        assert_eq!(proposed.pending().len(), 1);
        assert!(proposed.context().unverified);
        assert!(!WorkingSet::Proposed(Vec::new()).context().unverified);
        assert!(!WorkingSet::Resolved(vec![Finding::new("x")]).context().unverified);
        let reviewed = WorkingSet::Reviewed(Review::default());
        assert!(reviewed.context().reviewed);
        assert!(reviewed.pending().is_empty());
    }

    #[tokio::test]
    async fn test_meta_expert_sees_bounded_window() {
        let dir = tempfile::tempdir().unwrap();
        let library = PromptLibrary::builtin();
        let llm = scripted(&library).with_replies(
            library.independent.meta_expert_next_step.clone(),
            [r#"{'Next': 'verification'}"#, r#"{"Next": "end"}"#],
        );
        let (orchestrator, llm) =
            orchestrator(llm, ExtractionConfig::default().with_cache_root(dir.path()));

        let outcome = orchestrator
            .conversation(Arc::new(IndependentStrategy), "doc-1", "Born on 12.05.1980.", dob())
            .run()
            .await
            .unwrap();

        assert_eq!(
            outcome.history.as_slice(),
            [Phase::Start, Phase::Extracting, Phase::Verification, Phase::End]
        );
        for call in llm.calls_matching(&library.independent.meta_expert) {
            assert!(call.turns.len() <= crate::types::conversation::META_EXPERT_WINDOW);
        }
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_end_right_after_extraction_still_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let library = PromptLibrary::builtin();
        let t = &library.independent;
        let llm = ScriptedLlm::new()
            .with_reply(t.meta_expert.clone(), INSTRUCTIONS)
            .with_reply(t.meta_expert_next_step.clone(), r#"{"Next": "end"}"#)
            .with_reply(t.extracting_generation.clone(), "EXTRACT DATES")
            .with_reply(t.extracting_examples.clone(), "born 12.05.1980")
            .with_reply(t.verifying_generation.clone(), "VERIFY DATES")
            .with_reply(t.verifying_examples.clone(), "verified 12.05.1980")
            .with_reply(
                "EXTRACT DATES",
                r#"{"extracted_information": [{"identifier": "not-a-date", "context": "Born on 12.05.1980.", "reasoning": "guess"}]}"#,
            )
            .with_reply("VERIFY DATES", r#"{"bool": false, "reasoning": "not a date"}"#);
        let (orchestrator, llm) =
            orchestrator(llm, ExtractionConfig::default().with_cache_root(dir.path()));

        let outcome = orchestrator
            .conversation(Arc::new(IndependentStrategy), "doc-1", "Born on 12.05.1980.", dob())
            .run()
            .await
            .unwrap();

        assert_eq!(
            outcome.history.as_slice(),
            [Phase::Start, Phase::Extracting, Phase::Verification, Phase::End]
        );
        assert_eq!(llm.calls_matching("VERIFY DATES").len(), 1);
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn test_unverified_findings_are_dropped_without_budget() {
        let dir = tempfile::tempdir().unwrap();
        let library = PromptLibrary::builtin();
        let llm = scripted(&library).with_reply(
            library.independent.meta_expert_next_step.clone(),
            r#"{"Next": "end"}"#,
        );
        let limits = RoundLimits {
            max_verification_rounds: 0,
            ..Default::default()
        };
        let (orchestrator, llm) = orchestrator(
            llm,
            ExtractionConfig::default()
                .with_cache_root(dir.path())
                .with_limits(limits),
        );

        let outcome = orchestrator
            .conversation(Arc::new(IndependentStrategy), "doc-1", "Born on 12.05.1980.", dob())
            .run()
            .await
            .unwrap();

        assert_eq!(
            outcome.history.as_slice(),
            [Phase::Start, Phase::Extracting, Phase::End]
        );
        assert!(llm.calls_matching("VERIFY DATES").is_empty());
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn test_missing_phase_token_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let library = PromptLibrary::builtin();
        let llm = scripted(&library).with_reply(
            library.independent.meta_expert_next_step.clone(),
            "Let us verify the findings next.",
        );
        let (orchestrator, _) =
            orchestrator(llm, ExtractionConfig::default().with_cache_root(dir.path()));

        let err = orchestrator
            .conversation(Arc::new(IndependentStrategy), "doc-1", "Born on 12.05.1980.", dob())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::ProtocolViolation { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_looping_model_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let library = PromptLibrary::builtin();
        let llm = scripted(&library).with_reply(
            library.independent.meta_expert_next_step.clone(),
            r#"{"Next": "extracting"}"#,
        );
        let limits = RoundLimits {
            max_steps: 6,
            ..Default::default()
        };
        let (orchestrator, _) = orchestrator(
            llm,
            ExtractionConfig::default()
                .with_cache_root(dir.path())
                .with_limits(limits),
        );

        let outcome = orchestrator
            .conversation(Arc::new(IndependentStrategy), "doc-1", "Born on 12.05.1980.", dob())
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.history.current(), Phase::End);
        assert!(outcome.history.len() <= 6);
    }

    #[tokio::test]
    async fn test_deadline_turns_into_timeout() {
        let err = with_deadline(Phase::Verification, Some(1), std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::PhaseTimeout { phase: Phase::Verification, seconds: 1 }
        ));
        assert!(!err.is_retryable());

        assert_eq!(with_deadline(Phase::Start, None, async { Ok(7) }).await.unwrap(), 7);
    }
}
