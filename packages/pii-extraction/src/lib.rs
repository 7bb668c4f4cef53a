//! LLM-driven PII extraction orchestrator
//!
//! Extracts personally identifiable information from text through a
//! multi-phase conversation in which a meta-expert model decides what
//! happens next.
//!
//! # Design Philosophy
//!
//! **"The model decides, the controller bounds"**
//!
//! - Phase transitions are chosen by the model and coerced by a pure
//!   transition function when they would loop or skip a review
//! - Every phase prompt is authored by a model once and cached on disk
//! - Every finding is verified by its own request
//! - Library handles mechanics, the application supplies transport and storage
//!
//! # Usage
//!
//! ```rust,ignore
//! use pii_extraction::{Document, DocumentExtractor, MemoryStore, Orchestrator, PromptLibrary};
//!
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = Orchestrator::new(expert, creator, PromptLibrary::builtin(), config);
//! let extractor = DocumentExtractor::new(orchestrator, store.clone(), store.clone());
//!
//! let report = extractor.run(&Document::new("doc-1", text), &pii_types).await;
//! println!("{}", store.snapshot()?);
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams to the outside world (LlmClient, FindingStore, PersonStore)
//! - [`types`] - Phases, findings, persons, PII catalog and configuration
//! - [`pipeline`] - Conversation controller, strategies, person recognition, prompt authoring and caching
//! - [`stores`] - Storage implementations (MemoryStore)
//! - [`testing`] - Scripted model for tests

pub mod error;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "openai")]
pub mod ai;

// Re-export core types at crate root
pub use error::{ExtractionError, Result};
pub use pipeline::{
    ConversationController, ConversationOutcome, Document, DocumentExtractor, DocumentReport,
    ExtractionStrategy, IndependentStrategy, Orchestrator, PersonCentricStrategy, PersonExtractor,
    PersonRecognitionStrategy, PromptCache, PromptLibrary,
};
pub use stores::MemoryStore;
pub use traits::{
    llm::LlmClient,
    store::{FindingStore, PersonStore},
};
pub use types::{
    config::{CacheConfig, ChunkingConfig, ExtractionConfig, GuidelinesConfig, RefinerConfig, StalePolicy},
    conversation::{Role, Transcript, Turn, META_EXPERT_WINDOW},
    finding::{Finding, FindingId, FindingRecord, RejectedFinding, Review, VerificationVerdict},
    person::{Person, PersonDirectory, PersonNames},
    phase::{NextStep, Phase, PhaseHistory, RoundLimits, Transition, TransitionContext},
    pii::{Category, PiiCatalog, PiiType},
    prompt::{GeneratedPrompt, Instructions, PromptKind, PromptOrigin},
};
