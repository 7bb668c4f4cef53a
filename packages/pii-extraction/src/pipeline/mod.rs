//! Extraction pipeline - the core of the library.
//!
//! The pipeline orchestrates:
//! - Instruction synthesis by the meta-expert
//! - Prompt authoring, refinement and caching
//! - Extraction, per-finding verification and issue solving
//! - Model-driven phase transitions with bounded cycling
//! - Person recognition ahead of person-centric extraction
//! - Document chunking and persistence

pub mod author;
pub mod cache;
pub mod controller;
pub mod document;
pub mod parser;
pub mod persons;
pub mod prompts;
pub mod refiner;
pub mod strategy;
pub mod verification;

pub use author::{generation_payload, PromptAuthor};
pub use cache::{fingerprint, CacheLookup, PromptCache, PromptKey};
pub use controller::{ConversationController, ConversationOutcome, Orchestrator};
pub use document::{split_text, Document, DocumentExtractor, DocumentReport, PiiFailure, PiiSummary};
pub use parser::{
    critique_scores, parse_instructions, parse_json_reply, parse_next_step, parse_reply,
    response_section, scores_satisfied,
};
pub use persons::{person_from_finding, person_pii, PersonExtractor, PersonRecognitionStrategy, PERSON_PII};
pub use prompts::{CategoryTemplates, GeneralTemplates, PromptLibrary};
pub use refiner::{PromptRefiner, Refinement, MAX_REFINEMENT_ROUNDS};
pub use strategy::{
    apply_correction, categorize, ExtractionStrategy, IndependentStrategy, PersonCentricStrategy,
    WorkUnit,
};
pub use verification::{fan_out, parse_verdict, VerificationRequest};
