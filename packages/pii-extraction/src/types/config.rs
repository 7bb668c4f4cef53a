//! Configuration types for extraction runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::phase::RoundLimits;
use crate::types::prompt::PromptKind;

/// Configuration for the extraction orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Critique loop applied to freshly generated prompts.
    pub refiner: RefinerConfig,

    /// On-disk cache of generated prompts.
    pub cache: CacheConfig,

    /// Bounds on phase cycling.
    pub limits: RoundLimits,

    /// Optional guideline files folded into prompt generation.
    #[serde(default)]
    pub guidelines: GuidelinesConfig,

    /// Per-phase deadline in seconds. A timeout is fatal for that
    /// conversation only. Default: none.
    pub phase_timeout_secs: Option<u64>,

    /// Transcript turns kept in memory per conversation.
    ///
    /// Never less than the meta-expert window. Default: 32.
    pub transcript_retention: usize,

    /// PII types processed concurrently per document. Default: 4.
    pub max_concurrency: usize,

    /// How documents are split into chunks.
    pub chunking: ChunkingConfig,

    /// Recognize the persons of a document before person-centric PII types
    /// run. Default: true.
    pub recognize_persons: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            refiner: RefinerConfig::default(),
            cache: CacheConfig::default(),
            limits: RoundLimits::default(),
            guidelines: GuidelinesConfig::default(),
            phase_timeout_secs: None,
            transcript_retention: 32,
            max_concurrency: 4,
            chunking: ChunkingConfig::default(),
            recognize_persons: true,
        }
    }
}

impl ExtractionConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable prompt refinement.
    pub fn with_refinement(mut self, enabled: bool) -> Self {
        self.refiner.enabled = enabled;
        self
    }

    /// Set the prompt cache root directory.
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache.root = root.into();
        self
    }

    /// Regenerate every prompt even when cached.
    pub fn with_force_regenerate(mut self, force: bool) -> Self {
        self.cache.force_regenerate = force;
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.cache.stale_policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: RoundLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the per-phase deadline.
    pub fn with_phase_timeout(mut self, seconds: u64) -> Self {
        self.phase_timeout_secs = Some(seconds);
        self
    }

    pub fn with_transcript_retention(mut self, turns: usize) -> Self {
        self.transcript_retention = turns;
        self
    }

    /// Set the PII-type concurrency cap (at least 1).
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Paragraphs equal to one of these strings are dropped before chunking.
    pub fn with_ignore_list(mut self, ignore: Vec<String>) -> Self {
        self.chunking.ignore_list = ignore;
        self
    }

    pub fn with_person_recognition(mut self, enabled: bool) -> Self {
        self.recognize_persons = enabled;
        self
    }

    pub fn with_guidelines(mut self, kind: PromptKind, path: impl Into<PathBuf>) -> Self {
        self.guidelines.set(kind, path.into());
        self
    }
}

/// Settings for the prompt critique loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinerConfig {
    /// Default: false.
    pub enabled: bool,

    /// Every `N/10` score in a critique must reach this value. Default: 8.
    pub score_cutoff: u32,

    /// Upper bound on incorporate-and-critique rounds. Default: 5.
    pub max_rounds: usize,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            score_cutoff: 8,
            max_rounds: 5,
        }
    }
}

/// What to do when a cached prompt was generated from different inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Keep using the cached text and log a warning.
    #[default]
    Warn,
    /// Treat the entry as missing and generate a new prompt.
    Regenerate,
}

/// Settings for the prompt cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Save root. Default: `generated_prompts`.
    pub root: PathBuf,

    /// Regenerate and overwrite even when a file exists. Default: false.
    pub force_regenerate: bool,

    pub stale_policy: StalePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("generated_prompts"),
            force_regenerate: false,
            stale_policy: StalePolicy::default(),
        }
    }
}

/// Guideline files per prompt kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuidelinesConfig {
    pub extracting: Option<PathBuf>,
    pub verifying: Option<PathBuf>,
    pub issue: Option<PathBuf>,
}

impl GuidelinesConfig {
    pub fn path(&self, kind: PromptKind) -> Option<&Path> {
        match kind {
            PromptKind::Extracting => self.extracting.as_deref(),
            PromptKind::Verifying => self.verifying.as_deref(),
            PromptKind::Issue => self.issue.as_deref(),
        }
    }

    pub fn set(&mut self, kind: PromptKind, path: PathBuf) {
        match kind {
            PromptKind::Extracting => self.extracting = Some(path),
            PromptKind::Verifying => self.verifying = Some(path),
            PromptKind::Issue => self.issue = Some(path),
        }
    }
}

/// Document chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Consecutive paragraphs merged into one chunk. Default: 2.
    pub paragraphs_to_merge: usize,

    /// Boilerplate paragraphs dropped before merging.
    #[serde(default)]
    pub ignore_list: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            paragraphs_to_merge: 2,
            ignore_list: vec![],
        }
    }
}
