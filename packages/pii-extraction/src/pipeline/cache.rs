//! Disk-backed cache of generated instruction prompts.
//!
//! Layout: `<root>/<category>/<pii>/<pii>_<kind>.md`, with a
//! `<pii>_<kind>.md.sha256` sidecar fingerprinting the inputs the prompt was
//! generated from. "File exists" is authoritative: entries are written once
//! per key and only replaced on forced regeneration.

use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{ExtractionError, Result};
use crate::types::config::{CacheConfig, StalePolicy};
use crate::types::pii::{Category, PiiType};
use crate::types::prompt::{GeneratedPrompt, PromptKind};

/// Identifies one cached prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromptKey {
    pub category: Category,
    pub pii: String,
    pub kind: PromptKind,
}

impl PromptKey {
    pub fn new(category: Category, pii: impl Into<String>, kind: PromptKind) -> Self {
        Self {
            category,
            pii: pii.into(),
            kind,
        }
    }

    fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.category.as_str())
            .join(&self.pii)
            .join(format!("{}_{}.md", self.pii, self.kind.file_stem()))
    }
}

/// Result of a read-only cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Cached and generated from the same inputs (or unfingerprinted)
    Hit(String),
    /// Cached, but the inputs changed since generation
    Stale(String),
    Miss,
}

/// Fingerprint of everything that defines a generated prompt.
pub fn fingerprint(pii: &PiiType, kind: PromptKind, guidelines: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    for part in [pii.category.as_str(), pii.name.as_str(), kind.file_stem()] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(pii.description.as_bytes());
    hasher.update([0u8]);
    for example in &pii.examples {
        hasher.update(example.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(guidelines.unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The prompt cache shared by every conversation of a run.
#[derive(Debug, Clone)]
pub struct PromptCache {
    root: PathBuf,
    stale_policy: StalePolicy,
}

impl PromptCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stale_policy: StalePolicy::default(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.root.clone()).with_stale_policy(config.stale_policy)
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the prompt file for a key.
    pub fn path(&self, key: &PromptKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    fn sidecar_path(&self, key: &PromptKey) -> PathBuf {
        let mut path = self.path(key).into_os_string();
        path.push(".sha256");
        PathBuf::from(path)
    }

    /// Look a key up without writing anything.
    pub async fn lookup(&self, key: &PromptKey, fingerprint: &str) -> Result<CacheLookup> {
        let path = self.path(key);
        let text = match read_optional(&path).await? {
            Some(text) => text,
            None => return Ok(CacheLookup::Miss),
        };

        match read_optional(&self.sidecar_path(key)).await? {
            Some(stored) if stored.trim() != fingerprint => Ok(CacheLookup::Stale(text)),
            _ => Ok(CacheLookup::Hit(text)),
        }
    }

    /// Write a prompt, replacing any existing entry.
    pub async fn store(&self, key: &PromptKey, text: &str, fingerprint: &str) -> Result<PathBuf> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|source| cache_error(&path, source))?;
        self.write_sidecar(key, fingerprint).await?;
        info!(path = %path.display(), "Prompt saved");
        Ok(path)
    }

    /// Write a prompt only if the key is still absent.
    ///
    /// Returns the text that is now active for the key: ours, or the text a
    /// concurrent writer stored first.
    pub async fn store_new(&self, key: &PromptKey, text: &str, fingerprint: &str) -> Result<String> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        match created {
            Ok(mut file) => {
                file.write_all(text.as_bytes())
                    .await
                    .map_err(|source| cache_error(&path, source))?;
                file.flush()
                    .await
                    .map_err(|source| cache_error(&path, source))?;
                self.write_sidecar(key, fingerprint).await?;
                info!(path = %path.display(), "Prompt saved");
                Ok(text.to_string())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Prompt already cached, adopting existing text");
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|source| cache_error(&path, source))
            }
            Err(source) => Err(cache_error(&path, source)),
        }
    }

    /// Return the cached prompt for `key`, generating and caching it on a miss.
    ///
    /// `force` regenerates and overwrites unconditionally. A stale entry is
    /// used as-is under [`StalePolicy::Warn`] and regenerated under
    /// [`StalePolicy::Regenerate`].
    pub async fn get_or_generate<F, Fut>(
        &self,
        key: &PromptKey,
        fingerprint: &str,
        force: bool,
        generate: F,
    ) -> Result<GeneratedPrompt>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut overwrite = force;
        if !force {
            match self.lookup(key, fingerprint).await? {
                CacheLookup::Hit(text) => {
                    debug!(pii = %key.pii, kind = %key.kind, "Prompt cache hit");
                    return Ok(GeneratedPrompt::cached(key.kind, text));
                }
                CacheLookup::Stale(text) => match self.stale_policy {
                    StalePolicy::Warn => {
                        warn!(
                            pii = %key.pii,
                            kind = %key.kind,
                            "Cached prompt was generated from different inputs; using it anyway"
                        );
                        return Ok(GeneratedPrompt::cached(key.kind, text));
                    }
                    StalePolicy::Regenerate => {
                        info!(pii = %key.pii, kind = %key.kind, "Regenerating stale prompt");
                        overwrite = true;
                    }
                },
                CacheLookup::Miss => {
                    debug!(pii = %key.pii, kind = %key.kind, "Prompt cache miss");
                }
            }
        }

        let text = generate().await?;
        if overwrite {
            self.store(key, &text, fingerprint).await?;
            return Ok(GeneratedPrompt::generated(key.kind, text));
        }

        let active = self.store_new(key, &text, fingerprint).await?;
        if active == text {
            Ok(GeneratedPrompt::generated(key.kind, active))
        } else {
            Ok(GeneratedPrompt::cached(key.kind, active))
        }
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| cache_error(parent, source))?;
        }
        Ok(())
    }

    async fn write_sidecar(&self, key: &PromptKey, fingerprint: &str) -> Result<()> {
        let path = self.sidecar_path(key);
        tokio::fs::write(&path, fingerprint)
            .await
            .map_err(|source| cache_error(&path, source))
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(cache_error(path, source)),
    }
}

fn cache_error(path: &Path, source: std::io::Error) -> ExtractionError {
    ExtractionError::Cache {
        path: path.display().to_string(),
        source,
    }
}
