//! Generated instruction prompts and the meta-expert's instruction payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which phase a generated prompt drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    Extracting,
    Verifying,
    Issue,
}

impl PromptKind {
    pub const ALL: [PromptKind; 3] = [Self::Extracting, Self::Verifying, Self::Issue];

    /// Suffix used in cache file names.
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Verifying => "verifying",
            Self::Issue => "issue",
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// Where the active prompt text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptOrigin {
    Generated,
    Cached,
}

/// Instruction text driving one phase of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPrompt {
    pub kind: PromptKind,
    pub text: String,
    pub origin: PromptOrigin,
}

impl GeneratedPrompt {
    pub fn generated(kind: PromptKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            origin: PromptOrigin::Generated,
        }
    }

    pub fn cached(kind: PromptKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            origin: PromptOrigin::Cached,
        }
    }
}

/// The meta-expert's description of the expert to create.
///
/// `instructions` is free-form (string, list or object), so it is kept as a
/// JSON value and handed to the prompt creator verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(rename = "job description")]
    pub job_description: String,
    #[serde(default)]
    pub instructions: Value,
}

impl Instructions {
    /// Decode an instruction payload.
    ///
    /// Accepts the flat shape and the shape nested under an `Instructions`
    /// key, which some models produce.
    pub fn from_value(value: Value) -> Option<Self> {
        let value = match value {
            Value::Object(mut map) if !map.contains_key("job description") => {
                map.remove("Instructions")?
            }
            other => other,
        };
        serde_json::from_value(value).ok()
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
