//! PII types and the catalog they are loaded from.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{ExtractionError, Result};

/// Strategy grouping that selects prompt templates and the extraction shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Flat findings with no subject linkage
    #[default]
    Independent,
    /// Findings grouped under a known person
    Individuals,
    /// Recognition of the persons themselves
    Persons,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::Individuals => "individuals",
            Self::Persons => "persons",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Examples {
    One(String),
    Many(Vec<String>),
}

impl From<Examples> for Vec<String> {
    fn from(value: Examples) -> Self {
        match value {
            Examples::One(s) => vec![s],
            Examples::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PiiEntry {
    description: String,
    #[serde(default, alias = "examples")]
    example: Option<Examples>,
    #[serde(default)]
    category: Category,
}

/// One named kind of information to extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PiiType {
    pub name: String,
    pub description: String,
    pub examples: Vec<String>,
    pub category: Category,
}

impl PiiType {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            examples: Vec::new(),
            category: Category::default(),
        }
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// The entry as shown to the model, keyed by name.
    pub fn to_prompt_json(&self) -> serde_json::Value {
        serde_json::json!({
            self.name.clone(): {
                "description": self.description,
                "example": self.examples,
            }
        })
    }
}

/// Immutable set of PII types for a run, in file order.
#[derive(Debug, Clone, Default)]
pub struct PiiCatalog {
    types: IndexMap<String, PiiType>,
}

impl PiiCatalog {
    /// Parse a YAML mapping of `name -> {description, example, category}`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let entries: IndexMap<String, PiiEntry> = serde_yaml::from_str(yaml)
            .map_err(|e| ExtractionError::Config(format!("invalid PII catalog: {e}")))?;

        let types = entries
            .into_iter()
            .map(|(name, entry)| {
                let pii = PiiType {
                    name: name.clone(),
                    description: entry.description,
                    examples: entry.example.map(Into::into).unwrap_or_default(),
                    category: entry.category,
                };
                (name, pii)
            })
            .collect();
        Ok(Self { types })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            ExtractionError::Config(format!("cannot read PII catalog {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn get(&self, name: &str) -> Result<&PiiType> {
        self.types
            .get(name)
            .ok_or_else(|| ExtractionError::UnknownPiiType(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PiiType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<PiiType> for PiiCatalog {
    fn from_iter<I: IntoIterator<Item = PiiType>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }
}
