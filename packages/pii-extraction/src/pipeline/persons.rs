//! Person recognition: fills the person directory that person-centric
//! extraction works from.
//!
//! Recognition is an ordinary conversation over the `persons` category, so
//! every recognized person is verified (or produced by issue solving) before
//! it reaches the store. After the last chunk the directory is condensed:
//! one model call merges entries that describe the same person.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{ExtractionError, Result};
use crate::pipeline::controller::Orchestrator;
use crate::pipeline::parser::parse_json_reply;
use crate::pipeline::strategy::{ExtractionStrategy, WorkUnit};
use crate::traits::llm::LlmClient;
use crate::traits::store::PersonStore;
use crate::types::finding::{Finding, Review};
use crate::types::person::{Person, PersonDirectory, PersonNames};
use crate::types::pii::{Category, PiiType};

/// Name of the built-in person PII type.
pub const PERSON_PII: &str = "person";

/// The PII type recognized unless the catalog supplies its own.
pub fn person_pii() -> PiiType {
    PiiType::new(
        PERSON_PII,
        "A natural person mentioned in the text: the full name as written, plus every abbreviation and alias the text uses for them",
    )
    .with_example(r#"Jane Roe, also "J. R." or "Janie""#)
    .with_category(Category::Persons)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(name)) => vec![name],
        Some(OneOrMany::Many(names)) => names,
        None => Vec::new(),
    };
    Ok(names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect())
}

/// One person as the model writes it.
#[derive(Debug, Deserialize)]
struct RawPerson {
    #[serde(alias = "full name")]
    full_name: String,
    #[serde(default, deserialize_with = "one_or_many")]
    abbreviations: BTreeSet<String>,
    #[serde(default, alias = "alias", deserialize_with = "one_or_many")]
    aliases: BTreeSet<String>,
    #[serde(default)]
    reasoning: String,
}

impl RawPerson {
    fn names(&mut self) -> PersonNames {
        PersonNames {
            abbreviations: std::mem::take(&mut self.abbreviations),
            aliases: std::mem::take(&mut self.aliases),
        }
    }

    fn into_finding(mut self) -> Finding {
        let names = self.names();
        Finding::new(self.full_name.trim())
            .with_reasoning(self.reasoning)
            .with_names(names)
    }

    fn into_person(mut self, id: String) -> Person {
        let names = self.names();
        Person::new(id, self.full_name.trim()).with_names(names)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecognitionReply {
    Wrapped {
        #[serde(rename = "Persons", alias = "persons")]
        persons: Option<Vec<RawPerson>>,
    },
    Bare(Vec<RawPerson>),
}

/// A recognized person; its finding id becomes the person id.
pub fn person_from_finding(finding: Finding) -> Person {
    Person::new(finding.id.to_string(), finding.identifier)
        .with_names(finding.names.unwrap_or_default())
}

fn person_json(finding: &Finding) -> Value {
    let names = finding.names.clone().unwrap_or_default();
    json!({
        "full name": finding.identifier,
        "abbreviations": names.abbreviations,
        "aliases": names.aliases,
    })
}

// =============================================================================
// Strategy
// =============================================================================

/// Recognition of persons: `{"Persons": [{"full name", "abbreviations", "aliases"}]}`.
///
/// Persons already in the store are shown to the model and never proposed
/// again.
#[derive(Clone)]
pub struct PersonRecognitionStrategy {
    persons: Arc<dyn PersonStore>,
}

impl PersonRecognitionStrategy {
    pub fn new(persons: Arc<dyn PersonStore>) -> Self {
        Self { persons }
    }
}

#[async_trait]
impl ExtractionStrategy for PersonRecognitionStrategy {
    fn category(&self) -> Category {
        Category::Persons
    }

    async fn load_persons(&self, document_id: &str) -> Result<PersonDirectory> {
        self.persons.list_persons(document_id).await
    }

    fn extraction_message(&self, unit: &WorkUnit<'_>) -> String {
        format!(
            "<person_dict>{}</person_dict>\n<text>{}</text>",
            unit.persons.to_prompt_json(),
            unit.text
        )
    }

    fn verification_message(&self, unit: &WorkUnit<'_>, finding: &Finding) -> String {
        let solution = json!({ finding.id.to_string(): person_json(finding) });
        format!("<solution>{solution}</solution>\n<text>{}</text>", unit.text)
    }

    fn issue_message(&self, unit: &WorkUnit<'_>, review: &Review) -> String {
        let accepted: Map<String, Value> = review
            .accepted
            .iter()
            .map(|f| (f.id.to_string(), person_json(f)))
            .collect();
        let rejected: Map<String, Value> = review
            .rejected
            .iter()
            .map(|r| {
                let mut entry = person_json(&r.finding);
                entry["reason_why_false"] = json!(r.reason_why_false);
                (r.finding.id.to_string(), entry)
            })
            .collect();
        format!(
            "<text>{}</text>\n<correct_solution>{}</correct_solution>\n<wrong_solution>{}</wrong_solution>",
            unit.text,
            Value::Object(accepted),
            Value::Object(rejected)
        )
    }

    fn decode_findings(&self, unit: &WorkUnit<'_>, reply: &str) -> Result<Vec<Finding>> {
        let value = parse_json_reply(reply)?;
        let raw = match serde_json::from_value::<RecognitionReply>(value)? {
            RecognitionReply::Wrapped { persons } => persons.unwrap_or_default(),
            RecognitionReply::Bare(list) => list,
        };

        let mut findings = Vec::with_capacity(raw.len());
        for person in raw {
            let known = unit
                .persons
                .iter()
                .any(|p| p.full_name.eq_ignore_ascii_case(person.full_name.trim()));
            if known {
                debug!(full_name = %person.full_name, "Skipping person already in the directory");
                continue;
            }
            findings.push(person.into_finding());
        }
        Ok(findings)
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// Recognizes the persons of a document and keeps its directory current.
#[derive(Clone)]
pub struct PersonExtractor {
    orchestrator: Orchestrator,
    persons: Arc<dyn PersonStore>,
    pii: PiiType,
}

impl PersonExtractor {
    pub fn new(orchestrator: Orchestrator, persons: Arc<dyn PersonStore>) -> Self {
        Self {
            orchestrator,
            persons,
            pii: person_pii(),
        }
    }

    /// Recognize with a catalog-supplied definition instead of the built-in one.
    pub fn with_pii(mut self, pii: PiiType) -> Self {
        self.pii = pii;
        self
    }

    pub fn pii(&self) -> &PiiType {
        &self.pii
    }

    /// Recognize persons chunk by chunk, then condense the directory.
    ///
    /// Chunks run in order; persons recognized in one chunk are known to the
    /// next. Returns the directory as stored afterwards.
    #[instrument(skip(self, chunks), fields(pii = %self.pii.name, chunks = chunks.len()))]
    pub async fn run(&self, document_id: &str, chunks: &[String]) -> Result<PersonDirectory> {
        let strategy: Arc<dyn ExtractionStrategy> =
            Arc::new(PersonRecognitionStrategy::new(self.persons.clone()));

        for (index, chunk) in chunks.iter().enumerate() {
            let outcome = self
                .orchestrator
                .conversation(strategy.clone(), document_id, chunk.clone(), self.pii.clone())
                .run()
                .await?;
            let recognized: PersonDirectory = outcome
                .records
                .into_iter()
                .map(|r| person_from_finding(r.into_finding()))
                .collect();
            debug!(chunk = index, persons = recognized.len(), "Chunk finished");

            if !recognized.is_empty() {
                self.persons.upsert_persons(document_id, &recognized).await?;
            }
        }

        let directory = self.persons.list_persons(document_id).await?;
        let condensed = self.condense(&directory).await?;
        if condensed != directory {
            self.persons.replace_persons(document_id, &condensed).await?;
        }
        info!(persons = condensed.len(), "Person directory ready");
        Ok(condensed)
    }

    /// Merge entries that describe the same person.
    async fn condense(&self, directory: &PersonDirectory) -> Result<PersonDirectory> {
        if directory.len() < 2 {
            return Ok(directory.clone());
        }

        let request = format!("<person_dict>{}</person_dict>", directory.to_prompt_json());
        let reply = self
            .orchestrator
            .expert()
            .ask(&self.orchestrator.library().general.condense_persons, &request)
            .await?;
        let raw: IndexMap<String, RawPerson> = serde_json::from_value(parse_json_reply(&reply)?)?;
        let condensed: PersonDirectory = raw
            .into_iter()
            .map(|(id, person)| person.into_person(id))
            .collect();

        if condensed.is_empty() {
            return Err(ExtractionError::protocol("condensed person directory", &reply));
        }
        if condensed.len() < directory.len() {
            info!(
                before = directory.len(),
                after = condensed.len(),
                "Duplicate persons merged"
            );
        }
        Ok(condensed)
    }
}
