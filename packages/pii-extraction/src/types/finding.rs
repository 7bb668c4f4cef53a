//! Findings, verdicts and the uniform output record.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

use crate::types::person::PersonNames;

/// Length of generated finding ids.
pub const FINDING_ID_LEN: usize = 16;

/// Short opaque token identifying a finding within one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(String);

impl FindingId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(FINDING_ID_LEN);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FindingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FindingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A candidate PII mention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,

    /// Verbatim excerpt from the source text
    pub identifier: String,

    /// Surrounding text used to disambiguate the mention
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub reasoning: String,

    /// Person the mention belongs to (person-centric extraction only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_uuid: Option<String>,

    /// Name variants of a recognized person (person recognition only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<PersonNames>,
}

impl Finding {
    /// Create a finding with a fresh id.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            id: FindingId::generate(),
            identifier: identifier.into(),
            context: String::new(),
            reasoning: String::new(),
            person_uuid: None,
            names: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<FindingId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_person(mut self, person_uuid: impl Into<String>) -> Self {
        self.person_uuid = Some(person_uuid.into());
        self
    }

    pub fn with_names(mut self, names: PersonNames) -> Self {
        self.names = Some(names);
        self
    }
}

/// Accept/reject judgment on one finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub finding_id: FindingId,
    pub accepted: bool,
    #[serde(default)]
    pub reasoning: String,
}

/// A finding the verifier rejected, with its stated reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedFinding {
    #[serde(flatten)]
    pub finding: Finding,
    pub reason_why_false: String,
}

/// Findings partitioned by the latest verification round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Review {
    pub accepted: Vec<Finding>,
    pub rejected: Vec<RejectedFinding>,
}

impl Review {
    pub fn len(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}

/// Output record: a single-key map `{id: {identifier, context, reasoning, ...}}`.
///
/// The shape is the same for both extraction strategies; person-centric
/// records additionally carry `person_uuid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingRecord(pub Finding);

impl FindingRecord {
    pub fn id(&self) -> &FindingId {
        &self.0.id
    }

    pub fn finding(&self) -> &Finding {
        &self.0
    }

    pub fn into_finding(self) -> Finding {
        self.0
    }
}

#[derive(Serialize)]
struct RecordBody<'a> {
    identifier: &'a str,
    context: &'a str,
    reasoning: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    person_uuid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    names: Option<&'a PersonNames>,
}

impl Serialize for FindingRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let finding = &self.0;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            &finding.id,
            &RecordBody {
                identifier: &finding.identifier,
                context: &finding.context,
                reasoning: &finding.reasoning,
                person_uuid: finding.person_uuid.as_deref(),
                names: finding.names.as_ref(),
            },
        )?;
        map.end()
    }
}
