//! Extraction strategies: how findings are requested, decoded and merged.
//!
//! - `IndependentStrategy`: flat list of findings, no subject linkage
//! - `PersonCentricStrategy`: findings grouped under known persons; every
//!   call carries the current person directory
//!
//! The conversation controller is polymorphic over [`ExtractionStrategy`]
//! and never inspects reply shapes itself.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ExtractionError, Result};
use crate::pipeline::parser::parse_json_reply;
use crate::pipeline::verification::{fan_out, VerificationRequest};
use crate::traits::llm::LlmClient;
use crate::traits::store::PersonStore;
use crate::types::finding::{Finding, RejectedFinding, Review, VerificationVerdict};
use crate::types::person::PersonDirectory;
use crate::types::pii::{Category, PiiType};

/// Everything a strategy needs to phrase a request for one unit of work.
#[derive(Debug, Clone, Copy)]
pub struct WorkUnit<'a> {
    pub document_id: &'a str,
    pub text: &'a str,
    pub pii: &'a PiiType,
    /// Empty for strategies without subject linkage
    pub persons: &'a PersonDirectory,
}

/// One finding as the model writes it.
#[derive(Debug, Deserialize)]
struct RawFinding {
    identifier: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    reasoning: String,
}

impl RawFinding {
    fn into_finding(self) -> Finding {
        Finding::new(self.identifier)
            .with_context(self.context)
            .with_reasoning(self.reasoning)
    }
}

#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn category(&self) -> Category;

    /// Persons to inject for the document. Called at the start of every phase.
    async fn load_persons(&self, _document_id: &str) -> Result<PersonDirectory> {
        Ok(PersonDirectory::new())
    }

    fn extraction_message(&self, unit: &WorkUnit<'_>) -> String;

    fn verification_message(&self, unit: &WorkUnit<'_>, finding: &Finding) -> String;

    fn issue_message(&self, unit: &WorkUnit<'_>, review: &Review) -> String;

    /// Decode an extraction or correction reply into findings with fresh ids.
    fn decode_findings(&self, unit: &WorkUnit<'_>, reply: &str) -> Result<Vec<Finding>>;

    /// Run the extraction prompt on the text.
    async fn extract(
        &self,
        llm: &dyn LlmClient,
        prompt: &str,
        unit: &WorkUnit<'_>,
    ) -> Result<Vec<Finding>> {
        let reply = llm.ask(prompt, &self.extraction_message(unit)).await?;
        self.decode_findings(unit, &reply)
    }

    /// Verify every finding with its own request.
    async fn verify(
        &self,
        llm: &dyn LlmClient,
        prompt: &str,
        unit: &WorkUnit<'_>,
        findings: &[Finding],
    ) -> Result<Vec<VerificationVerdict>> {
        let requests = findings
            .iter()
            .map(|f| VerificationRequest::new(f.id.clone(), self.verification_message(unit, f)))
            .collect();
        fan_out(llm, prompt, requests).await
    }

    /// Partition findings by their verdicts.
    fn categorize(&self, findings: &[Finding], verdicts: &[VerificationVerdict]) -> Result<Review> {
        categorize(findings, verdicts)
    }

    /// Ask for corrections of rejected findings and for missed ones.
    async fn correct(
        &self,
        llm: &dyn LlmClient,
        prompt: &str,
        unit: &WorkUnit<'_>,
        review: &Review,
    ) -> Result<Vec<Finding>> {
        let reply = llm.ask(prompt, &self.issue_message(unit, review)).await?;
        let corrected = self.decode_findings(unit, &reply)?;
        Ok(self.apply_correction(review, corrected))
    }

    /// Merge corrections into the accepted set.
    ///
    /// Rejected findings only come back as corrected entries with new ids.
    fn apply_correction(&self, review: &Review, corrected: Vec<Finding>) -> Vec<Finding> {
        apply_correction(review, corrected)
    }
}

/// Partition `findings` into accepted and rejected.
///
/// Accepted findings take the verdict's reasoning. Every verdict must name a
/// proposed finding and every finding must have a verdict.
pub fn categorize(findings: &[Finding], verdicts: &[VerificationVerdict]) -> Result<Review> {
    let mut by_id: HashMap<&str, &VerificationVerdict> = HashMap::with_capacity(verdicts.len());
    for verdict in verdicts {
        if !findings.iter().any(|f| f.id == verdict.finding_id) {
            return Err(ExtractionError::MergeKey {
                finding_id: verdict.finding_id.to_string(),
            });
        }
        by_id.insert(verdict.finding_id.as_str(), verdict);
    }

    let mut review = Review::default();
    for finding in findings {
        let verdict = by_id.get(finding.id.as_str()).ok_or_else(|| {
            ExtractionError::protocol("a verdict for every finding", finding.id.as_str())
        })?;
        if verdict.accepted {
            let mut accepted = finding.clone();
            if !verdict.reasoning.is_empty() {
                accepted.reasoning = verdict.reasoning.clone();
            }
            review.accepted.push(accepted);
        } else {
            review.rejected.push(RejectedFinding {
                finding: finding.clone(),
                reason_why_false: verdict.reasoning.clone(),
            });
        }
    }
    Ok(review)
}

/// Accepted findings followed by corrections that do not repeat one of them.
pub fn apply_correction(review: &Review, corrected: Vec<Finding>) -> Vec<Finding> {
    let mut merged = review.accepted.clone();
    for finding in corrected {
        let duplicate = merged.iter().any(|f| {
            f.identifier == finding.identifier && f.person_uuid == finding.person_uuid
        });
        if duplicate {
            debug!(identifier = %finding.identifier, "Dropping correction that repeats an accepted finding");
            continue;
        }
        merged.push(finding);
    }
    merged
}

fn accepted_json(review: &Review, with_person: bool) -> Value {
    let map: Map<String, Value> = review
        .accepted
        .iter()
        .map(|f| {
            let mut entry = json!({
                "identifier": f.identifier,
                "context": f.context,
                "reasoning": f.reasoning,
                "bool": true,
            });
            if with_person {
                entry["uuid_person"] = json!(f.person_uuid);
            }
            (f.id.to_string(), entry)
        })
        .collect();
    Value::Object(map)
}

fn rejected_json(review: &Review, with_person: bool) -> Value {
    let map: Map<String, Value> = review
        .rejected
        .iter()
        .map(|r| {
            let mut entry = json!({
                "identifier": r.finding.identifier,
                "context": r.finding.context,
                "reason_why_false": r.reason_why_false,
            });
            if with_person {
                entry["uuid_person"] = json!(r.finding.person_uuid);
            }
            (r.finding.id.to_string(), entry)
        })
        .collect();
    Value::Object(map)
}

// =============================================================================
// Independent
// =============================================================================

/// Flat extraction: `{"extracted_information": [...]}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndependentStrategy;

#[derive(Deserialize)]
#[serde(untagged)]
enum IndependentReply {
    Wrapped { extracted_information: Option<Vec<RawFinding>> },
    Bare(Vec<RawFinding>),
}

#[async_trait]
impl ExtractionStrategy for IndependentStrategy {
    fn category(&self) -> Category {
        Category::Independent
    }

    fn extraction_message(&self, unit: &WorkUnit<'_>) -> String {
        format!(
            "<text>{}</text>\n<pii>{}</pii>\n<pii_description>{}</pii_description>",
            unit.text,
            unit.pii.to_prompt_json(),
            unit.pii.description
        )
    }

    fn verification_message(&self, unit: &WorkUnit<'_>, finding: &Finding) -> String {
        let solution = json!({
            finding.id.to_string(): {
                "identifier": finding.identifier,
                "context": finding.context,
                "reasoning": finding.reasoning,
            }
        });
        format!(
            "<solution>{solution}</solution>\n<text>{}</text>\n<pii>{}: {}</pii>",
            unit.text, unit.pii.name, unit.pii.description
        )
    }

    fn issue_message(&self, unit: &WorkUnit<'_>, review: &Review) -> String {
        format!(
            "<text>{}</text>\n<correct_solution>{}</correct_solution>\n<wrong_solution>{}</wrong_solution>\n<pii_name>{}</pii_name>\n<pii_description>{}</pii_description>",
            unit.text,
            accepted_json(review, false),
            rejected_json(review, false),
            unit.pii.name,
            unit.pii.description
        )
    }

    fn decode_findings(&self, _unit: &WorkUnit<'_>, reply: &str) -> Result<Vec<Finding>> {
        let value = parse_json_reply(reply)?;
        let raw = match serde_json::from_value::<IndependentReply>(value)? {
            IndependentReply::Wrapped {
                extracted_information,
            } => extracted_information.unwrap_or_default(),
            IndependentReply::Bare(list) => list,
        };
        Ok(raw.into_iter().map(RawFinding::into_finding).collect())
    }
}

// =============================================================================
// Person-centric
// =============================================================================

/// Person-grouped extraction: `{"<person id>": [...]}`.
#[derive(Clone)]
pub struct PersonCentricStrategy {
    persons: Arc<dyn PersonStore>,
}

impl PersonCentricStrategy {
    pub fn new(persons: Arc<dyn PersonStore>) -> Self {
        Self { persons }
    }
}

#[async_trait]
impl ExtractionStrategy for PersonCentricStrategy {
    fn category(&self) -> Category {
        Category::Individuals
    }

    async fn load_persons(&self, document_id: &str) -> Result<PersonDirectory> {
        self.persons.list_persons(document_id).await
    }

    fn extraction_message(&self, unit: &WorkUnit<'_>) -> String {
        format!(
            "<person_dict>{}</person_dict>\n<text>{}</text>\n<pii>{}</pii>\n<pii_description>{}</pii_description>",
            unit.persons.to_prompt_json(),
            unit.text,
            unit.pii.to_prompt_json(),
            unit.pii.description
        )
    }

    fn verification_message(&self, unit: &WorkUnit<'_>, finding: &Finding) -> String {
        let solution = json!({
            finding.person_uuid.clone().unwrap_or_default(): {
                "identifier": finding.identifier,
                "context": finding.context,
                "reasoning": finding.reasoning,
                "uuid_of_solution": finding.id,
            }
        });
        format!(
            "<persons>{}</persons>\n<solution>{solution}</solution>\n<text>{}</text>\n<pii>{}: {}</pii>",
            unit.persons.to_prompt_json(),
            unit.text,
            unit.pii.name,
            unit.pii.description
        )
    }

    fn issue_message(&self, unit: &WorkUnit<'_>, review: &Review) -> String {
        format!(
            "<persons>{}</persons>\n<text>{}</text>\n<correct_solution>{}</correct_solution>\n<wrong_solution>{}</wrong_solution>\n<pii_name>{}</pii_name>\n<pii_description>{}</pii_description>",
            unit.persons.to_prompt_json(),
            unit.text,
            accepted_json(review, true),
            rejected_json(review, true),
            unit.pii.name,
            unit.pii.description
        )
    }

    fn decode_findings(&self, unit: &WorkUnit<'_>, reply: &str) -> Result<Vec<Finding>> {
        let value = parse_json_reply(reply)?;
        let grouped: IndexMap<String, Option<Vec<RawFinding>>> = serde_json::from_value(value)?;

        let mut findings = Vec::new();
        for (person_uuid, entries) in grouped {
            if !unit.persons.is_empty() && !unit.persons.contains(&person_uuid) {
                warn!(person_uuid = %person_uuid, "Finding assigned to a person unknown for this document");
            }
            for raw in entries.unwrap_or_default() {
                findings.push(raw.into_finding().with_person(person_uuid.clone()));
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;
    use crate::traits::store::MockPersonStore;
    use crate::types::finding::FindingId;
    use crate::types::person::Person;

    fn pii() -> PiiType {
        PiiType::new("date_of_birth", "The date a person was born")
    }

    fn unit<'a>(pii: &'a PiiType, persons: &'a PersonDirectory) -> WorkUnit<'a> {
        WorkUnit {
            document_id: "doc-1",
            text: "Anna was born on 12.05.1980.",
            pii,
            persons,
        }
    }

    fn verdict(id: &str, accepted: bool, reasoning: &str) -> VerificationVerdict {
        VerificationVerdict {
            finding_id: FindingId::from(id),
            accepted,
            reasoning: reasoning.into(),
        }
    }

    #[test]
    fn test_independent_decode_assigns_fresh_ids() {
        let pii = pii();
        let persons = PersonDirectory::new();
        let reply = r#"```json
{"extracted_information": [
  {"identifier": "12.05.1980", "context": "born on 12.05.1980", "reasoning": "birth date"},
  {"identifier": "1980", "context": "12.05.1980", "reasoning": "year"}
]}
```"#;
        let findings = IndependentStrategy.decode_findings(&unit(&pii, &persons), reply).unwrap();
        assert_eq!(findings.len(), 2);
        assert_ne!(findings[0].id, findings[1].id);
        assert!(findings.iter().all(|f| f.person_uuid.is_none()));

        let empty = IndependentStrategy
            .decode_findings(&unit(&pii, &persons), r#"{"extracted_information": []}"#)
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_categorize_merges_verdict_reasoning() {
        let findings = vec![
            Finding::new("12.05.1980").with_id("a").with_reasoning("extractor"),
            Finding::new("1980").with_id("b"),
        ];
        let review = categorize(
            &findings,
            &[verdict("a", true, "verified date"), verdict("b", false, "only a year")],
        )
        .unwrap();

        assert_eq!(review.accepted.len(), 1);
        assert_eq!(review.accepted[0].reasoning, "verified date");
        assert_eq!(review.accepted[0].identifier, "12.05.1980");
        assert_eq!(review.rejected[0].reason_why_false, "only a year");
    }

    #[test]
    fn test_categorize_rejects_unknown_verdict_ids() {
        let findings = vec![Finding::new("x").with_id("a")];
        let err = categorize(&findings, &[verdict("ghost", true, "")]).unwrap_err();
        assert!(matches!(err, ExtractionError::MergeKey { finding_id } if finding_id == "ghost"));
    }

    #[test]
    fn test_correction_never_reintroduces_rejected() {
        let review = Review {
            accepted: vec![Finding::new("12.05.1980").with_id("a")],
            rejected: vec![RejectedFinding {
                finding: Finding::new("12.05.198").with_id("b"),
                reason_why_false: "truncated".into(),
            }],
        };

        let merged = apply_correction(&review, vec![]);
        assert_eq!(merged.len(), 1);
        assert!(merged.iter().all(|f| f.id.as_str() != "b"));

        let merged = apply_correction(
            &review,
            vec![Finding::new("12.05.1980"), Finding::new("03.03.1975")],
        );
        let identifiers: Vec<_> = merged.iter().map(|f| f.identifier.as_str()).collect();
        assert_eq!(identifiers, ["12.05.1980", "03.03.1975"]);
    }

    #[test]
    fn test_independent_issue_message_shapes() {
        let pii = pii();
        let persons = PersonDirectory::new();
        let review = Review {
            accepted: vec![Finding::new("12.05.1980").with_id("a")],
            rejected: vec![RejectedFinding {
                finding: Finding::new("1980").with_id("b"),
                reason_why_false: "only a year".into(),
            }],
        };
        let message = IndependentStrategy.issue_message(&unit(&pii, &persons), &review);
        assert!(message.contains(r#""bool":true"#));
        assert!(message.contains(r#""reason_why_false":"only a year""#));
        assert!(message.contains("<pii_name>date_of_birth</pii_name>"));
    }

    #[tokio::test]
    async fn test_person_centric_groups_findings_under_persons() {
        let directory: PersonDirectory =
            [Person::new("p-1", "Anna Schmidt"), Person::new("p-2", "Bernd Meier")]
                .into_iter()
                .collect();
        let mut store = MockPersonStore::new();
        let returned = directory.clone();
        store
            .expect_list_persons()
            .withf(|document_id| document_id == "doc-1")
            .times(1)
            .returning(move |_| Ok(returned.clone()));

        let strategy = PersonCentricStrategy::new(Arc::new(store));
        let persons = strategy.load_persons("doc-1").await.unwrap();
        let pii = pii();
        let unit = unit(&pii, &persons);

        let llm = ScriptedLlm::new().with_reply(
            "EXTRACT",
            r#"{"p-1": [{"identifier": "12.05.1980", "context": "Anna was born on 12.05.1980", "reasoning": "Anna"}], "p-2": null}"#,
        );
        let findings = strategy.extract(&llm, "EXTRACT", &unit).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].person_uuid.as_deref(), Some("p-1"));

        let calls = llm.calls();
        assert!(calls[0].last_user().contains("<person_dict>"));
        assert!(calls[0].last_user().contains("Anna Schmidt"));

        let message = strategy.verification_message(&unit, &findings[0]);
        assert!(message.contains(&format!(r#""uuid_of_solution":"{}""#, findings[0].id)));
        assert!(message.contains(r#"{"p-1":{"#));
    }
}
