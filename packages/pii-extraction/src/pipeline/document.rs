//! Document-level driver: chunking, per-PII fan-out and persistence.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::pipeline::controller::Orchestrator;
use crate::pipeline::persons::{person_pii, PersonExtractor, PersonRecognitionStrategy};
use crate::pipeline::strategy::{ExtractionStrategy, IndependentStrategy, PersonCentricStrategy};
use crate::traits::store::{FindingStore, PersonStore};
use crate::types::pii::{Category, PiiType};

/// Split text on blank lines, drop boilerplate paragraphs and merge
/// consecutive groups of `paragraphs_to_merge` into chunks.
pub fn split_text(text: &str, ignore_list: &[String], paragraphs_to_merge: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter(|p| !ignore_list.iter().any(|ignored| ignored.trim() == *p))
        .collect();

    paragraphs
        .chunks(paragraphs_to_merge.max(1))
        .map(|group| group.join("\n\n"))
        .collect()
}

/// A document to extract from.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Records written for one PII type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PiiSummary {
    pub pii: String,
    pub records: usize,
}

/// A PII type whose run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PiiFailure {
    pub pii: String,
    pub error: String,
    pub retryable: bool,
}

/// What happened to each PII type of a document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentReport {
    pub document_id: String,
    pub chunks: usize,
    pub completed: Vec<PiiSummary>,
    pub failed: Vec<PiiFailure>,
}

impl DocumentReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn records(&self) -> usize {
        self.completed.iter().map(|s| s.records).sum()
    }

    fn record(&mut self, pii: String, result: Result<usize>) {
        match result {
            Ok(records) => self.completed.push(PiiSummary { pii, records }),
            Err(e) => {
                warn!(pii = %pii, error = %e, retryable = e.is_retryable(), "PII extraction failed");
                self.failed.push(PiiFailure {
                    pii,
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                });
            }
        }
    }
}

/// Runs every PII type over every chunk of a document and persists the records.
#[derive(Clone)]
pub struct DocumentExtractor {
    orchestrator: Orchestrator,
    findings: Arc<dyn FindingStore>,
    persons: Arc<dyn PersonStore>,
}

impl DocumentExtractor {
    pub fn new(
        orchestrator: Orchestrator,
        findings: Arc<dyn FindingStore>,
        persons: Arc<dyn PersonStore>,
    ) -> Self {
        Self {
            orchestrator,
            findings,
            persons,
        }
    }

    pub fn strategy_for(&self, category: Category) -> Arc<dyn ExtractionStrategy> {
        match category {
            Category::Independent => Arc::new(IndependentStrategy),
            Category::Individuals => Arc::new(PersonCentricStrategy::new(self.persons.clone())),
            Category::Persons => Arc::new(PersonRecognitionStrategy::new(self.persons.clone())),
        }
    }

    /// The person type to recognize, if this batch needs one.
    ///
    /// An explicit `persons` entry always runs. Otherwise the built-in type
    /// runs when a person-centric type is present and recognition is enabled.
    fn recognition_pii(&self, pii_types: &[PiiType]) -> Option<PiiType> {
        let mut explicit = pii_types.iter().filter(|p| p.category == Category::Persons);
        if let Some(pii) = explicit.next() {
            for ignored in explicit {
                warn!(pii = %ignored.name, "Only one person type is recognized per document; ignoring");
            }
            return Some(pii.clone());
        }

        let person_centric = pii_types.iter().any(|p| p.category == Category::Individuals);
        (person_centric && self.orchestrator.config().recognize_persons).then(person_pii)
    }

    /// Extract every PII type from the document.
    ///
    /// Persons are recognized first, so person-centric types see the
    /// document's directory. The remaining PII types then run concurrently
    /// up to `max_concurrency`. A failing type is reported and does not stop
    /// its siblings.
    #[instrument(skip_all, fields(document_id = %document.id, pii_types = pii_types.len()))]
    pub async fn run(&self, document: &Document, pii_types: &[PiiType]) -> DocumentReport {
        let chunking = &self.orchestrator.config().chunking;
        let chunks = split_text(
            &document.text,
            &chunking.ignore_list,
            chunking.paragraphs_to_merge,
        );
        info!(chunks = chunks.len(), "Document split");

        let mut report = DocumentReport {
            document_id: document.id.clone(),
            chunks: chunks.len(),
            ..Default::default()
        };

        if let Some(pii) = self.recognition_pii(pii_types) {
            let recognized = PersonExtractor::new(self.orchestrator.clone(), self.persons.clone())
                .with_pii(pii.clone())
                .run(&document.id, &chunks)
                .await
                .map(|directory| directory.len());
            report.record(pii.name, recognized);
        }

        let concurrency = self.orchestrator.config().max_concurrency.max(1);
        let extraction = pii_types.iter().filter(|p| p.category != Category::Persons);
        let results: Vec<(String, Result<usize>)> = stream::iter(extraction)
            .map(|pii| {
                let chunks = &chunks;
                async move { (pii.name.clone(), self.run_pii(document, chunks, pii).await) }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (pii, result) in results {
            report.record(pii, result);
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            records = report.records(),
            "Document finished"
        );
        report
    }

    async fn run_pii(&self, document: &Document, chunks: &[String], pii: &PiiType) -> Result<usize> {
        self.findings.drop_category(&document.id, &pii.name).await?;
        let strategy = self.strategy_for(pii.category);

        let mut total = 0;
        for (index, chunk) in chunks.iter().enumerate() {
            let outcome = self
                .orchestrator
                .conversation(strategy.clone(), document.id.clone(), chunk.clone(), pii.clone())
                .run()
                .await?;
            debug!(pii = %pii.name, chunk = index, records = outcome.records.len(), "Chunk finished");

            self.findings
                .upsert(&document.id, &pii.name, &outcome.records)
                .await?;
            total += outcome.records.len();
        }
        Ok(total)
    }
}
