//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::Result;
use crate::traits::store::{FindingStore, PersonStore};
use crate::types::{finding::FindingRecord, person::PersonDirectory};

/// In-memory storage for findings and persons.
///
/// Useful for testing and for batch runs that export JSON. Not suitable
/// for production as data is lost on restart.
pub struct MemoryStore {
    /// (document id, PII type) -> records in insertion order
    findings: RwLock<IndexMap<(String, String), Vec<FindingRecord>>>,
    persons: RwLock<HashMap<String, PersonDirectory>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            findings: RwLock::new(IndexMap::new()),
            persons: RwLock::new(HashMap::new()),
        }
    }

    /// Register the persons known for a document.
    pub fn with_persons(self, document_id: impl Into<String>, persons: PersonDirectory) -> Self {
        self.persons.write().unwrap().insert(document_id.into(), persons);
        self
    }

    /// Records stored for a document and PII type.
    pub fn records(&self, document_id: &str, pii: &str) -> Vec<FindingRecord> {
        self.findings
            .read()
            .unwrap()
            .get(&(document_id.to_string(), pii.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Get the number of stored records across all documents.
    pub fn record_count(&self) -> usize {
        self.findings.read().unwrap().values().map(Vec::len).sum()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.findings.write().unwrap().clear();
        self.persons.write().unwrap().clear();
    }

    /// Persons of every document, as `{document_id: {person_id: person}}`.
    pub fn persons_snapshot(&self) -> Value {
        let persons = self.persons.read().unwrap();
        Value::Object(
            persons
                .iter()
                .map(|(document_id, directory)| (document_id.clone(), directory.to_prompt_json()))
                .collect(),
        )
    }

    /// Everything stored, as `{document_id: {pii: [records]}}`.
    pub fn snapshot(&self) -> Result<Value> {
        let findings = self.findings.read().unwrap();
        let mut documents: Map<String, Value> = Map::new();
        for ((document_id, pii), records) in findings.iter() {
            let entry = documents
                .entry(document_id.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(by_pii) = entry {
                by_pii.insert(pii.clone(), serde_json::to_value(records)?);
            }
        }
        Ok(Value::Object(documents))
    }
}

#[async_trait]
impl FindingStore for MemoryStore {
    async fn drop_category(&self, document_id: &str, pii: &str) -> Result<()> {
        self.findings
            .write()
            .unwrap()
            .shift_remove(&(document_id.to_string(), pii.to_string()));
        Ok(())
    }

    async fn upsert(&self, document_id: &str, pii: &str, records: &[FindingRecord]) -> Result<()> {
        let mut findings = self.findings.write().unwrap();
        let stored = findings
            .entry((document_id.to_string(), pii.to_string()))
            .or_default();

        for record in records {
            match stored.iter_mut().find(|r| r.id() == record.id()) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PersonStore for MemoryStore {
    async fn list_persons(&self, document_id: &str) -> Result<PersonDirectory> {
        Ok(self
            .persons
            .read()
            .unwrap()
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_persons(&self, document_id: &str, persons: &PersonDirectory) -> Result<()> {
        self.persons
            .write()
            .unwrap()
            .entry(document_id.to_string())
            .or_default()
            .extend(persons.clone());
        Ok(())
    }

    async fn replace_persons(&self, document_id: &str, persons: &PersonDirectory) -> Result<()> {
        self.persons
            .write()
            .unwrap()
            .insert(document_id.to_string(), persons.clone());
        Ok(())
    }
}
