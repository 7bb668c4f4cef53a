//! Persistence traits for findings and persons.
//!
//! Operations needed from the graph database:
//! - `FindingStore::drop_category`: remove a PII type's nodes for a document
//! - `FindingStore::upsert`: write records tagged with a document id
//! - `PersonStore::list_persons`: read back the persons of a document
//! - `PersonStore::upsert_persons` / `replace_persons`: write recognized persons

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{finding::FindingRecord, person::PersonDirectory};

/// Write side for extracted findings.
///
/// Keys are `(document_id, pii)`, so concurrent writers for different PII
/// types never collide.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Remove every record of `pii` for the document.
    ///
    /// Must complete before the first `upsert` for the same key.
    async fn drop_category(&self, document_id: &str, pii: &str) -> Result<()>;

    /// Insert or replace records for the document.
    async fn upsert(&self, document_id: &str, pii: &str, records: &[FindingRecord])
        -> Result<()>;
}

/// Persons resolved for a document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersonStore: Send + Sync {
    async fn list_persons(&self, document_id: &str) -> Result<PersonDirectory>;

    /// Insert or replace persons by id, keeping the others.
    async fn upsert_persons(&self, document_id: &str, persons: &PersonDirectory) -> Result<()>;

    /// Replace the whole directory of the document.
    async fn replace_persons(&self, document_id: &str, persons: &PersonDirectory) -> Result<()>;
}
