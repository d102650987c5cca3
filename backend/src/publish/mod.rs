//! Publishing validated tables.
//!
//! A [`Publisher`] upserts a [`ValidatedTable`] into a remote dataset keyed by
//! the identity field: rows with a known identity are replaced, new rows are
//! inserted, rows absent from the table are left alone.
//!
//! - [`SocrataClient`] - SODA upsert over HTTPS
//! - [`InMemoryPublisher`] - a map with the same semantics

pub mod memory;
pub mod socrata;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PublishResult;
use crate::validation::ValidatedTable;

pub use memory::InMemoryPublisher;
pub use socrata::{Credentials, SocrataClient, DEFAULT_BATCH_SIZE};

/// The remote dataset a table is published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetHandle {
    pub domain: String,
    pub dataset_id: String,
}

impl DatasetHandle {
    pub fn new(domain: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            dataset_id: dataset_id.into(),
        }
    }

    /// SODA resource endpoint receiving upserts.
    pub fn resource_url(&self) -> String {
        format!("https://{}/resource/{}.json", self.domain, self.dataset_id)
    }

    /// Human-facing dataset page.
    pub fn ui_url(&self) -> String {
        format!("https://{}/d/{}", self.domain, self.dataset_id)
    }
}

/// What the publisher reports after a successful upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Where the published data can be seen.
    pub url: String,
    pub rows_created: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
}

impl PublishReceipt {
    /// Add the counts of a later batch.
    pub fn absorb(&mut self, other: &PublishReceipt) {
        self.rows_created += other.rows_created;
        self.rows_updated += other.rows_updated;
        self.rows_deleted += other.rows_deleted;
    }
}

impl std::fmt::Display for PublishReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} created, {} updated)",
            self.url, self.rows_created, self.rows_updated
        )
    }
}

/// Idempotent upsert of a validated table.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn upsert(
        &self,
        dataset: &DatasetHandle,
        table: &ValidatedTable,
        row_id_field: &str,
    ) -> PublishResult<PublishReceipt>;
}
