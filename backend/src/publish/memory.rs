//! In-process publisher.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{DatasetHandle, PublishReceipt, Publisher};
use crate::error::{PublishError, PublishResult};
use crate::validation::ValidatedTable;

/// Keeps published rows in memory, keyed by identity.
///
/// Upserting replaces rows whose identity is already stored and inserts the
/// rest. Nothing is ever deleted.
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    rows: Mutex<BTreeMap<String, Value>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored rows, ordered by identity.
    pub async fn rows(&self) -> Vec<Value> {
        self.rows.lock().await.values().cloned().collect()
    }

    /// Stored identities, sorted.
    pub async fn row_ids(&self) -> Vec<String> {
        self.rows.lock().await.keys().cloned().collect()
    }

    pub async fn get(&self, row_id: &str) -> Option<Value> {
        self.rows.lock().await.get(row_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn upsert(
        &self,
        dataset: &DatasetHandle,
        table: &ValidatedTable,
        row_id_field: &str,
    ) -> PublishResult<PublishReceipt> {
        // Resolve every identity first so a bad table changes nothing
        let mut keyed = Vec::with_capacity(table.len());
        for record in table.records() {
            let row_id = record
                .get(row_id_field)
                .and_then(Value::as_str)
                .ok_or_else(|| PublishError::MissingIdentity(row_id_field.to_string()))?;
            keyed.push((row_id.to_string(), record.clone()));
        }

        let mut rows = self.rows.lock().await;
        let mut receipt = PublishReceipt {
            url: dataset.ui_url(),
            ..Default::default()
        };
        for (row_id, record) in keyed {
            match rows.insert(row_id, record) {
                Some(_) => receipt.rows_updated += 1,
                None => receipt.rows_created += 1,
            }
        }
        Ok(receipt)
    }
}
