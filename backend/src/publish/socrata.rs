//! Socrata SODA publisher.
//!
//! Upserts are `POST /resource/{dataset_id}.json` requests carrying the rows
//! as a JSON array, [`DEFAULT_BATCH_SIZE`] rows at a time. With a row
//! identifier configured on the dataset, Socrata replaces rows whose
//! identifier already exists and inserts the others.
//!
//! Batches that succeeded before a failing one stay applied. Upserts are
//! idempotent, so rerunning the source completes the load.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use citizen_connect::publish::{Credentials, DatasetHandle, Publisher, SocrataClient};
//!
//! let client = SocrataClient::new(Credentials::from_env()?);
//! let dataset = DatasetHandle::new("nhit-odp.data.socrata.com", "enbi-fu9w");
//! let receipt = client.upsert(&dataset, &validated, "row_id").await?;
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use super::{DatasetHandle, PublishReceipt, Publisher};
use crate::error::{ConfigError, ConfigResult, PublishError, PublishResult};
use crate::logs::log_info_indent;
use crate::validation::ValidatedTable;

/// Environment variable holding the API key id.
pub const KEY_ID_VAR: &str = "SOCRATA_KEY_ID";
/// Environment variable holding the API key secret.
pub const KEY_SECRET_VAR: &str = "SOCRATA_KEY_SECRET";

/// Rows sent per request.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// API key pair used for HTTP basic auth.
#[derive(Clone)]
pub struct Credentials {
    pub key_id: String,
    key_secret: String,
}

impl Credentials {
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        }
    }

    /// Read `SOCRATA_KEY_ID` and `SOCRATA_KEY_SECRET`, honouring `.env`.
    pub fn from_env() -> ConfigResult<Self> {
        let key_id = dotenvy::var(KEY_ID_VAR).map_err(|_| ConfigError::MissingEnv(KEY_ID_VAR.into()))?;
        let key_secret =
            dotenvy::var(KEY_SECRET_VAR).map_err(|_| ConfigError::MissingEnv(KEY_SECRET_VAR.into()))?;
        Ok(Self::new(key_id, key_secret))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &"***")
            .finish()
    }
}

/// SODA upsert response.
#[derive(Debug, Deserialize)]
struct UpsertResponse {
    #[serde(rename = "Rows Created", default)]
    rows_created: u64,
    #[serde(rename = "Rows Updated", default)]
    rows_updated: u64,
    #[serde(rename = "Rows Deleted", default)]
    rows_deleted: u64,
    #[serde(rename = "Errors", default)]
    errors: u64,
}

/// SODA error body.
#[derive(Debug, Deserialize)]
struct SodaError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// Publisher backed by the Socrata SODA API.
#[derive(Clone)]
pub struct SocrataClient {
    credentials: Credentials,
    http: reqwest::Client,
    batch_size: usize,
}

impl SocrataClient {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            http: reqwest::Client::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Rows per request; zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn post_batch(&self, url: &str, rows: &[Value], dataset: &DatasetHandle) -> PublishResult<PublishReceipt> {
        let response = self
            .http
            .post(url)
            .basic_auth(&self.credentials.key_id, Some(&self.credentials.key_secret))
            .json(rows)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        parse_upsert_response(status, &body, dataset)
    }
}

#[async_trait]
impl Publisher for SocrataClient {
    async fn upsert(
        &self,
        dataset: &DatasetHandle,
        table: &ValidatedTable,
        row_id_field: &str,
    ) -> PublishResult<PublishReceipt> {
        if table.records().iter().any(|r| r.get(row_id_field).is_none()) {
            return Err(PublishError::MissingIdentity(row_id_field.to_string()));
        }

        let url = dataset.resource_url();
        let batches = table.len().div_ceil(self.batch_size);
        let mut receipt = PublishReceipt {
            url: dataset.ui_url(),
            ..Default::default()
        };

        for (idx, rows) in table.records().chunks(self.batch_size).enumerate() {
            log_info_indent(
                format!("POST {} (batch {}/{}, {} rows)", url, idx + 1, batches, rows.len()),
                1,
            );
            let batch = self.post_batch(&url, rows, dataset).await?;
            receipt.absorb(&batch);
        }
        Ok(receipt)
    }
}

/// Turn a SODA upsert response into a receipt.
fn parse_upsert_response(status: u16, body: &str, dataset: &DatasetHandle) -> PublishResult<PublishReceipt> {
    if !(200..300).contains(&status) {
        let message = match serde_json::from_str::<SodaError>(body) {
            Ok(err) => match err.code {
                Some(code) => format!("{}: {}", code, err.message),
                None => err.message,
            },
            Err(_) => body.chars().take(500).collect(),
        };
        return Err(PublishError::Service { status, message });
    }

    let response: UpsertResponse = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        PublishError::InvalidResponse(format!("{}: {}", e, preview))
    })?;

    if response.errors > 0 {
        return Err(PublishError::RowErrors(response.errors));
    }

    Ok(PublishReceipt {
        url: dataset.ui_url(),
        rows_created: response.rows_created,
        rows_updated: response.rows_updated,
        rows_deleted: response.rows_deleted,
    })
}
