//! Source-by-source loading pipeline.
//!
//! Each configured source goes through, in order:
//!
//! ```text
//! fetch → normalize → assign row_id → validate (whole table) → upsert
//! ```
//!
//! A source that fails at any step is logged and skipped; the next source
//! still runs. Nothing is shared between sources.
//!
//! # Example
//!
//! ```rust,ignore
//! use citizen_connect::transform::pipeline::{Pipeline, SourceJob};
//!
//! let pipeline = Pipeline::new(client, settings.dataset(), TableSchema::canonical_now()?);
//! let jobs = config.sources.iter().map(SourceJob::from_definition).collect::<Result<Vec<_>, _>>()?;
//! let summary = pipeline.run(&jobs).await;
//! println!("{} succeeded, {} failed", summary.succeeded(), summary.failed());
//! ```

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::identity::assign_row_ids;
use super::normalize::{normalize, DropReason, NormalizeOutcome};
use crate::config::SourceDefinition;
use crate::error::{ConfigResult, PipelineError, PipelineResult};
use crate::logs::{LogBroadcaster, LogEntry, LogLevel, LOG_BROADCASTER};
use crate::models::{to_table, KeyedRow, ROW_ID_FIELD};
use crate::publish::{DatasetHandle, PublishReceipt, Publisher};
use crate::reference::ReferenceTable;
use crate::sources::{FileFetcher, SourceFetcher};
use crate::validation::{TableSchema, ValidatedTable};

// =============================================================================
// Jobs and outcomes
// =============================================================================

/// Everything needed to process one source.
pub struct SourceJob {
    pub definition: SourceDefinition,
    pub fetcher: Box<dyn SourceFetcher>,
    pub reference: ReferenceTable,
}

impl SourceJob {
    pub fn new(
        definition: SourceDefinition,
        fetcher: Box<dyn SourceFetcher>,
        reference: ReferenceTable,
    ) -> Self {
        Self { definition, fetcher, reference }
    }

    /// Job reading the definition's input file, with its reference labels loaded.
    pub fn from_definition(definition: &SourceDefinition) -> ConfigResult<Self> {
        let reference = ReferenceTable::load(&definition.reference)?;
        let fetcher = Box::new(FileFetcher::new(&definition.input));
        Ok(Self::new(definition.clone(), fetcher, reference))
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// How one source run ended.
#[derive(Debug)]
pub enum SourceOutcome {
    /// The table was upserted.
    Published { source: String, rows: usize, receipt: PublishReceipt },
    /// The table passed validation and publishing was skipped (dry run).
    Validated { source: String, rows: usize },
    /// Nothing survived normalization; nothing was published.
    Empty { source: String },
    /// The run stopped at the failing stage.
    Failed { source: String, error: PipelineError },
}

impl SourceOutcome {
    pub fn source(&self) -> &str {
        match self {
            Self::Published { source, .. }
            | Self::Validated { source, .. }
            | Self::Empty { source }
            | Self::Failed { source, .. } => source,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// One-line summary for the end of a source run.
    pub fn summary(&self) -> String {
        match self {
            Self::Published { rows, receipt, .. } => {
                format!("Published {} rows: {}", rows, receipt)
            }
            Self::Validated { rows, .. } => format!("Validated {} rows (dry run, not published)", rows),
            Self::Empty { .. } => "No rows left after normalization; nothing published".to_string(),
            Self::Failed { error, .. } => format!("Skipped after {} failure: {}", error.stage(), error),
        }
    }

    fn level(&self) -> LogLevel {
        match self {
            Self::Published { .. } | Self::Validated { .. } => LogLevel::Success,
            Self::Empty { .. } => LogLevel::Warning,
            Self::Failed { .. } => LogLevel::Error,
        }
    }
}

/// Result of a whole run.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<SourceOutcome>,
}

impl RunSummary {
    fn start(sources: usize, logs: &LogBroadcaster) -> Self {
        let summary = Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            outcomes: Vec::with_capacity(sources),
        };
        logs.log(LogEntry::info(format!("Run {} started with {} source(s)", summary.run_id, sources)));
        summary
    }

    fn finish(self, logs: &LogBroadcaster) -> Self {
        let message = format!(
            "Run {} finished: {} succeeded, {} failed",
            self.run_id,
            self.succeeded(),
            self.failed()
        );
        if self.failed() == 0 {
            logs.log(LogEntry::success(message));
        } else {
            logs.log(LogEntry::warning(message));
        }
        self
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failure()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }
}

// =============================================================================
// Steps
// =============================================================================

/// Fetch, normalize and key one source.
///
/// The returned outcome keeps the drop record; its rows have moved into the
/// keyed rows.
pub async fn keyed_rows(
    job: &SourceJob,
    logs: &LogBroadcaster,
) -> PipelineResult<(Vec<KeyedRow>, NormalizeOutcome)> {
    let name = job.name();

    logs.log_source(LogLevel::Info, name, "Fetching raw table");
    let raw = job.fetcher.fetch(&job.definition.request()).await?;

    logs.log_source(LogLevel::Info, name, format!("Normalizing {} raw rows", raw.len()));
    let mut outcome = normalize(&raw, &job.reference, &job.definition.normalizer_config())?;
    logs.log_source(LogLevel::Info, name, outcome.summary());
    for dropped in &outcome.dropped {
        if let DropReason::MalformedGeometry(ref message) = dropped.reason {
            logs.log_source(
                LogLevel::Warning,
                name,
                format!("Dropped raw row {}: malformed geometry ({})", dropped.row, message),
            );
        }
    }

    let rows = assign_row_ids(std::mem::take(&mut outcome.rows));
    Ok((rows, outcome))
}

// =============================================================================
// Pipeline
// =============================================================================

/// Runs sources against one dataset through one publisher.
pub struct Pipeline<P: Publisher> {
    publisher: P,
    dataset: DatasetHandle,
    schema: TableSchema,
    dry_run: bool,
    logs: LogBroadcaster,
}

impl<P: Publisher> Pipeline<P> {
    /// Pipeline validating against `schema`, logging to the global broadcaster.
    pub fn new(publisher: P, dataset: DatasetHandle, schema: TableSchema) -> Self {
        Self {
            publisher,
            dataset,
            schema,
            dry_run: false,
            logs: (*LOG_BROADCASTER).clone(),
        }
    }

    /// Send the run's log lines to another broadcaster.
    pub fn with_logs(mut self, logs: LogBroadcaster) -> Self {
        self.logs = logs;
        self
    }

    /// Validate without publishing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn dataset(&self) -> &DatasetHandle {
        &self.dataset
    }

    fn log(&self, level: LogLevel, source: &str, message: impl Into<String>) {
        self.logs.log_source(level, source, message);
    }

    /// Everything up to and including validation.
    pub async fn prepare(&self, job: &SourceJob) -> PipelineResult<(ValidatedTable, NormalizeOutcome)> {
        let (rows, outcome) = keyed_rows(job, &self.logs).await?;

        self.log(LogLevel::Info, job.name(), format!("Validating {} rows", rows.len()));
        let table = self.schema.validate(to_table(&rows))?;
        Ok((table, outcome))
    }

    /// Process one source end to end. Never fails; the outcome says how it ended.
    pub async fn run_source(&self, job: &SourceJob) -> SourceOutcome {
        let source = job.name().to_string();
        let outcome = match self.publish_source(job).await {
            Ok(outcome) => outcome,
            Err(error) => SourceOutcome::Failed { source, error },
        };
        self.log(outcome.level(), job.name(), outcome.summary());
        outcome
    }

    async fn publish_source(&self, job: &SourceJob) -> PipelineResult<SourceOutcome> {
        let source = job.name().to_string();
        let (table, _) = self.prepare(job).await?;

        if table.is_empty() {
            return Ok(SourceOutcome::Empty { source });
        }
        let rows = table.len();
        if self.dry_run {
            return Ok(SourceOutcome::Validated { source, rows });
        }

        self.log(
            LogLevel::Info,
            &source,
            format!("Upserting into {}", self.dataset.dataset_id),
        );
        let receipt = self.publisher.upsert(&self.dataset, &table, ROW_ID_FIELD).await?;
        Ok(SourceOutcome::Published { source, rows, receipt })
    }

    /// Process every source in order.
    pub async fn run(&self, jobs: &[SourceJob]) -> RunSummary {
        let mut summary = RunSummary::start(jobs.len(), &self.logs);
        for job in jobs {
            summary.outcomes.push(self.run_source(job).await);
        }
        summary.finish(&self.logs)
    }

    /// Process configured sources in order, loading each one's reference
    /// labels first. A source whose labels cannot be loaded fails alone.
    pub async fn run_definitions(&self, definitions: &[SourceDefinition]) -> RunSummary {
        let mut summary = RunSummary::start(definitions.len(), &self.logs);
        for definition in definitions {
            let outcome = match SourceJob::from_definition(definition) {
                Ok(job) => self.run_source(&job).await,
                Err(e) => {
                    let outcome = SourceOutcome::Failed {
                        source: definition.name.clone(),
                        error: e.into(),
                    };
                    self.log(outcome.level(), &definition.name, outcome.summary());
                    outcome
                }
            };
            summary.outcomes.push(outcome);
        }
        summary.finish(&self.logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, FetchResult};
    use crate::models::RawTable;
    use crate::publish::InMemoryPublisher;
    use crate::reference::ReferenceEntry;
    use crate::sources::{FetchRequest, GeoScope};
    use crate::transform::normalize::GeometryPolicy;
    use crate::transform::rules::BoundaryRule;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::path::PathBuf;

    /// Returns a fixed table, or fails when it has none.
    struct StaticFetcher {
        table: Option<RawTable>,
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> FetchResult<RawTable> {
            self.table
                .clone()
                .ok_or_else(|| FetchError::Parse("connection reset".into()))
        }
    }

    fn raw(variable: &str, year: i64, value: Value, geo_id: &str) -> Map<String, Value> {
        json!({
            "variable_code": variable,
            "value": value,
            "name": format!("County {}", geo_id),
            "date": format!("{}-12-31", year),
            "year": year,
            "geometry": { "type": "Point", "coordinates": [-86.64, 32.53] },
            "geo_id": geo_id,
            "geo_type": "county",
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn sample_records() -> Vec<Map<String, Value>> {
        vec![
            raw("DP05_0017E", 2016, json!(37.9), "0500000US01001"),
            raw("DP05_0017E", 2017, json!(38.0), "0500000US01001"),
            raw("DP05_0018E", 2016, json!(37.9), "0500000US01001"),
            raw("DP05_0018E", 2017, json!(38.1), "0500000US01001"),
            raw("DP05_0018E", 2018, json!(38.4), "0500000US01001"),
            raw("DP05_0018E", 2018, json!(41.2), "0500000US01003"),
            raw("DP05_0018E", 2018, Value::Null, "0500000US01005"),
            raw("S1701_C02_001E", 2018, json!(6500.0), "0500000US01001"),
            raw("S1701_C01_001E", 2018, json!(54000.0), "0500000US01001"),
        ]
    }

    fn reference() -> ReferenceTable {
        let entry = |variable: &str, label: &str| ReferenceEntry {
            variable: variable.into(),
            topic: Some("Demographics".into()),
            concept: Some("Test".into()),
            label: Some(label.into()),
            ..Default::default()
        };
        ReferenceTable::new(vec![
            entry("DP05_0017E", "Median age (years)"),
            entry("DP05_0018E", "Median age (years)"),
            entry("S1701_C01_001E", "Population for whom poverty status is determined"),
            ReferenceEntry {
                denominator_variable: Some("S1701_C01_001E".into()),
                denominator_label: Some("Population for whom poverty status is determined".into()),
                ..entry("S1701_C02_001E", "Below poverty level")
            },
        ])
    }

    fn definition(name: &str) -> SourceDefinition {
        SourceDefinition {
            name: name.into(),
            input: PathBuf::from("unused.csv"),
            reference: PathBuf::from("unused_labels.csv"),
            variables: vec![],
            years: vec![2016, 2017, 2018],
            geography: GeoScope::default(),
            boundary_rules: vec![BoundaryRule::new("DP05_0017E", "DP05_0018E", 2017)],
            malformed_geometry: GeometryPolicy::DropRow,
        }
    }

    fn job(name: &str, records: Option<Vec<Map<String, Value>>>) -> SourceJob {
        SourceJob::new(
            definition(name),
            Box::new(StaticFetcher { table: records.map(RawTable::from_records) }),
            reference(),
        )
    }

    fn pipeline() -> Pipeline<InMemoryPublisher> {
        Pipeline::new(
            InMemoryPublisher::new(),
            DatasetHandle::new("data.example.org", "test-0001"),
            TableSchema::canonical(2024).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_publish() {
        let pipeline = pipeline();
        let outcome = pipeline.run_source(&job("ACS5", Some(sample_records()))).await;

        match outcome {
            SourceOutcome::Published { rows, ref receipt, .. } => {
                // 2 superseded and 1 null value dropped
                assert_eq!(rows, 6);
                assert_eq!(receipt.rows_created, 6);
                assert_eq!(receipt.url, "https://data.example.org/d/test-0001");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let ids = pipeline.publisher().row_ids().await;
        assert!(ids.contains(&"ACS5|DP05_0017E||2016|0500000US01001".to_string()));
        assert!(ids.contains(&"ACS5|DP05_0018E||2017|0500000US01001".to_string()));
        assert!(!ids.contains(&"ACS5|DP05_0017E||2017|0500000US01001".to_string()));
        assert!(!ids.iter().any(|id| id.ends_with("0500000US01005")));

        let poverty = pipeline
            .publisher()
            .get("ACS5|S1701_C02_001E|S1701_C01_001E|2018|0500000US01001")
            .await
            .unwrap();
        assert_eq!(poverty["denominator"], json!(54000.0));
        assert_eq!(poverty["location"], json!("POINT (-86.64 32.53)"));
    }

    #[tokio::test]
    async fn test_two_runs_give_identical_row_ids() {
        let pipeline = pipeline();
        let (first, _) = pipeline.prepare(&job("ACS5", Some(sample_records()))).await.unwrap();
        let (second, _) = pipeline.prepare(&job("ACS5", Some(sample_records()))).await.unwrap();

        let mut a = first.row_ids();
        let mut b = second.row_ids();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_republish_updates_in_place() {
        let pipeline = pipeline();
        pipeline.run_source(&job("ACS5", Some(sample_records()))).await;

        let mut revised = sample_records();
        revised[4].insert("value".into(), json!(38.6));
        let outcome = pipeline.run_source(&job("ACS5", Some(revised))).await;

        match outcome {
            SourceOutcome::Published { ref receipt, .. } => {
                assert_eq!(receipt.rows_created, 0);
                assert_eq!(receipt.rows_updated, 6);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(pipeline.publisher().len().await, 6);
        let row = pipeline
            .publisher()
            .get("ACS5|DP05_0018E||2018|0500000US01001")
            .await
            .unwrap();
        assert_eq!(row["value"], json!(38.6));
    }

    #[tokio::test]
    async fn test_validation_failure_skips_source_and_continues() {
        let mut bad = sample_records();
        // year_date disagrees with year
        bad[4].insert("date".into(), json!("2019-01-01"));

        let pipeline = pipeline();
        let summary = pipeline
            .run(&[job("BAD", Some(bad)), job("GOOD", Some(sample_records()))])
            .await;

        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.succeeded(), 1);
        match &summary.outcomes[0] {
            SourceOutcome::Failed { source, error } => {
                assert_eq!(source, "BAD");
                assert_eq!(error.stage(), "validation");
                assert!(error.to_string().contains("year_date_matches_year"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Nothing from the rejected table reached the dataset
        let ids = pipeline.publisher().row_ids().await;
        assert_eq!(ids.len(), 6);
        assert!(ids.iter().all(|id| id.starts_with("GOOD|")));
    }

    #[tokio::test]
    async fn test_missing_geo_id_column_fails_normalization() {
        let records: Vec<_> = sample_records()
            .into_iter()
            .map(|mut r| {
                r.remove("geo_id");
                r
            })
            .collect();

        let pipeline = pipeline();
        let err = pipeline.prepare(&job("ACS5", Some(records))).await.unwrap_err();
        assert_eq!(err.stage(), "normalization");
        assert!(err.to_string().contains("geo_id"));
        assert_eq!(pipeline.publisher().len().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_continues() {
        let pipeline = pipeline();
        let summary = pipeline
            .run(&[job("DOWN", None), job("ACS5", Some(sample_records()))])
            .await;

        assert!(matches!(
            summary.outcomes[0],
            SourceOutcome::Failed { error: PipelineError::Fetch(_), .. }
        ));
        assert!(matches!(summary.outcomes[1], SourceOutcome::Published { .. }));
    }

    #[tokio::test]
    async fn test_missing_reference_fails_only_that_source() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("acs5.json");
        let records: Vec<Value> = sample_records().into_iter().map(Value::Object).collect();
        std::fs::write(&input, serde_json::to_string(&records).unwrap()).unwrap();
        let labels = dir.path().join("labels.csv");
        std::fs::write(
            &labels,
            "variable,topic,concept,label,denominator_variable,denominator_label\n\
             DP05_0017E,Age,Median age,Median age (years),,\n\
             DP05_0018E,Age,Median age,Median age (years),,\n\
             S1701_C01_001E,Income,Poverty,Population for whom poverty status is determined,,\n\
             S1701_C02_001E,Income,Poverty,Below poverty level,S1701_C01_001E,Population for whom poverty status is determined\n",
        )
        .unwrap();

        let broken = SourceDefinition {
            reference: dir.path().join("missing.csv"),
            ..definition("BROKEN")
        };
        let working = SourceDefinition {
            input,
            reference: labels,
            ..definition("ACS5")
        };

        let pipeline = pipeline();
        let summary = pipeline.run_definitions(&[broken, working]).await;

        assert!(matches!(
            summary.outcomes[0],
            SourceOutcome::Failed { error: PipelineError::Config(_), .. }
        ));
        assert!(matches!(summary.outcomes[1], SourceOutcome::Published { rows: 6, .. }));
    }

    #[tokio::test]
    async fn test_row_without_geo_type_rejects_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("acs5.json");
        let mut records: Vec<Value> = sample_records().into_iter().map(Value::Object).collect();
        records[5]["geo_type"] = json!("");
        std::fs::write(&input, serde_json::to_string(&records).unwrap()).unwrap();

        let job = SourceJob::new(definition("ACS5"), Box::new(FileFetcher::new(&input)), reference());
        let pipeline = pipeline();
        let outcome = pipeline.run_source(&job).await;

        match outcome {
            SourceOutcome::Failed { ref error, .. } => {
                assert_eq!(error.stage(), "validation");
                assert!(error.to_string().contains("geo_type:nullable"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(pipeline.publisher().len().await, 0);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_publish() {
        let pipeline = pipeline().dry_run(true);
        let outcome = pipeline.run_source(&job("ACS5", Some(sample_records()))).await;

        assert!(matches!(outcome, SourceOutcome::Validated { rows: 6, .. }));
        assert_eq!(pipeline.publisher().len().await, 0);
    }

    #[tokio::test]
    async fn test_all_rows_dropped_is_empty() {
        let records = vec![raw("DP05_0018E", 2018, Value::Null, "0500000US01001")];
        let pipeline = pipeline();
        let outcome = pipeline.run_source(&job("ACS5", Some(records))).await;
        assert!(matches!(outcome, SourceOutcome::Empty { .. }));
    }

    #[tokio::test]
    async fn test_summary_line_logged_per_source() {
        let logs = LogBroadcaster::new();
        let mut rx = logs.subscribe();
        let pipeline = pipeline().with_logs(logs);
        pipeline
            .run(&[job("ACS5", Some(sample_records())), job("DOWN", None)])
            .await;

        let mut entries = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            entries.push(entry);
        }
        let summaries: Vec<_> = entries
            .iter()
            .filter(|e| matches!(e.level, LogLevel::Success | LogLevel::Error) && e.source.is_some())
            .collect();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].source.as_deref(), Some("ACS5"));
        assert!(summaries[0].message.starts_with("Published 6 rows"));
        assert_eq!(summaries[1].source.as_deref(), Some("DOWN"));
        assert!(summaries[1].message.starts_with("Skipped after fetch failure"));

        // The run ends with one failure, reported as a warning
        let last = entries.last().unwrap();
        assert_eq!(last.level, LogLevel::Warning);
        assert!(last.message.ends_with("1 succeeded, 1 failed"));
    }
}
