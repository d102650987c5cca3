//! Citizen Connect CLI - load statistical sources into the Socrata dataset
//!
//! # Main Commands
//!
//! ```bash
//! citizen-connect run                       # Load every configured source
//! citizen-connect run --config p.json       # Use a pipeline file
//! citizen-connect run --dry-run             # Validate only, publish nothing
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! citizen-connect normalize --source ACS5   # Print the keyed table as JSON
//! citizen-connect validate table.json       # Check a JSON table against the contract
//! citizen-connect sources                   # List configured sources
//! ```
//!
//! Exit status is 0 once sources have been attempted, whatever their
//! individual outcome; startup problems exit 1.

use citizen_connect::logs::{log_error, LOG_BROADCASTER};
use citizen_connect::models::to_table;
use citizen_connect::transform::pipeline::keyed_rows;
use citizen_connect::{
    Credentials, InMemoryPublisher, Pipeline, PipelineConfig, Publisher, SocrataClient,
    SocrataSettings, SourceDefinition, SourceJob, TableSchema,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "citizen-connect")]
#[command(about = "Load statistical source data into the Citizen Connect dataset", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize, validate and upsert every configured source
    Run {
        /// Pipeline configuration file (default: built-in ACS5 source)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Validate without publishing
        #[arg(long)]
        dry_run: bool,
    },

    /// Print one source's keyed canonical table as JSON
    Normalize {
        /// Source name
        #[arg(short, long)]
        source: String,

        /// Pipeline configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a JSON table against the dataset contract
    Validate {
        /// Input JSON file (array of rows)
        input: PathBuf,
    },

    /// List configured sources
    Sources {
        /// Pipeline configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config, dry_run } => cmd_run(config.as_deref(), dry_run).await,
        Commands::Normalize { source, config, output } => {
            cmd_normalize(&source, config.as_deref(), output.as_deref()).await
        }
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Sources { config } => cmd_sources(config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn cmd_run(config: Option<&Path>, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig::load_or_default(config)?;
    let settings = SocrataSettings::from_env();

    eprintln!("📤 Target dataset: {}", settings.dataset().ui_url());
    if dry_run {
        eprintln!("   Dry run: nothing will be published");
        run_all(InMemoryPublisher::new(), &settings, &config.sources, true).await?;
    } else {
        let client = SocrataClient::new(Credentials::from_env()?);
        run_all(client, &settings, &config.sources, false).await?;
    }

    // Per-source failures are reported above and do not change the exit status
    Ok(())
}

async fn run_all<P: Publisher>(
    publisher: P,
    settings: &SocrataSettings,
    sources: &[SourceDefinition],
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = Pipeline::new(publisher, settings.dataset(), TableSchema::canonical_now()?)
        .dry_run(dry_run)
        .run_definitions(sources)
        .await;

    eprintln!("\n📊 Run {}:", summary.run_id);
    for outcome in &summary.outcomes {
        let marker = if outcome.is_failure() { "❌" } else { "✅" };
        eprintln!("   {} {}: {}", marker, outcome.source(), outcome.summary());
    }
    Ok(())
}

async fn cmd_normalize(
    source: &str,
    config: Option<&Path>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig::load_or_default(config)?;
    let definition = config.source(source)?;
    let job = SourceJob::from_definition(definition)?;

    let (rows, outcome) = match keyed_rows(&job, &LOG_BROADCASTER).await {
        Ok(result) => result,
        Err(e) => {
            log_error(format!("{} failed: {}", e.stage(), e));
            return Err(e.into());
        }
    };
    eprintln!("⚙️  {}: {} keyed rows ({})", job.name(), rows.len(), outcome.summary());

    let json = serde_json::to_string_pretty(&to_table(&rows))?;
    write_output(&json, output)?;
    Ok(())
}

fn cmd_validate(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("✔️  Validating: {}", input.display());

    let content = fs::read_to_string(input)?;
    let records: Vec<Value> = serde_json::from_str(&content)?;

    let report = TableSchema::canonical_now()?.check(&records);
    if report.is_valid() {
        eprintln!("✅ All {} rows satisfy the dataset contract", report.rows_checked);
        return Ok(());
    }

    eprintln!("\n❌ Table rejected ({} rows checked):", report.rows_checked);
    for violation in &report.violations {
        eprintln!("   - {}", violation);
    }
    std::process::exit(1)
}

fn cmd_sources(config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig::load_or_default(config)?;

    eprintln!("📋 Configured sources ({}):\n", config.sources.len());
    for source in &config.sources {
        println!("  📄 {}", source.name);
        println!("     Input: {}", source.input.display());
        println!("     Reference: {}", source.reference.display());
        println!("     Variables: {}", source.variables.len());
        println!(
            "     Years: {}",
            source.years.iter().map(|y| y.to_string()).collect::<Vec<_>>().join(", ")
        );
        match source.geography.in_geo {
            Some(ref in_geo) => println!("     Geography: {} in {}", source.geography.for_geo, in_geo),
            None => println!("     Geography: {}", source.geography.for_geo),
        }
        for rule in &source.boundary_rules {
            println!(
                "     Rule: {} before {}, {} from {}",
                rule.old_code, rule.boundary_year, rule.new_code, rule.boundary_year
            );
        }
        println!();
    }
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
