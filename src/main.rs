use bulkpay::application::orchestrator::PayoutOrchestrator;
use bulkpay::config::{
    DEFAULT_CONCURRENCY_LIMIT, DEFAULT_SOURCE_CURRENCY, OrchestratorConfig, WebhookConfig,
};
use bulkpay::domain::payout::Payout;
use bulkpay::domain::ports::{BatchNotifierRef, PayoutRepositoryRef};
use bulkpay::infrastructure::in_memory::InMemoryPayoutRepository;
use bulkpay::infrastructure::log_notifier::LogNotifier;
use bulkpay::infrastructure::sandbox::SandboxGateway;
use bulkpay::infrastructure::webhook::WebhookNotifier;
use bulkpay::interfaces::csv::payout_reader::PayoutReader;
use bulkpay::interfaces::csv::payout_writer::PayoutWriter;
use bulkpay::telemetry;
use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long shutdown waits for background batches and notifications.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true, env = "BULKPAY_DB_PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a batch file to completion and print the report as CSV
    Submit {
        /// Input payouts CSV file
        input: PathBuf,

        /// Client reference; every payout reference id is derived from it
        #[arg(long)]
        batch_reference: String,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Print the aggregated state of a batch as JSON
    Status { batch_id: String },
    /// Print the most recent payouts as CSV
    List {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Re-drive payouts left PENDING or PROCESSING by an earlier run
    Resume {
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Quote exchange rates from the payment rail
    Rates {
        #[arg(long, default_value = DEFAULT_SOURCE_CURRENCY)]
        base: String,

        /// Comma separated quote currencies
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Maximum number of payouts talking to the rail at once
    #[arg(long, env = "BULKPAY_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY_LIMIT)]
    concurrency: usize,

    /// Currency the payouts are funded from
    #[arg(long, env = "BULKPAY_SOURCE_CURRENCY", default_value = DEFAULT_SOURCE_CURRENCY)]
    source_currency: String,

    /// Endpoint receiving the BATCH_COMPLETED webhook
    #[arg(long, env = "BULKPAY_WEBHOOK_URL")]
    webhook_url: Option<String>,
}

impl Default for EngineArgs {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY_LIMIT,
            source_currency: DEFAULT_SOURCE_CURRENCY.to_string(),
            webhook_url: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let repository = open_repository(cli.db_path.as_deref())?;

    match cli.command {
        Command::Submit {
            input,
            batch_reference,
            engine,
        } => {
            let orchestrator = build_orchestrator(repository, &engine)?;
            let batch_id = uuid::Uuid::new_v4().to_string();

            let file = File::open(input).into_diagnostic()?;
            let reader = PayoutReader::new(file);
            let mut payouts = Vec::new();
            for request in reader.requests() {
                match request {
                    Ok(request) => {
                        payouts.push(Payout::from_request(&batch_id, &batch_reference, request))
                    }
                    Err(e) => {
                        eprintln!("Error reading payout: {}", e);
                    }
                }
            }
            let order: HashMap<String, usize> = payouts
                .iter()
                .enumerate()
                .map(|(i, p)| (p.id.clone(), i))
                .collect();

            let mut batch = orchestrator.execute_batch(&batch_id, payouts).await?;
            batch
                .payouts
                .sort_by_key(|p| order.get(&p.id).copied().unwrap_or(usize::MAX));
            info!(
                batch_id = %batch.id,
                status = %batch.status,
                total_count = batch.total_count,
                total_amount = %batch.total_amount,
                "batch finished"
            );

            let stdout = io::stdout();
            let mut writer = PayoutWriter::new(stdout.lock());
            writer.write_payouts(&batch.payouts)?;

            orchestrator.shutdown(SHUTDOWN_GRACE).await;
        }
        Command::Status { batch_id } => {
            let orchestrator = build_orchestrator(repository, &EngineArgs::default())?;
            let batch = orchestrator.get_batch_status(&batch_id).await?;
            println!("{}", serde_json::to_string_pretty(&batch).into_diagnostic()?);
        }
        Command::List { limit } => {
            let orchestrator = build_orchestrator(repository, &EngineArgs::default())?;
            let payouts = orchestrator.list_payouts(limit).await?;

            let stdout = io::stdout();
            let mut writer = PayoutWriter::new(stdout.lock());
            writer.write_payouts(&payouts)?;
        }
        Command::Resume { engine } => {
            let orchestrator = build_orchestrator(repository, &engine)?;
            let resumed = orchestrator.resume_unfinished().await?;
            eprintln!("Resumed {} unfinished payouts", resumed);

            orchestrator.wait_idle().await;
            orchestrator.shutdown(SHUTDOWN_GRACE).await;
        }
        Command::Rates { base, symbols } => {
            let orchestrator = build_orchestrator(repository, &EngineArgs::default())?;
            let rates = orchestrator.quote_rates(&base, &symbols).await?;
            println!("{}", serde_json::to_string_pretty(&rates).into_diagnostic()?);
        }
    }

    Ok(())
}

fn build_orchestrator(
    repository: PayoutRepositoryRef,
    engine: &EngineArgs,
) -> Result<PayoutOrchestrator> {
    let notifier: BatchNotifierRef = match engine.webhook_url.as_deref() {
        Some(url) if !url.trim().is_empty() => {
            let config = WebhookConfig {
                url: Some(url.to_string()),
                ..WebhookConfig::default()
            };
            Arc::new(WebhookNotifier::new(&config).into_diagnostic()?)
        }
        _ => Arc::new(LogNotifier),
    };

    let config = OrchestratorConfig {
        concurrency_limit: engine.concurrency,
        source_currency: engine.source_currency.clone(),
        ..OrchestratorConfig::default()
    };

    let orchestrator =
        PayoutOrchestrator::builder(repository, Arc::new(SandboxGateway::new()), notifier)
            .config(config)
            .build()?;
    Ok(orchestrator)
}

fn open_repository(db_path: Option<&Path>) -> Result<PayoutRepositoryRef> {
    match db_path {
        Some(path) => open_rocksdb(path),
        None => Ok(Arc::new(InMemoryPayoutRepository::new())),
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_rocksdb(path: &Path) -> Result<PayoutRepositoryRef> {
    use bulkpay::infrastructure::rocksdb::RocksDbPayoutRepository;

    let repository = RocksDbPayoutRepository::open(path)?;
    Ok(Arc::new(repository))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_rocksdb(path: &Path) -> Result<PayoutRepositoryRef> {
    Err(miette::miette!(
        help = "rebuild with `--features storage-rocksdb`",
        "cannot open {}: persistent storage is not compiled in",
        path.display()
    ))
}
