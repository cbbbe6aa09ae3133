use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::BufReader;
use tokio::signal;

use ara_variation_engine::bulk::{
    recipients_from_lines, BulkProcessor, CampaignJob, CancelHandle, JsonLinesSink, Recipient,
};
use ara_variation_engine::cache::TemplateCache;
use ara_variation_engine::config::Settings;
use ara_variation_engine::error::Result;
use ara_variation_engine::telemetry::init_telemetry;
use ara_variation_engine::template::validate;
use ara_variation_engine::tracker::{ExportFormat, VariationTracker};

/// Message variation template engine
#[derive(Parser, Debug)]
#[command(name = "ara-variation", version)]
#[command(about = "Validate variation templates and render campaigns")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a template file and print the report as JSON
    Validate {
        /// Template file
        file: PathBuf,
    },
    /// Render a campaign job, writing one JSON line per delivered message
    Run {
        /// Job file: { campaign_id, template, concurrency?, recipients }
        job: PathBuf,

        /// Additional recipients as JSON lines, streamed after the job's own
        #[arg(long)]
        recipients: Option<PathBuf>,

        /// Worker count, overriding the job and configuration
        #[arg(long, short = 'c')]
        concurrency: Option<usize>,

        /// Statistics format printed to stderr when the run ends
        #[arg(long, env = "VARIATION_EXPORT_FORMAT")]
        export: Option<ExportFormat>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::new().context("Failed to load configuration")?;
    init_telemetry(&settings.logging)?;
    tracing::debug!("Configuration loaded");

    let result = match cli.command {
        Command::Validate { file } => validate_file(file).await,
        Command::Run {
            job,
            recipients,
            concurrency,
            export,
        } => run_job(&settings, job, recipients, concurrency, export).await,
    };

    if let Err(err) = result {
        tracing::error!(code = err.code(), error = %err, "Command failed");
        match serde_json::to_string_pretty(&err.to_response()) {
            Ok(body) => eprintln!("{}", body),
            Err(_) => eprintln!("{}", err),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn validate_file(file: PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(&file).await.inspect_err(|e| {
        tracing::error!(path = %file.display(), error = %e, "Failed to read template");
    })?;

    let report = validate(&raw);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_job(
    settings: &Settings,
    job_path: PathBuf,
    extra_recipients: Option<PathBuf>,
    concurrency: Option<usize>,
    export: Option<ExportFormat>,
) -> Result<()> {
    let contents = tokio::fs::read_to_string(&job_path).await.inspect_err(|e| {
        tracing::error!(path = %job_path.display(), error = %e, "Failed to read job");
    })?;
    let job = CampaignJob::from_json(&contents)?;

    // Create engine components
    let cache = Arc::new(TemplateCache::new(settings.cache.to_cache_config())?);
    let tracker = Arc::new(VariationTracker::new());
    let processor = BulkProcessor::new(
        cache,
        tracker.clone(),
        settings.render.renderer(),
        settings.bulk.to_bulk_config(),
    );

    let mut recipients: BoxStream<'static, Recipient> = stream::iter(job.recipients).boxed();
    if let Some(path) = extra_recipients {
        let file = tokio::fs::File::open(&path).await.inspect_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to open recipients");
        })?;
        recipients = recipients
            .chain(recipients_from_lines(BufReader::new(file)))
            .boxed();
    }

    let run = processor
        .process(
            &job.campaign_id,
            &job.template,
            recipients,
            concurrency.or(job.concurrency),
        )
        .await?;
    tracing::info!(
        run_id = %run.run_id(),
        campaign_id = %job.campaign_id,
        "Campaign run started"
    );

    let cancel = run.cancel_handle();
    let signal_task = tokio::spawn(cancel_on_signal(cancel));

    let sink = JsonLinesSink::new(tokio::io::stdout());
    let summary = run.deliver_to(&sink).await;
    signal_task.abort();

    for failure in &summary.failures {
        tracing::warn!(
            recipient_id = %failure.recipient_id,
            error = %failure.kind,
            "Recipient not delivered"
        );
    }
    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        delivery_failures = summary.delivery_failures,
        cancelled = summary.cancelled,
        "Campaign run finished"
    );

    let format = export.unwrap_or(settings.tracker.export_format);
    match tracker.export(&job.campaign_id, format) {
        Ok(stats) => eprintln!("{}", stats),
        Err(e) => tracing::warn!(error = %e, "No statistics to export"),
    }
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

/// Cancel the run on Ctrl+C or SIGTERM; renders in progress still finish
async fn cancel_on_signal(cancel: CancelHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, cancelling campaign run");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, cancelling campaign run");
        }
    }

    cancel.cancel();
}
