mod config;

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uplink::dispatch::select_transport;
use uplink::display::{format_file_size, platform_display_name};
use uplink::history::HistoryCache;
use uplink::orchestrator::{FileSelection, SubmitOutcome, Submitter};
use uplink::reconciler::Reconciler;
use uplink::record::{UploadStatus, UploadType};
use uplink::store::{HistoryStore, HttpHistoryStore};

#[derive(Parser)]
#[command(about = "Purchase-order and GRN upload pipeline")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "poflow.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the forwarding relay
    Relay,
    /// Submit one file to its processor
    Submit {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        platform: String,
        #[arg(long = "type", value_enum, default_value_t = UploadKind::Po)]
        upload_type: UploadKind,
    },
    /// Run the stale-record sweeper until interrupted
    Watch,
    /// Print the recent upload history
    History,
}

#[derive(Clone, Copy, ValueEnum)]
enum UploadKind {
    Po,
    Grn,
}

impl From<UploadKind> for UploadType {
    fn from(kind: UploadKind) -> Self {
        match kind {
            UploadKind::Po => UploadType::Po,
            UploadKind::Grn => UploadType::Grn,
        }
    }
}

fn install_metrics(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let Some(metrics) = &config.metrics else {
        return Ok(());
    };
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("poflow"))
        .map_err(|e| format!("could not build statsd recorder: {e}"))?;
    metrics::set_global_recorder(recorder)
        .map_err(|_| "a metrics recorder was already installed")?;
    Ok(())
}

fn build_history(
    config: &Config,
) -> Result<Option<(Arc<dyn HistoryStore>, Arc<HistoryCache>)>, Box<dyn std::error::Error>> {
    let Some(history) = &config.uplink.history else {
        tracing::warn!("no history store configured; uploads will not be recorded");
        return Ok(None);
    };
    let store: Arc<dyn HistoryStore> = Arc::new(HttpHistoryStore::new(history)?);
    let cache = Arc::new(HistoryCache::new(store.clone(), history.recent_limit));
    Ok(Some((store, cache)))
}

async fn submit(
    config: &Config,
    file: PathBuf,
    platform: String,
    upload_type: UploadType,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(&file).await?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or("file path has no usable name")?
        .to_string();
    let size = bytes.len() as u64;

    let (store, cache) = match build_history(config)? {
        Some((store, cache)) => (Some(store), Some(cache)),
        None => (None, None),
    };
    let transport = select_transport(&config.uplink);
    let submitter = Submitter::new(&config.uplink, transport, store, cache);

    submitter
        .choose_file(FileSelection {
            name: name.clone(),
            bytes: Bytes::from(bytes),
            content_type: None,
        })
        .await?;
    submitter.choose_platform(platform.clone()).await;
    submitter.choose_upload_type(upload_type).await;

    println!(
        "Submitting {name} ({}) for {}",
        format_file_size(size),
        platform_display_name(&platform)
    );
    match submitter.submit().await? {
        SubmitOutcome::Success { row_count } => match row_count {
            Some(rows) => println!("Processed successfully: {rows} rows"),
            None => println!("Processed successfully"),
        },
        SubmitOutcome::Failed { message } => {
            println!("Upload failed: {message}");
            std::process::exit(1);
        }
        SubmitOutcome::TimedOut => {
            println!("The processor did not respond in time; check the history for the outcome");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn watch(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let Some((store, _cache)) = build_history(config)? else {
        return Err("watch requires a history store".into());
    };
    let history = config.uplink.history.as_ref().ok_or("missing history")?;
    let reconciler = Reconciler::new(
        store,
        None,
        history.reconcile_interval(),
        history.stale_after(),
    );
    let handle = reconciler.spawn();
    println!("Sweeping stale records; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    handle.stop().await;
    Ok(())
}

async fn history(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let Some((_store, cache)) = build_history(config)? else {
        return Err("history requires a history store".into());
    };
    cache.refresh().await?;

    let rows = cache.snapshot().await;
    if rows.is_empty() {
        println!("No uploads yet");
        return Ok(());
    }
    for row in rows {
        let outcome = match row.status {
            UploadStatus::Processing => "processing".to_string(),
            UploadStatus::Success => match row.row_count {
                Some(rows) => format!("success ({rows} rows)"),
                None => "success".to_string(),
            },
            UploadStatus::Failed => match &row.error_message {
                Some(message) => format!("failed: {message}"),
                None => "failed".to_string(),
            },
        };
        println!(
            "{}  {:<10} {:<18} {:<10} {}",
            row.uploaded_at.format("%Y-%m-%d %H:%M:%S"),
            row.upload_type.label(),
            platform_display_name(&row.platform),
            row.file_name,
            outcome
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;
    install_metrics(&config)?;

    match cli.command {
        CliCommand::Relay => {
            let relay_config = config.relay.ok_or("no relay section in the config")?;
            relay::run(relay_config).await?;
        }
        CliCommand::Submit {
            file,
            platform,
            upload_type,
        } => submit(&config, file, platform, upload_type.into()).await?,
        CliCommand::Watch => watch(&config).await?,
        CliCommand::History => history(&config).await?,
    }
    Ok(())
}
