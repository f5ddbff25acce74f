//! workq CLI: run the work queue against the configured store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use workq::admission::{Admission, CompleteRecord};
use workq::config::{Config, EngineSettings};
use workq::model::work::{NewWorkRecord, WorkId};
use workq::store;
use workq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "workq", about = "Bounded work queue with retries and idempotent admission")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit work, process it, and report engine stats
    Run {
        /// Work type recorded on each record
        #[arg(long)]
        work_type: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Number of submissions
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Idempotency key shared by every submission
        #[arg(long)]
        key: Option<String>,
        /// How long to wait for the queue to drain
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        /// TOML file with engine settings, overriding the environment
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show a work record
    Show {
        /// Work record ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Run {
            work_type,
            payload,
            count,
            key,
            timeout_secs,
            config: settings_path,
        } => {
            let settings = match settings_path {
                Some(path) => EngineSettings::from_file(&path)?,
                None => config.engine.clone(),
            };
            let payload: serde_json::Value = match payload {
                Some(json) => serde_json::from_str(&json)?,
                None => serde_json::json!({}),
            };
            cmd_run(
                &config,
                settings,
                work_type,
                payload,
                count,
                key,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
        Command::Show { id } => cmd_show(&config, id).await,
    }
}

async fn cmd_run(
    config: &Config,
    settings: EngineSettings,
    work_type: String,
    payload: serde_json::Value,
    count: usize,
    key: Option<String>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let store = store::connect(config).await?;

    let engine = settings
        .builder()
        .dead_letter(|id| warn!(%id, "work dead-lettered"))
        .start(CompleteRecord::new(Arc::clone(&store)));
    let admission = Admission::new(store, Arc::new(engine));

    for _ in 0..count {
        let mut draft = NewWorkRecord::new(&work_type).payload(payload.clone());
        if let Some(ref key) = key {
            draft = draft.idempotency_key(key);
        }
        let outcome = admission.submit(draft).await?;
        let record = outcome.record();
        println!(
            "{}: {} (status: {})",
            if outcome.existed() { "Existing" } else { "Created" },
            record.id,
            record.status
        );
    }

    let engine = admission.engine();
    let idle = tokio::select! {
        idle = engine.wait_idle(timeout) => idle,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping");
            false
        }
    };
    if !idle {
        warn!(timeout_secs = timeout.as_secs(), "queue did not drain");
    }

    engine.stop().await;
    println!("{}", serde_json::to_string_pretty(&engine.stats())?);
    Ok(())
}

async fn cmd_show(config: &Config, id: String) -> anyhow::Result<()> {
    let id: WorkId = id
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid work record id: {id}"))?;
    let store = store::connect(config).await?;
    let record = store.get(id).await?;

    println!("ID:         {}", record.id);
    println!("Type:       {}", record.work_type);
    println!("Status:     {}", record.status);
    println!(
        "Payload:    {}",
        serde_json::to_string_pretty(&record.payload)?
    );
    if let Some(ref result) = record.result {
        println!("Result:     {}", serde_json::to_string_pretty(result)?);
    }
    println!("Created:    {}", record.created_at);
    println!("Updated:    {}", record.updated_at);
    Ok(())
}
