use anyhow::{Context, Result};
use drover_core::{ConfigPatch, ConfigStore, PoolConfig};
use drover_runtime::{
    CancellationToken, EnvTokens, RequestBatch, ReqwestClient, ResilientClient, WorkerPool,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::args::RunArgs;
use crate::input;
use crate::report::Report;

/// Build the configuration store: file (or defaults), then environment, then `overrides`.
pub fn load_config(path: Option<&Path>, overrides: ConfigPatch) -> Result<ConfigStore> {
    let base = match path {
        Some(path) => PoolConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PoolConfig::default(),
    };

    let store = ConfigStore::new(base);
    let patch = ConfigPatch::from_env().and(overrides);
    if !patch.is_empty() {
        store.set(patch);
    }
    Ok(store)
}

/// `drover config`
pub fn show_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path, ConfigPatch::default())?.snapshot();
    print!("{}", config.to_yaml().context("Failed to render config")?);
    Ok(())
}

/// `drover run`
pub async fn run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let store = Arc::new(load_config(config_path, args.patch())?);
    let requests = input::load_requests(&args.input)?;

    let config = store.snapshot();
    info!(
        requests = requests.len(),
        concurrency = config.concurrency,
        max_retry = config.max_retry,
        timeout_ms = config.timeout.as_millis() as u64,
        "Starting batch"
    );

    let http = ReqwestClient::new().context("Failed to build HTTP client")?;
    let mut client = ResilientClient::new(Arc::new(http), store.clone());
    if let Some(var) = &args.token_env {
        client = client.with_tokens(Arc::new(EnvTokens::new(var.as_str())));
    }
    if !args.token_headers.is_empty() {
        client = client.with_token_headers(args.token_headers.iter().cloned());
    }
    let batch = RequestBatch::new(WorkerPool::new(store), client);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling batch");
            on_interrupt.cancel();
        }
    });

    let started = Instant::now();
    let report = if args.settled {
        let results = batch
            .run_settled_with_cancel(requests, None, &cancel)
            .await
            .context("Batch did not complete")?;
        Report::from_settled(results, started.elapsed())
    } else {
        let values = batch
            .run_with_cancel(requests, None, &cancel)
            .await
            .context("Batch failed")?;
        Report::from_values(values, started.elapsed())
    };

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "Batch finished"
    );
    write_report(&report, args.output.as_deref())
}

fn write_report(report: &Report, output: Option<&Path>) -> Result<()> {
    let rendered = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    match output {
        Some(path) => fs::write(path, rendered + "\n")
            .with_context(|| format!("Failed to write report to {}", path.display())),
        None => {
            println!("{rendered}");
            Ok(())
        }
    }
}
