use std::sync::Arc;

use agtrace_hub::HubConfig;
use agtrace_runtime::{Config, RuntimeConfig};
use agtrace_types::RunKind;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::Command;

pub async fn run(cli: crate::cli::Cli) -> Result<()> {
    init_tracing();

    let mut config = Config::load().unwrap_or_default();
    if let Some(workspace) = &cli.workspace {
        config.workspace_path = Some(workspace.clone());
    }
    let workspace_path = config.workspace_path().context("resolving workspace path")?;
    std::fs::create_dir_all(&workspace_path).context("creating workspace directory")?;

    match cli.command {
        Command::Import { log_root } => import(config, &workspace_path, log_root).await,
        Command::Watch { log_root, port } => watch(config, &workspace_path, log_root, port).await,
        Command::List => list(&workspace_path).await,
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn runtime_config(config: &Config, log_root: Option<std::path::PathBuf>) -> RuntimeConfig {
    let mut runtime_config = config.runtime_config();
    if let Some(log_root) = log_root {
        runtime_config.log_root = log_root;
    }
    runtime_config
}

async fn import(config: Config, workspace_path: &std::path::Path, log_root: Option<std::path::PathBuf>) -> Result<()> {
    let runtime_config = runtime_config(&config, log_root);
    let db_path = workspace_path.join("agtrace.db");
    let (store, _outcome) = tokio::task::spawn_blocking(move || agtrace_index::Store::open(db_path)).await??;
    let store = Arc::new(store);
    let importer = agtrace_runtime::Importer::new(store, runtime_config, None);
    let cancel = CancellationToken::new();
    let summary = tokio::task::spawn_blocking(move || importer.run(RunKind::Manual, &cancel)).await??;

    println!(
        "{} {} files processed, {} skipped, {} sessions, {} messages",
        "import run complete:".green(),
        summary.files_processed,
        summary.files_skipped,
        summary.sessions_imported,
        summary.messages_imported
    );
    Ok(())
}

async fn watch(config: Config, workspace_path: &std::path::Path, log_root: Option<std::path::PathBuf>, port: u16) -> Result<()> {
    let runtime_config = runtime_config(&config, log_root);
    let root_cancel = CancellationToken::new();

    let db_path = workspace_path.join("agtrace.db");
    let (store, _outcome) = tokio::task::spawn_blocking(move || agtrace_index::Store::open(db_path)).await??;
    let store = Arc::new(store);

    let (events_tx, app_state, hub_handle) = agtrace_hub::spawn(store.clone(), HubConfig::default(), root_cancel.clone());

    let runtime = agtrace_runtime::Runtime::start(runtime_config, store, Some(events_tx)).await?;

    let serve_cancel = root_cancel.clone();
    let server_handle = tokio::spawn(agtrace_hub::serve(app_state, port, serve_cancel));

    info!("agtrace watching; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");

    root_cancel.cancel();
    runtime.shutdown().await?;
    let _ = hub_handle.await;
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => eprintln!("{} {err}", "subscription endpoint error:".red()),
        Err(err) => eprintln!("{} {err}", "subscription endpoint task panicked:".red()),
    }
    Ok(())
}

async fn list(workspace_path: &std::path::Path) -> Result<()> {
    let db_path = workspace_path.join("agtrace.db");
    let (store, _outcome) = tokio::task::spawn_blocking(move || agtrace_index::Store::open(db_path)).await??;
    let sessions = agtrace_engine::list_sessions(&store)?;
    if sessions.is_empty() {
        println!("no sessions found");
        return Ok(());
    }
    for summary in sessions {
        println!(
            "{:<36} {:<28} {:>6} msgs  {:>8} tok  ${:.4}",
            summary.session.id,
            summary.session.project_name,
            summary.session.message_count,
            summary.total_tokens(),
            summary.total_cost
        );
    }
    Ok(())
}
