//! Stellar CLI: a thin command-line front end over the Task Manager's API
//! surface plus standalone POC execution.

mod args;

use anyhow::{Context, Result};
use args::{Args, Command, PocCommand};
use clap::Parser;
use colored::Colorize;
use stellar_core::config::PocEngineConfig;
use stellar_core::{ScanConfig, ScanTypeConfig, TaskKind};
use stellar_poc::PocEngine;
use stellar_tasks::{ResultHandler, Storage, TaskManager};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Poc { action } => run_poc(action).await,
        task_command => run_task_command(&args.database, task_command).await,
    }
}

async fn run_task_command(database: &std::path::Path, command: Command) -> Result<()> {
    let storage = Storage::new(database, 5)
        .await
        .with_context(|| format!("opening database at {}", database.display()))?;
    let manager = TaskManager::new(ResultHandler::new(storage));

    match command {
        Command::Create {
            project,
            targets,
            ports,
            concurrency,
            rate_limit,
            timeout,
            no_service_detection,
        } => {
            let config = ScanConfig {
                ports,
                scan_type: ScanTypeConfig::Tcp,
                scan_method: stellar_core::ScanMethod::Connect,
                concurrency,
                rate_limit,
                timeout_secs: timeout,
                exclude_hosts: Vec::new(),
                service_detection: !no_service_detection,
            };
            let task = manager.create_task(&project, TaskKind::Port, targets, config).await?;
            println!("{} {}", "created task".green(), task.id);
        }
        Command::Start { task_id } => {
            manager.start_task(task_id).await?;
            println!("{} {task_id}", "started task".green());
        }
        Command::Stop { task_id } => {
            manager.stop_task(task_id).await?;
            println!("{} {task_id}", "stopped task".yellow());
        }
        Command::Status { task_id } => {
            let status = manager.get_task_status(task_id).await?;
            println!("{status}");
        }
        Command::Progress { task_id } => {
            let progress = manager.get_task_progress(task_id).await?;
            println!("{progress:.1}%");
        }
        Command::List { project, limit, skip } => {
            let tasks = manager.list_tasks(project.as_deref(), limit, skip).await?;
            for task in tasks {
                println!("{}  {:<10}  {:>6.1}%  {}", task.id, task.status, task.progress, task.project_id);
            }
        }
        Command::Results { task_id, limit, skip } => {
            let results = manager.get_task_results(task_id, limit, skip).await?;
            for result in results {
                println!(
                    "{}:{}/{}  {}  {}",
                    result.host,
                    result.port,
                    result.protocol,
                    result.status,
                    result.service.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Poc { .. } => unreachable!("handled before dispatch"),
    }

    Ok(())
}

async fn run_poc(action: PocCommand) -> Result<()> {
    match action {
        PocCommand::Run { script, dialect, target } => {
            let script_body = std::fs::read_to_string(&script)
                .with_context(|| format!("reading POC script {}", script.display()))?;

            let poc = stellar_core::Poc {
                id: uuid::Uuid::new_v4(),
                name: script.display().to_string(),
                script: script_body,
                dialect: dialect.into(),
                severity: stellar_core::Severity::Info,
                tags: Vec::new(),
                required_params: Vec::new(),
                default_params: Default::default(),
                enabled: true,
            };

            let poc_target = parse_poc_target(&target)?;
            let engine = PocEngine::new(&PocEngineConfig::default());
            let cancel = CancellationToken::new();
            let result = engine.run(&poc, &poc_target, &cancel).await?;

            info!(success = result.success, ms = result.execution_time_ms, "poc run complete");
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

fn parse_poc_target(raw: &str) -> Result<stellar_core::PocTarget> {
    let url = url::Url::parse(raw).with_context(|| format!("invalid target URL: {raw}"))?;
    let host = url.host_str().context("target URL has no host")?.to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    Ok(stellar_core::PocTarget {
        url: raw.to_string(),
        host,
        port,
        scheme: url.scheme().to_string(),
        path: url.path().to_string(),
        query: url.query().unwrap_or("").to_string(),
        extras: Default::default(),
    })
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
