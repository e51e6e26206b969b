//! CLI argument parsing: the Task API surface plus a `poc run`
//! subcommand, expressed as `clap` derive subcommands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stellar - distributed security-scanning platform.
#[derive(Parser, Debug)]
#[command(name = "stellar", version, about = "Stellar security-scanning task runner")]
pub struct Args {
    /// Path to the SQLite database file.
    #[arg(long, global = true, default_value = "stellar.db")]
    pub database: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a pending scan task without starting it.
    Create {
        /// Project this task belongs to.
        #[arg(long)]
        project: String,
        /// Targets (hostnames, dotted-quads, or CIDRs).
        #[arg(required = true)]
        targets: Vec<String>,
        /// Port spec, e.g. "22,80,443,1000-2000". Empty means "1-1000".
        #[arg(short = 'p', long, default_value = "")]
        ports: String,
        /// Probe concurrency.
        #[arg(long, default_value_t = 100)]
        concurrency: usize,
        /// Per-second rate cap; omit for unlimited.
        #[arg(long)]
        rate_limit: Option<u32>,
        /// Per-probe timeout, seconds.
        #[arg(long, default_value_t = 3)]
        timeout: u64,
        /// Disable service/banner detection.
        #[arg(long)]
        no_service_detection: bool,
    },

    /// Start a previously created task.
    Start {
        task_id: uuid::Uuid,
    },

    /// Request cancellation of a running task.
    Stop {
        task_id: uuid::Uuid,
    },

    /// Print a task's current status.
    Status {
        task_id: uuid::Uuid,
    },

    /// Print a task's current progress percentage.
    Progress {
        task_id: uuid::Uuid,
    },

    /// List tasks, optionally filtered by project.
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        skip: i64,
    },

    /// Print a task's scan results.
    Results {
        task_id: uuid::Uuid,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        skip: i64,
    },

    /// Run a single proof-of-concept script against a target, outside any
    /// task context.
    Poc {
        #[command(subcommand)]
        action: PocCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum PocCommand {
    /// Execute a POC script file against a target URL.
    Run {
        /// Path to the POC script.
        script: PathBuf,
        /// Dialect the script is written in.
        #[arg(long, value_enum)]
        dialect: DialectArg,
        /// Target URL, e.g. http://10.0.0.1:8080/path
        #[arg(long)]
        target: String,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum DialectArg {
    Python,
    Go,
    Javascript,
    YamlTemplate,
    NucleiTemplate,
}

impl From<DialectArg> for stellar_core::Dialect {
    fn from(value: DialectArg) -> Self {
        match value {
            DialectArg::Python => stellar_core::Dialect::Python,
            DialectArg::Go => stellar_core::Dialect::Go,
            DialectArg::Javascript => stellar_core::Dialect::Javascript,
            DialectArg::YamlTemplate => stellar_core::Dialect::YamlTemplate,
            DialectArg::NucleiTemplate => stellar_core::Dialect::NucleiTemplate,
        }
    }
}
