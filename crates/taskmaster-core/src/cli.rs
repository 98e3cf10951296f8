use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::task::Priority;
use crate::view::{SortBy, StatusFilter};

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskmaster",
    version,
    about = "Taskmaster: expiring to-do list and scientific calculator",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a task
    Add(AddArgs),
    /// Toggle a task between done and not done
    Done { id: u64 },
    /// Delete a task
    Delete { id: u64 },
    /// Delete every completed task
    Purge,
    /// Delete every task
    Clear,
    /// List tasks
    List(ListArgs),
    /// Show task counts
    Stats,
    /// Keep the list on screen, refreshing expiry until Enter is pressed
    Watch(WatchArgs),
    /// Evaluate an expression or convert between bases
    Calc(CalcArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub text: Vec<String>,

    #[arg(short, long, value_enum)]
    pub priority: Option<Priority>,

    #[arg(short, long)]
    pub category: Option<String>,

    /// Hours until the task expires
    #[arg(short, long = "expires-in")]
    pub expires_in: Option<f64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(short, long, value_enum, default_value_t = StatusFilter::All)]
    pub filter: StatusFilter,

    #[arg(short, long, default_value = "")]
    pub search: String,

    #[arg(long, value_enum)]
    pub sort: Option<SortBy>,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub list: ListArgs,

    /// Seconds between refreshes; defaults to tick.seconds
    #[arg(long)]
    pub interval: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct CalcArgs {
    /// Expression (or number to convert); options go before it
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub expression: Vec<String>,

    #[arg(long)]
    pub radians: bool,

    #[arg(long)]
    pub degrees: bool,

    #[arg(long = "to-binary", conflicts_with = "from_binary")]
    pub to_binary: bool,

    #[arg(long = "from-binary")]
    pub from_binary: bool,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
