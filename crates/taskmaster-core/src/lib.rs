pub mod calculator;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod render;
pub mod storage;
pub mod store;
pub mod task;
pub mod ticker;
pub mod view;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use crate::cli::{Command, ListArgs};

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let cli = cli::GlobalCli::parse_from(raw_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting taskmaster"
    );

    let mut cfg = config::Config::load(cli.config.as_deref())?;
    cfg.apply_overrides(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value)));
    debug!(loaded = ?cfg.loaded_files, "configuration ready");

    let command = cli
        .command
        .unwrap_or_else(|| Command::List(ListArgs::default()));

    if let Command::Calc(args) = command {
        commands::cmd_calc(&cfg, args)?;
        info!("done");
        return Ok(());
    }

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;

    let storage = storage::FileStorage::open(&data_dir)
        .with_context(|| format!("failed to open storage at {}", data_dir.display()))?;
    let store = store::TaskStore::load(storage, &cfg.storage_key());

    let renderer = render::Renderer::new(&cfg)?;
    commands::dispatch(store, &cfg, &renderer, command)?;

    info!("done");
    Ok(())
}
