use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::calculator::{AngleMode, Calculator};
use crate::cli::{AddArgs, CalcArgs, Command, ListArgs, WatchArgs};
use crate::config::Config;
use crate::render::{Renderer, write_counts, write_task_table};
use crate::storage::KeyValueStorage;
use crate::store::{NewTask, TaskStore};
use crate::ticker::ExpiryTicker;
use crate::view::ViewQuery;

/// Runs one store command. Expiry is recomputed first so every command
/// sees current derived fields.
#[instrument(skip(store, cfg, renderer, command))]
pub fn dispatch<S>(
    mut store: TaskStore<S>,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()>
where
    S: KeyValueStorage + 'static,
{
    debug!(?command, "dispatching command");
    store.recompute_expiry(Utc::now());

    match command {
        Command::Add(args) => cmd_add(&mut store, cfg, args),
        Command::Done { id } => cmd_done(&mut store, id),
        Command::Delete { id } => cmd_delete(&mut store, id),
        Command::Purge => {
            let removed = store.delete_completed();
            println!("Deleted {removed} completed task(s).");
            Ok(())
        }
        Command::Clear => {
            let count = store.len();
            store.clear_all();
            println!("Deleted {count} task(s).");
            Ok(())
        }
        Command::List(args) => {
            let view = view_query(cfg, &args)?;
            renderer.print_task_table(&store.filtered_tasks(&view))
        }
        Command::Stats => renderer.print_counts(&store.counts()),
        Command::Watch(args) => cmd_watch(store, cfg, renderer, args),
        Command::Calc(args) => cmd_calc(cfg, args),
    }
}

fn cmd_done<S: KeyValueStorage>(store: &mut TaskStore<S>, id: u64) -> anyhow::Result<()> {
    info!(id, "command done");
    if !store.complete_task(id) {
        println!("No task with id {id}.");
        return Ok(());
    }
    let done = store.get(id).is_some_and(|t| t.is_complete);
    println!(
        "Task {id} marked {}.",
        if done { "complete" } else { "not complete" }
    );
    Ok(())
}

fn cmd_delete<S: KeyValueStorage>(store: &mut TaskStore<S>, id: u64) -> anyhow::Result<()> {
    info!(id, "command delete");
    if store.delete_task(id) {
        println!("Deleted task {id}.");
    } else {
        println!("No task with id {id}.");
    }
    Ok(())
}

#[instrument(skip(store, cfg, args))]
fn cmd_add<S: KeyValueStorage>(
    store: &mut TaskStore<S>,
    cfg: &Config,
    args: AddArgs,
) -> anyhow::Result<()> {
    info!("command add");

    let new = NewTask {
        text: args.text.join(" "),
        priority: match args.priority {
            Some(priority) => priority,
            None => cfg.default_priority()?,
        },
        category: args.category.unwrap_or_else(|| cfg.default_category()),
        expiry_hours: match args.expires_in {
            Some(hours) => hours,
            None => cfg.default_expiry_hours()?,
        },
    };

    match store.add_task(new, Utc::now()) {
        Some(id) => {
            let task = store
                .get(id)
                .ok_or_else(|| anyhow!("task {id} missing right after add"))?;
            println!("Created task {id}, expires {}.", task.expires_at().format("%Y-%m-%d %H:%M UTC"));
        }
        None => println!("Nothing added: task text must not be blank and expiry must be positive."),
    }
    Ok(())
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_watch<S>(
    store: TaskStore<S>,
    cfg: &Config,
    renderer: &Renderer,
    args: WatchArgs,
) -> anyhow::Result<()>
where
    S: KeyValueStorage + 'static,
{
    let period = match args.interval {
        Some(0) => return Err(anyhow!("--interval must be at least 1 second")),
        Some(secs) => Duration::from_secs(secs),
        None => cfg.tick_period()?,
    };
    let view = view_query(cfg, &args.list)?;
    let color = renderer.uses_color();
    info!(period_secs = period.as_secs(), "command watch");

    let store = Arc::new(Mutex::new(store));
    let ticker = ExpiryTicker::start_with_hook(Arc::clone(&store), period, Utc::now, move |store| {
        let mut out = io::stdout().lock();
        let tasks = store.filtered_tasks(&view);
        let _ = writeln!(out, "\n[{}]", Utc::now().format("%H:%M:%S"));
        let _ = write_task_table(&mut out, &tasks, color);
        let _ = write_counts(&mut out, &store.counts());
        let _ = writeln!(out, "(press Enter to stop)");
    })?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed reading stdin")?;

    ticker.stop();
    println!("Stopped.");
    Ok(())
}

/// Evaluates or converts the expression. Needs no task store.
#[instrument(skip(cfg))]
pub fn cmd_calc(cfg: &Config, args: CalcArgs) -> anyhow::Result<()> {
    let mode = if args.radians {
        AngleMode::Radians
    } else if args.degrees {
        AngleMode::Degrees
    } else {
        cfg.angle_mode()?
    };

    let input = args.expression.join(" ");
    if input.trim().is_empty() {
        return Err(anyhow!("calc requires an expression"));
    }

    let mut calc = Calculator::new(mode);
    calc.append(&input);
    let out = if args.to_binary {
        calc.to_binary()
    } else if args.from_binary {
        calc.from_binary()
    } else {
        calc.evaluate()
    };
    println!("{out}");
    Ok(())
}

fn view_query(cfg: &Config, args: &ListArgs) -> anyhow::Result<ViewQuery> {
    let sort_by = match args.sort {
        Some(sort) => sort,
        None => cfg.default_sort()?,
    };
    Ok(ViewQuery::new(args.filter, args.search.clone(), sort_by))
}
