use std::io::{self, IsTerminal, Write};

use chrono::Local;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::task::{Priority, Task};
use crate::view::TaskCounts;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    /// Color is only emitted when enabled and stdout is a terminal.
    pub fn uses_color(&self) -> bool {
        self.color && io::stdout().is_terminal()
    }

    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn print_task_table(&self, tasks: &[&Task]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }
        write_task_table(&mut out, tasks, self.uses_color())
    }

    pub fn print_counts(&self, counts: &TaskCounts) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        write_counts(&mut out, counts)
    }
}

pub fn write_task_table<W: Write>(writer: W, tasks: &[&Task], color: bool) -> anyhow::Result<()> {
    let headers = ["ID", "Pri", "Category", "Task", "Expires", "Remaining", "Status"]
        .iter()
        .map(|h| h.to_string())
        .collect();

    let rows = tasks
        .iter()
        .map(|task| {
            let expires = task
                .expires_at()
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string();
            let status = status_label(task);
            let status = match (color, status) {
                (true, "expired") => paint(status, "31"),
                (true, "done") => paint(status, "32"),
                _ => status.to_string(),
            };
            let priority = if color {
                paint(task.priority.as_str(), priority_color(task.priority))
            } else {
                task.priority.as_str().to_string()
            };

            vec![
                task.id.to_string(),
                priority,
                task.category.clone(),
                task.text.clone(),
                expires,
                task.time_remaining().to_string(),
                status,
            ]
        })
        .collect();

    write_table(writer, headers, rows)
}

pub fn write_counts<W: Write>(mut writer: W, counts: &TaskCounts) -> anyhow::Result<()> {
    writeln!(
        writer,
        "{} total, {} pending, {} completed, {} expired",
        counts.total, counts.pending, counts.completed, counts.expired
    )?;
    Ok(())
}

fn status_label(task: &Task) -> &'static str {
    if task.is_complete {
        "done"
    } else if task.is_expired() {
        "expired"
    } else {
        "active"
    }
}

fn priority_color(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "31",
        Priority::Medium => "33",
        Priority::Low => "32",
    }
}

fn paint(text: &str, code: &str) -> String {
    format!("\x1b[{code}m{text}\x1b[0m")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
