use std::io::Write;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::CliCommand;
use crate::error::{Error, Result};
use crate::store::{Todo, TodoStore};
use crate::view::TodoView;

/// One line per todo: `[x] text (date)  id`.
pub fn format_todo(todo: &Todo) -> String {
    let mark = if todo.completed { 'x' } else { ' ' };
    let mut line = format!("[{mark}] {}", todo.text);
    if !todo.date.is_empty() {
        line.push_str(&format!(" ({})", todo.date));
    }
    line.push_str(&format!("  {}", todo.id));
    line
}

pub fn render_list(tasks: &[Todo]) -> String {
    if tasks.is_empty() {
        return "no todos\n".to_string();
    }
    let mut out = String::new();
    for todo in tasks {
        out.push_str(&format_todo(todo));
        out.push('\n');
    }
    out
}

/// Run a one-shot command. Every write is awaited so failures reach the
/// exit code. `Ui` and `Watch` are not one-shot and are rejected here.
pub async fn run<S: TodoStore + 'static>(
    view: &mut TodoView<S>,
    command: &CliCommand,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        CliCommand::List => {
            view.refresh().await?;
            write!(out, "{}", render_list(view.tasks()))?;
        }
        CliCommand::Add { text, date } => {
            view.set_pending_text(text.as_str());
            view.set_pending_date(date.as_str());
            let write = view.add().ok_or(Error::EmptyTodo)?;
            let op = write.op().to_string();
            write.wait().await?;
            writeln!(out, "{op}")?;
        }
        CliCommand::Toggle { id } => {
            view.refresh().await?;
            let write = view
                .toggle(id)
                .ok_or_else(|| Error::TodoNotFound(id.clone()))?;
            let op = write.op().to_string();
            write.wait().await?;
            writeln!(out, "{op}")?;
        }
        CliCommand::Delete { id } => {
            let write = view.delete(id);
            let op = write.op().to_string();
            write.wait().await?;
            writeln!(out, "{op}")?;
        }
        CliCommand::ClearCompleted => {
            view.refresh().await?;
            let writes = view.delete_completed();
            let total = writes.len();
            let mut failed = 0;
            for write in writes {
                let op = write.op().to_string();
                match write.wait().await {
                    Ok(()) => writeln!(out, "{op}")?,
                    Err(e) => {
                        warn!(op = %op, error = %e, "bulk delete entry failed");
                        failed += 1;
                    }
                }
            }
            info!(total, failed, "cleared completed todos");
            if failed > 0 {
                return Err(Error::PartialFailure { failed, total });
            }
            if total == 0 {
                writeln!(out, "no completed todos")?;
            }
        }
        CliCommand::Ui | CliCommand::Watch => {
            return Err(Error::Store(format!(
                "{command:?} is not a one-shot command"
            )));
        }
    }
    Ok(())
}

/// Print every snapshot the store pushes until `shutdown` turns true or the
/// feed closes. Read failures are printed as they happen; watching continues
/// and the next good snapshot is printed in full.
pub async fn watch_snapshots<S: TodoStore + 'static>(
    view: &mut TodoView<S>,
    out: &mut impl Write,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    view.activate()?;
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            more = view.next_snapshot() => {
                if !more {
                    break;
                }
                match view.state().sync_error {
                    Some(ref error) => writeln!(out, "--- sync failed: {error}")?,
                    None => {
                        writeln!(out, "--- {} todos", view.tasks().len())?;
                        write!(out, "{}", render_list(view.tasks()))?;
                    }
                }
                out.flush()?;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    view.deactivate();
    Ok(())
}
