use std::fs::OpenOptions;
use std::io;
use std::sync::{Arc, Mutex};

use clap::Parser;
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use firetodo::cli::{Cli, CliCommand};
use firetodo::commands;
use firetodo::config::Config;
use firetodo::error::Result;
use firetodo::store::{AnyStore, open_store};
use firetodo::ui;
use firetodo::view::{TodoView, WriteFailure};

/// Log to `log_file` when given. Otherwise log to stderr, except in the
/// interactive UI where stderr output would tear the screen.
fn init_logging(log_file: Option<&str>, interactive: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None if interactive => {}
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(config.log_file.as_deref(), cli.is_interactive()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    info!(
        store = ?config.store,
        collection = %config.collection,
        "config loaded"
    );

    if let Err(e) = run(&cli, &config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, config: &Config) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let (mut view, mut failures) = TodoView::new(store);

    match cli.command.clone().unwrap_or(CliCommand::Ui) {
        CliCommand::Ui => run_ui(&mut view, &mut failures),
        CliCommand::Watch => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted, stopping watch");
                    let _ = tx.send(true);
                }
            });
            commands::watch_snapshots(&mut view, &mut io::stdout(), rx).await
        }
        command => commands::run(&mut view, &command, &mut io::stdout()).await,
    }
}

fn run_ui(
    view: &mut TodoView<AnyStore>,
    failures: &mut mpsc::UnboundedReceiver<WriteFailure>,
) -> Result<()> {
    view.activate()?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = ui::run_app(&mut terminal, view, failures);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    view.deactivate();
    result
}
