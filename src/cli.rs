use clap::{Parser, Subcommand};

/// firetodo — a todo list kept live against a hosted document collection
#[derive(Parser, Debug, Clone)]
#[command(name = "firetodo", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    /// Path to config file (default: firetodo.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Backing store to use (firestore, memory)
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// Collection holding the todo documents
    #[arg(long, global = true)]
    pub collection: Option<String>,

    /// Firebase project id
    #[arg(long, global = true)]
    pub project_id: Option<String>,

    /// Seconds between snapshot polls of the remote collection
    #[arg(long = "poll-seconds", global = true)]
    pub poll_seconds: Option<u64>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Open the interactive todo list (default)
    Ui,

    /// Print every todo once
    List,

    /// Add a new todo
    Add {
        /// Text of the todo
        text: String,

        /// Calendar date attached to the todo (e.g. 2024-01-01)
        #[arg(long, default_value = "")]
        date: String,
    },

    /// Flip the completed flag of a todo
    Toggle {
        /// Document id of the todo
        id: String,
    },

    /// Delete a todo
    Delete {
        /// Document id of the todo
        id: String,
    },

    /// Delete every completed todo
    ClearCompleted,

    /// Print every snapshot pushed by the store until interrupted
    Watch,
}

impl Cli {
    /// Whether this invocation takes over the terminal.
    pub fn is_interactive(&self) -> bool {
        matches!(self.command, None | Some(CliCommand::Ui))
    }
}
