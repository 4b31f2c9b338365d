use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::task::{Priority, Status};
use crate::view::StatusFilter;

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
    name = "taskdeck",
    version,
    about = "Taskdeck: a realtime task dashboard client",
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

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a task
    Add {
        title: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Priority>()))]
        priority: Option<Priority>,
    },

    /// Show the board, filtered by status and search text
    List {
        #[arg(
            long,
            default_value = "all",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<StatusFilter>())
        )]
        status: StatusFilter,

        #[arg(long, default_value = "")]
        search: String,
    },

    /// Show one task in full
    Show { id: String },

    /// Per-status totals over the whole board
    Counts,

    /// Edit task fields
    Modify {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,

        #[arg(long)]
        clear_description: bool,

        #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Status>()))]
        status: Option<Status>,

        #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Priority>()))]
        priority: Option<Priority>,
    },

    /// Advance a task to its next status (completed reopens)
    Cycle { id: String },

    /// Mark a task completed
    Done { id: String },

    /// Delete a task permanently
    Delete { id: String },

    /// Keep the board on screen, re-rendering on every remote change
    Watch {
        #[arg(
            long,
            default_value = "all",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<StatusFilter>())
        )]
        status: StatusFilter,

        #[arg(long, default_value = "")]
        search: String,
    },
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
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
