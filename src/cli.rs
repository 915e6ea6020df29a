use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "mlterm", about = "Run MATLAB code from your editor in an interactive terminal", version)]
#[command(group(ArgGroup::new("capture_switch").args(["capture", "no_capture"]).multiple(false)))]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Script to run before the interactive terminal starts.
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// PATH is a temporary selection file: echo it, run it, then delete it.
    #[arg(long, requires = "path")]
    pub selection: bool,

    /// Attach to a shared MATLAB session instead of starting a new one.
    #[arg(long, value_name = "NAME")]
    pub session: Option<String>,

    /// Buffer engine output and print it after each call.
    #[arg(long)]
    pub capture: bool,
    /// Print engine output as it is produced.
    #[arg(long = "no-capture")]
    pub no_capture: bool,

    /// Engine executable (overrides ENGINE_COMMAND).
    #[arg(long, value_name = "CMD")]
    pub engine: Option<String>,

    /// Exit with status 0 if the engine can be used, 1 otherwise.
    #[arg(long)]
    pub check: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start MATLAB and share it under NAME so terminals can attach with --session.
    Share {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// `--capture`/`--no-capture` if given, otherwise the configured default.
    pub fn capture_or(&self, configured: bool) -> bool {
        if self.no_capture {
            false
        } else if self.capture {
            true
        } else {
            configured
        }
    }
}
