use std::process::ExitCode;

use anyhow::Result;
use tokio::io::BufReader;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mlterm::cli::{self, Command};
use mlterm::config::Config;
use mlterm::engine::process::ProcessSettings;
use mlterm::engine::{ProcessLauncher, Target};
use mlterm::printer::Printer;
use mlterm::probe;
use mlterm::session::{CaptureMode, EngineSession, SessionOptions};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Diagnostics go to stderr; stdout is the terminal surface
    let filter = EnvFilter::try_from_env("MLTERM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    let args = cli::Cli::parse();

    let mut cfg = Config::load();
    if let Some(engine) = args.engine.as_deref() {
        cfg.set("ENGINE_COMMAND", engine);
    }
    debug!(config = %cfg.path().display(), "configuration loaded");

    let settings = ProcessSettings::from_config(&cfg)?;
    let target = Target::from_session_name(args.session.as_deref());

    if let Some(Command::Share { name }) = &args.command {
        return share(&settings, name).await;
    }

    let launcher = ProcessLauncher::new(settings);
    if args.check {
        return Ok(probe::check(&launcher, &target));
    }

    let options = SessionOptions {
        target,
        capture: CaptureMode::from_flag(args.capture_or(cfg.get_bool("CAPTURE_OUTPUT"))),
        clear_on_start: cfg.get_bool("CLEAR_ON_START"),
        prompt: cfg.get("PROMPT").unwrap_or_else(|| ">> ".into()),
    };
    let mut session = EngineSession::connect(launcher, options, Printer::stdout()).await;

    match (&args.path, args.selection) {
        (Some(path), true) => {
            session.run_selection(path).await;
        }
        (Some(path), false) => {
            session.run_file(path).await;
        }
        (None, _) => {}
    }

    let exit = session
        .interactive_loop(BufReader::new(tokio::io::stdin()))
        .await;
    debug!(?exit, "interactive loop finished");
    Ok(ExitCode::SUCCESS)
}

#[cfg(unix)]
async fn share(settings: &ProcessSettings, name: &str) -> Result<ExitCode> {
    let status = mlterm::engine::shared::serve(settings, name).await?;
    debug!(%status, "shared engine exited");
    Ok(if status.success() { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

#[cfg(not(unix))]
async fn share(_settings: &ProcessSettings, _name: &str) -> Result<ExitCode> {
    anyhow::bail!("sharing a MATLAB session is only supported on Unix platforms")
}
