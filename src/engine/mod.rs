//! Engine client: launcher/handle traits, error taxonomy and output sinks.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub mod process;
pub mod protocol;
#[cfg(unix)]
pub mod shared;

pub use process::{ProcessEngine, ProcessLauncher};

/// Which engine instance a launcher should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Start a fresh engine process owned by this session.
    Start,
    /// Attach to an already running engine shared under this name.
    Attach(String),
}

impl Target {
    pub fn from_session_name(name: Option<&str>) -> Self {
        match name {
            Some(n) if !n.trim().is_empty() => Target::Attach(n.trim().to_string()),
            _ => Target::Start,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine client cannot be used at all (executable missing, no shared socket).
    #[error("{0}")]
    Unavailable(String),
    /// The engine could not be started or attached to.
    #[error("{0}")]
    StartupFailed(String),
    /// The engine process died or rejected the request.
    #[error("{0}")]
    Terminated(String),
    /// The engine ran the code and reported an error of its own.
    #[error("{0}")]
    Evaluation(String),
    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine protocol violation: {0}")]
    Protocol(String),
}

/// Receives engine text line by line while a request is in flight.
pub trait OutputSink: Send {
    fn stdout_line(&mut self, line: &str);
    fn stderr_line(&mut self, line: &str);
}

/// Collects everything; used to query values such as the engine release.
#[derive(Debug, Default, Clone)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl OutputSink for CapturedOutput {
    fn stdout_line(&mut self, line: &str) {
        self.stdout.push(line.to_string());
    }

    fn stderr_line(&mut self, line: &str) {
        self.stderr.push(line.to_string());
    }
}

/// A live engine instance.
#[async_trait]
pub trait Engine: Send {
    /// Run a script file, relaying its output.
    async fn run(&mut self, script: &Path, sink: &mut dyn OutputSink) -> Result<(), EngineError>;

    /// Evaluate one expression or statement.
    async fn eval(&mut self, code: &str, sink: &mut dyn OutputSink) -> Result<(), EngineError>;

    /// Release string shown in the startup banner, if the engine reports one.
    async fn release(&mut self) -> Option<String> {
        None
    }

    /// Stop the engine (or disconnect from a shared one).
    async fn quit(&mut self) -> Result<(), EngineError>;
}

/// Produces engine handles. One launcher lives for the whole session and is reused
/// for reconnects.
#[async_trait]
pub trait Launcher: Send + Sync {
    type Handle: Engine;

    /// Checks that the client side is usable without starting anything.
    fn probe(&self, target: &Target) -> Result<(), EngineError>;

    /// Starts or attaches. Slow: may take several seconds.
    async fn launch(&self, target: &Target) -> Result<Self::Handle, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_session_name_starts_new_engine() {
        assert_eq!(Target::from_session_name(None), Target::Start);
        assert_eq!(Target::from_session_name(Some("  ")), Target::Start);
        assert_eq!(
            Target::from_session_name(Some(" work ")),
            Target::Attach("work".into())
        );
    }

    #[test]
    fn captured_output_keeps_streams_apart() {
        let mut out = CapturedOutput::default();
        out.stdout_line("a");
        out.stderr_line("b");
        out.stdout_line("c");
        assert_eq!(out.stdout, vec!["a", "c"]);
        assert_eq!(out.stderr, vec!["b"]);
    }
}
