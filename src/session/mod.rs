//! EngineSession: owns one engine handle, submits work to it and recovers from
//! engine crashes by relaunching once.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::engine::protocol;
use crate::engine::{CapturedOutput, Engine, EngineError, Launcher, OutputSink, Target};
use crate::printer::Printer;
use crate::repl::{LoopExit, ReplCommand};

pub mod selection;

use selection::{echo_lines, SelectionGuard};

const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

const BANNER: &str = "\
To get started, type one of these commands:
    helpwin          Provide access to help comments for all functions
    helpdesk         Open help browser
    demo             Access product examples in Help browser

For product information, visit https://www.mathworks.com.
Type exit to leave, clc to clear the terminal.";

/// How engine output reaches the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Print each line as soon as the engine writes it.
    Stream,
    /// Buffer stdout and stderr for the duration of a call and print them afterwards.
    Buffer,
}

impl CaptureMode {
    pub fn from_flag(capture: bool) -> Self {
        if capture {
            CaptureMode::Buffer
        } else {
            CaptureMode::Stream
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub target: Target,
    pub capture: CaptureMode,
    pub clear_on_start: bool,
    pub prompt: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            target: Target::Start,
            capture: CaptureMode::Stream,
            clear_on_start: false,
            prompt: ">> ".into(),
        }
    }
}

/// Result of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The engine reported an error, or the call failed unexpectedly.
    Failed,
    /// The engine had died; a fresh one is running and the request was not retried.
    Restarted,
    /// No engine available, nothing was attempted.
    Skipped,
}

enum Request<'a> {
    Run(&'a Path),
    Eval(&'a str),
}

struct StreamSink<'p, W: Write> {
    printer: &'p mut Printer<W>,
}

impl<W: Write + Send> OutputSink for StreamSink<'_, W> {
    fn stdout_line(&mut self, line: &str) {
        self.printer.line(line);
    }

    fn stderr_line(&mut self, line: &str) {
        self.printer.warning(line);
    }
}

pub struct EngineSession<L: Launcher, W: Write + Send> {
    launcher: L,
    handle: Option<L::Handle>,
    available: bool,
    options: SessionOptions,
    printer: Printer<W>,
    restarts: u32,
}

impl<L: Launcher, W: Write + Send> EngineSession<L, W> {
    /// Probes the client and launches the engine. Never fails: a session that could
    /// not get an engine is returned with `is_available() == false`.
    pub async fn connect(launcher: L, options: SessionOptions, printer: Printer<W>) -> Self {
        let mut session = Self {
            launcher,
            handle: None,
            available: false,
            options,
            printer,
            restarts: 0,
        };
        if session.options.clear_on_start {
            session.printer.clear_screen();
        }

        if let Err(e) = session.launcher.probe(&session.options.target) {
            info!(error = %e, "engine client unavailable");
            session.printer.error(&e.to_string());
            return session;
        }

        match &session.options.target {
            Target::Start => session.printer.status("Starting MATLAB..."),
            Target::Attach(name) => session
                .printer
                .status(&format!("Connecting to shared MATLAB session '{}'...", name)),
        }

        match session.launcher.launch(&session.options.target).await {
            Ok(mut handle) => {
                let release = handle.release().await;
                session.handle = Some(handle);
                session.available = true;
                session.print_banner(release.as_deref());
            }
            Err(e) => {
                warn!(error = %e, "engine startup failed");
                session
                    .printer
                    .error(&format!("Launching MATLAB failed: {}", e));
            }
        }
        session
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Number of successful reconnects so far.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn printer(&self) -> &Printer<W> {
        &self.printer
    }

    pub fn into_printer(self) -> Printer<W> {
        self.printer
    }

    pub async fn run_file(&mut self, path: &Path) -> Outcome {
        if !self.available {
            return Outcome::Skipped;
        }
        self.printer.line(&format!("File: \"{}\"", path.display()));
        self.submit(Request::Run(path)).await
    }

    /// Echoes and runs a temporary selection file, then deletes it on every path.
    pub async fn run_selection(&mut self, path: &Path) -> Outcome {
        if !self.available {
            return Outcome::Skipped;
        }
        let guard = SelectionGuard::new(path);
        self.echo_selection(guard.path());
        self.submit(Request::Run(guard.path())).await
    }

    pub async fn run_inline(&mut self, code: &str) -> Outcome {
        if !self.available {
            return Outcome::Skipped;
        }
        self.submit(Request::Eval(code)).await
    }

    /// Reads commands until an exit keyword or end of input, then shuts the engine down.
    pub async fn interactive_loop<R: AsyncBufRead + Unpin>(&mut self, input: R) -> LoopExit {
        if !self.available {
            return LoopExit::Unavailable;
        }
        let mut input = input;
        let mut buf = Vec::new();
        let exit = loop {
            self.printer.prompt(&self.options.prompt);
            buf.clear();
            let line = match input.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    self.printer.line("");
                    break LoopExit::EndOfInput;
                }
                Ok(_) => protocol::decode_line(&buf),
                Err(e) => {
                    // Only end of input stops the loop
                    self.printer.error(&format!("Could not read input: {}", e));
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                    continue;
                }
            };
            match ReplCommand::parse(&line) {
                ReplCommand::Exit => break LoopExit::ExitKeyword,
                ReplCommand::Clear => self.printer.clear_screen(),
                ReplCommand::Empty => {}
                ReplCommand::Forward(code) => {
                    if self.run_inline(code).await == Outcome::Skipped {
                        self.printer
                            .error("MATLAB is not running. Type exit to leave.");
                    }
                }
            }
        };
        self.shutdown().await;
        exit
    }

    /// Quits the engine if one is running. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            debug!("shutting down engine");
            if let Err(e) = handle.quit().await {
                warn!(error = %e, "engine did not shut down cleanly");
            }
        }
    }

    fn print_banner(&mut self, release: Option<&str>) {
        let title = match release {
            Some(r) if r.starts_with('R') => format!("MATLAB Interactive Terminal ({})", r),
            Some(r) => format!("MATLAB Interactive Terminal (R{})", r),
            None => "MATLAB Interactive Terminal".to_string(),
        };
        self.printer.status(&title);
        self.printer.line("");
        self.printer.line(BANNER);
        self.printer.line("");
    }

    fn echo_selection(&mut self, path: &Path) {
        self.printer.status("Running current selection:");
        self.printer.line("");
        match fs::read(path) {
            Ok(bytes) => match echo_lines(&bytes) {
                Ok(lines) => {
                    for line in lines {
                        self.printer.line(&line);
                    }
                }
                Err(e) => self
                    .printer
                    .error(&format!("Current selection cannot be displayed: {}", e)),
            },
            Err(e) => self
                .printer
                .error(&format!("Could not read selection {}: {}", path.display(), e)),
        }
        self.printer.line("");
    }

    async fn submit(&mut self, request: Request<'_>) -> Outcome {
        let Some(handle) = self.handle.as_mut() else {
            return Outcome::Skipped;
        };
        let result = match self.options.capture {
            CaptureMode::Stream => {
                let mut sink = StreamSink { printer: &mut self.printer };
                dispatch(handle, &request, &mut sink).await
            }
            CaptureMode::Buffer => {
                let mut buffers = CapturedOutput::default();
                let result = dispatch(handle, &request, &mut buffers).await;
                self.flush_captured(buffers);
                result
            }
        };
        self.printer.flush();

        match result {
            Ok(()) => Outcome::Completed,
            Err(EngineError::Terminated(reason)) => self.recover(&reason).await,
            Err(EngineError::Evaluation(message)) => {
                self.printer.error(&message);
                Outcome::Failed
            }
            Err(other) => {
                warn!(error = %other, "engine call failed");
                self.printer
                    .error(&format!("Unexpected engine error: {}", other));
                Outcome::Failed
            }
        }
    }

    fn flush_captured(&mut self, buffers: CapturedOutput) {
        for line in &buffers.stdout {
            self.printer.line(line);
        }
        for line in &buffers.stderr {
            self.printer.warning(line);
        }
    }

    async fn recover(&mut self, reason: &str) -> Outcome {
        info!(reason, "engine terminated, relaunching");
        self.printer
            .warning(&format!("MATLAB process terminated: {}", reason));
        self.printer.status("Restarting MATLAB...");
        // Drop kills a child we own before a new one is started
        drop(self.handle.take());

        match self.launcher.launch(&self.options.target).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.restarts += 1;
                self.printer.status("Restarted MATLAB process.");
                Outcome::Restarted
            }
            Err(e) => {
                warn!(error = %e, "relaunch failed");
                self.printer
                    .error(&format!("Restarting MATLAB failed: {}", e));
                self.available = false;
                Outcome::Failed
            }
        }
    }
}

async fn dispatch<E: Engine>(
    engine: &mut E,
    request: &Request<'_>,
    sink: &mut dyn OutputSink,
) -> Result<(), EngineError> {
    match request {
        Request::Run(path) => engine.run(path, sink).await,
        Request::Eval(code) => engine.eval(code, sink).await,
    }
}
