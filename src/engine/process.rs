//! Engine process startup, stdio exchange and shutdown.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::protocol::{self, Frame, Reply};
use super::{CapturedOutput, Engine, EngineError, Launcher, OutputSink, Target};
use crate::config::Config;

type Writer = Box<dyn AsyncWrite + Unpin + Send>;

/// How to find, start and talk to the engine executable.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub program: String,
    pub args: Vec<String>,
    pub startup_timeout: Duration,
    pub quit_timeout: Duration,
    pub release_expr: String,
    /// Prompt the engine prints before reading a command; stripped from output.
    pub engine_prompt: String,
    pub socket_dir: PathBuf,
}

impl ProcessSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let program = cfg.get("ENGINE_COMMAND").unwrap_or_default();
        if program.trim().is_empty() {
            bail!("ENGINE_COMMAND must not be empty");
        }
        let args = cfg
            .get("ENGINE_ARGS")
            .map(|a| a.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        Ok(Self {
            program: program.trim().to_string(),
            args,
            startup_timeout: Duration::from_secs(cfg.get_u64("STARTUP_TIMEOUT").unwrap_or(120)),
            quit_timeout: Duration::from_secs(cfg.get_u64("QUIT_TIMEOUT").unwrap_or(10)),
            release_expr: cfg
                .get("RELEASE_EXPR")
                .unwrap_or_else(|| "version('-release')".into()),
            engine_prompt: cfg.get("ENGINE_PROMPT").unwrap_or_default(),
            socket_dir: cfg.socket_dir(),
        })
    }

    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    settings: ProcessSettings,
}

impl ProcessLauncher {
    pub fn new(settings: ProcessSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    type Handle = ProcessEngine;

    fn probe(&self, target: &Target) -> Result<(), EngineError> {
        match target {
            Target::Start => match which::which(&self.settings.program) {
                Ok(path) => {
                    debug!(path = %path.display(), "engine executable found");
                    Ok(())
                }
                Err(e) => Err(EngineError::Unavailable(format!(
                    "MATLAB executable '{}' cannot be detected ({}). Install MATLAB or set ENGINE_COMMAND for the extension to work.",
                    self.settings.program, e
                ))),
            },
            #[cfg(unix)]
            Target::Attach(name) => super::shared::probe(&self.settings.socket_dir, name),
            #[cfg(not(unix))]
            Target::Attach(_) => Err(EngineError::Unavailable(
                "Attaching to a shared MATLAB session is only supported on Unix platforms".into(),
            )),
        }
    }

    async fn launch(&self, target: &Target) -> Result<ProcessEngine, EngineError> {
        let mut engine = match target {
            Target::Start => ProcessEngine::spawn(&self.settings)?,
            #[cfg(unix)]
            Target::Attach(name) => super::shared::connect(&self.settings, name).await?,
            #[cfg(not(unix))]
            Target::Attach(_) => {
                return Err(EngineError::StartupFailed(
                    "Attaching to a shared MATLAB session is only supported on Unix platforms".into(),
                ))
            }
        };
        engine.handshake(self.settings.startup_timeout).await?;
        Ok(engine)
    }
}

/// Handle to an engine reached through a byte stream: the stdio of a child process
/// we own, or a socket to a shared one.
pub struct ProcessEngine {
    child: Option<Child>,
    stdin: Writer,
    stdout: LineReader,
    stderr: Option<LineReader>,
    next_id: u64,
    quit_timeout: Duration,
    release_expr: String,
    engine_prompt: String,
}

enum Event {
    Stdout(io::Result<Option<String>>),
    Stderr(Option<String>),
}

/// Reads newline-terminated lines of any encoding; invalid UTF-8 is replaced rather
/// than failing the read. Partial lines stay buffered across cancelled reads.
struct LineReader {
    inner: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
    buf: Vec<u8>,
}

impl LineReader {
    fn new(reader: Box<dyn AsyncRead + Unpin + Send>) -> Self {
        Self { inner: BufReader::new(reader), buf: Vec::new() }
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let read = self.inner.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = protocol::decode_line(&self.buf);
        self.buf.clear();
        Ok(Some(line))
    }
}

impl ProcessEngine {
    pub fn spawn(settings: &ProcessSettings) -> Result<Self, EngineError> {
        let mut cmd = settings.command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::StartupFailed(format!(
                "Error starting MATLAB process '{}': {}",
                settings.program, e
            ))
        })?;
        debug!(pid = ?child.id(), program = %settings.program, "engine process spawned");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::StartupFailed("no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::StartupFailed("no stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::StartupFailed("no stderr".into()))?;

        let mut engine = Self::from_stream(Box::new(stdout), Box::new(stdin), settings);
        engine.stderr = Some(LineReader::new(Box::new(stderr)));
        engine.child = Some(child);
        Ok(engine)
    }

    /// Wraps an already connected stream. The engine at the other end is not owned:
    /// `quit` only disconnects.
    pub fn from_stream(
        reader: Box<dyn AsyncRead + Unpin + Send>,
        writer: Writer,
        settings: &ProcessSettings,
    ) -> Self {
        Self {
            child: None,
            stdin: writer,
            stdout: LineReader::new(reader),
            stderr: None,
            next_id: request_id_seed(),
            quit_timeout: settings.quit_timeout,
            release_expr: settings.release_expr.clone(),
            engine_prompt: settings.engine_prompt.clone(),
        }
    }

    /// Waits for the engine to answer an empty request. Startup banners are dropped.
    pub async fn handshake(&mut self, limit: Duration) -> Result<(), EngineError> {
        let mut banner = CapturedOutput::default();
        let answered = timeout(limit, self.exchange("", &mut banner)).await;
        match answered {
            Ok(Ok(())) => {
                debug!(lines = banner.stdout.len(), "engine ready");
                Ok(())
            }
            Ok(Err(EngineError::Terminated(reason))) => Err(EngineError::StartupFailed(format!(
                "MATLAB exited prematurely: {}",
                reason
            ))),
            Ok(Err(e)) => Err(EngineError::StartupFailed(e.to_string())),
            Err(_) => Err(EngineError::StartupFailed(format!(
                "MATLAB did not become ready within {}s",
                limit.as_secs()
            ))),
        }
    }

    async fn exchange(&mut self, code: &str, sink: &mut dyn OutputSink) -> Result<(), EngineError> {
        self.next_id = self.next_id.wrapping_add(1);
        let frame = Frame::new(self.next_id);
        debug!(id = frame.id(), "sending request");

        if let Err(e) = self.send(&frame.request(code)).await {
            return Err(self.terminated(format!("request rejected: {}", e)).await);
        }

        let mut reply = Reply::new(frame);
        let mut first_line = true;
        loop {
            let event = tokio::select! {
                line = self.stdout.next_line() => Event::Stdout(line),
                line = next_stderr(&mut self.stderr) => Event::Stderr(line),
            };
            match event {
                Event::Stdout(Ok(Some(line))) => {
                    // The engine prompt only ever precedes the first line of a reply
                    let line = if first_line {
                        first_line = false;
                        strip_prompts(&line, &self.engine_prompt)
                    } else {
                        line.as_str()
                    };
                    if reply.feed(line, sink) {
                        break;
                    }
                }
                Event::Stdout(Ok(None)) => {
                    self.drain_stderr(sink).await;
                    return Err(self.terminated("MATLAB closed its output".into()).await);
                }
                Event::Stdout(Err(e)) => return Err(EngineError::Io(e)),
                Event::Stderr(Some(line)) => sink.stderr_line(&line),
                Event::Stderr(None) => self.stderr = None,
            }
        }
        self.drain_stderr(sink).await;
        reply.finish()
    }

    /// Picks up stderr lines written right before the done marker.
    async fn drain_stderr(&mut self, sink: &mut dyn OutputSink) {
        while self.stderr.is_some() {
            match timeout(Duration::from_millis(20), next_stderr(&mut self.stderr)).await {
                Ok(Some(line)) => sink.stderr_line(&line),
                Ok(None) => self.stderr = None,
                Err(_) => break,
            }
        }
    }

    async fn send(&mut self, line: &str) -> io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }

    async fn terminated(&mut self, reason: String) -> EngineError {
        if let Some(child) = self.child.as_mut() {
            if let Ok(Ok(status)) = timeout(Duration::from_secs(1), child.wait()).await {
                return EngineError::Terminated(format!("{} ({})", reason, status));
            }
        }
        EngineError::Terminated(reason)
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    async fn run(&mut self, script: &Path, sink: &mut dyn OutputSink) -> Result<(), EngineError> {
        let code = protocol::run_code(&script.to_string_lossy());
        self.exchange(&code, sink).await
    }

    async fn eval(&mut self, code: &str, sink: &mut dyn OutputSink) -> Result<(), EngineError> {
        self.exchange(code, sink).await
    }

    async fn release(&mut self) -> Option<String> {
        let mut out = CapturedOutput::default();
        let code = format!("disp({})", self.release_expr);
        if let Err(e) = self.exchange(&code, &mut out).await {
            debug!(error = %e, "release query failed");
            return None;
        }
        out.stdout
            .into_iter()
            .map(|l| l.trim().to_string())
            .find(|l| !l.is_empty())
    }

    async fn quit(&mut self) -> Result<(), EngineError> {
        let Some(mut child) = self.child.take() else {
            debug!("detaching from shared engine");
            let _ = self.stdin.shutdown().await;
            return Ok(());
        };
        if let Err(e) = self.send("exit").await {
            debug!(error = %e, "engine gone before quit");
        }
        match timeout(self.quit_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "engine exited");
                Ok(())
            }
            Ok(Err(e)) => Err(EngineError::Io(e)),
            Err(_) => {
                warn!("MATLAB did not exit after {}s, killing it", self.quit_timeout.as_secs());
                child.kill().await?;
                Ok(())
            }
        }
    }
}

/// Starting request id for a new connection. Ids stay unique across clients of a
/// shared engine, so output left over from an earlier client never matches a marker.
fn request_id_seed() -> u64 {
    static CONNECTIONS: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let pid = u64::from(std::process::id());
    let unique = (nanos ^ (pid << 20)).wrapping_add(CONNECTIONS.fetch_add(1, Ordering::Relaxed));
    // Low 32 bits are left for the per-connection counter
    (unique & 0xffff_ffff) << 32
}

async fn next_stderr(stderr: &mut Option<LineReader>) -> Option<String> {
    match stderr {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// Removes leading engine prompts (`>> >> x = 1` becomes `x = 1`).
fn strip_prompts<'a>(mut line: &'a str, prompt: &str) -> &'a str {
    if prompt.is_empty() {
        return line;
    }
    while let Some(rest) = line.strip_prefix(prompt) {
        line = rest;
    }
    line
}
