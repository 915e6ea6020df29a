//! Sharing one engine between terminals over a Unix socket.
//!
//! `serve` starts an engine and bridges a socket to its stdio, one client at a time.
//! Attached clients speak the same line protocol as with a child process.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use super::process::{ProcessEngine, ProcessSettings};
use super::EngineError;

pub fn socket_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.sock", name))
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !name.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(EngineError::Unavailable(format!(
            "'{}' is not a valid session name (use letters, digits, '_', '-', '.')",
            name
        )))
    }
}

pub fn probe(dir: &Path, name: &str) -> Result<(), EngineError> {
    validate_name(name)?;
    let path = socket_path(dir, name);
    if path.exists() {
        Ok(())
    } else {
        Err(EngineError::Unavailable(format!(
            "No shared MATLAB session named '{}' (expected {}). Start one with `mlterm share {}`.",
            name,
            path.display(),
            name
        )))
    }
}

pub async fn connect(settings: &ProcessSettings, name: &str) -> Result<ProcessEngine, EngineError> {
    validate_name(name).map_err(|e| EngineError::StartupFailed(e.to_string()))?;
    let path = socket_path(&settings.socket_dir, name);
    let stream = UnixStream::connect(&path).await.map_err(|e| {
        EngineError::StartupFailed(format!(
            "Could not attach to MATLAB session '{}' at {}: {}",
            name,
            path.display(),
            e
        ))
    })?;
    debug!(path = %path.display(), "attached to shared engine");
    let (reader, writer) = stream.into_split();
    Ok(ProcessEngine::from_stream(Box::new(reader), Box::new(writer), settings))
}

/// Runs an engine and serves it under `name` until the engine exits.
pub async fn serve(settings: &ProcessSettings, name: &str) -> Result<ExitStatus> {
    validate_name(name)?;
    fs::create_dir_all(&settings.socket_dir)
        .with_context(|| format!("creating {}", settings.socket_dir.display()))?;
    let path = socket_path(&settings.socket_dir, name);

    if path.exists() {
        if UnixStream::connect(&path).await.is_ok() {
            bail!("MATLAB session '{}' is already shared at {}", name, path.display());
        }
        debug!(path = %path.display(), "removing stale socket");
        fs::remove_file(&path)?;
    }

    let listener = UnixListener::bind(&path).with_context(|| format!("binding {}", path.display()))?;

    let result = bridge(settings, name, &path, listener).await;
    if let Err(e) = fs::remove_file(&path) {
        debug!(error = %e, "socket already gone");
    }
    result
}

async fn bridge(
    settings: &ProcessSettings,
    name: &str,
    path: &Path,
    listener: UnixListener,
) -> Result<ExitStatus> {
    let mut child = settings
        .command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("starting {}", settings.program))?;
    let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
    let mut stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;

    println!("Sharing MATLAB session '{}' at {}", name, path.display());
    println!("Attach with `mlterm --session {}`. Press Ctrl-C to stop.", name);

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => accepted?.0,
            status = child.wait() => return Ok(status?),
        };
        info!(session = name, "client attached");
        let (mut reader, mut writer) = stream.into_split();
        tokio::select! {
            copied = tokio::io::copy(&mut reader, &mut stdin) => {
                debug!(?copied, "client input closed");
            }
            copied = tokio::io::copy(&mut stdout, &mut writer) => {
                debug!(?copied, "engine output closed");
            }
            status = child.wait() => return Ok(status?),
        }
        info!(session = name, "client detached");
    }
}
