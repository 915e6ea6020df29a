use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use directories::BaseDirs;
use tracing::debug;

const ENV_PREFIX: &str = "MLTERM_";

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    /// Defaults, then the rc file, then `MLTERM_*` environment variables.
    pub fn load() -> Self {
        let config_path = default_config_path();
        let mut cfg = match fs::read_to_string(&config_path) {
            Ok(text) => {
                debug!(path = %config_path.display(), "loaded config file");
                Self::parse(&text)
            }
            Err(_) => Self::parse(""),
        };
        cfg.config_path = config_path;

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if let Some(key) = k.strip_prefix(ENV_PREFIX) {
                if is_config_key(key) {
                    cfg.inner.insert(key.to_string(), v);
                }
            }
        }
        cfg
    }

    /// Defaults overlaid with `key=value` lines. Environment is not consulted.
    pub fn parse(text: &str) -> Self {
        let mut map = default_map();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                map.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
        Self { inner: map, config_path: default_config_path() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.get("SOCKET_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_socket_dir)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "ENGINE_COMMAND",
        "ENGINE_ARGS",
        "ENGINE_PROMPT",
        "CAPTURE_OUTPUT",
        "PROMPT",
        "STARTUP_TIMEOUT",
        "QUIT_TIMEOUT",
        "RELEASE_EXPR",
        "CLEAR_ON_START",
        "SOCKET_DIR",
    ];

    KEYS.contains(&k)
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("mlterm").join("mltermrc")
}

fn default_socket_dir() -> PathBuf {
    BaseDirs::new()
        .and_then(|b| b.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(env::temp_dir)
        .join("mlterm")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    m.insert("ENGINE_COMMAND".into(), "matlab".into());
    m.insert("ENGINE_ARGS".into(), "-nodesktop -nosplash".into());
    m.insert("ENGINE_PROMPT".into(), ">> ".into());
    m.insert("PROMPT".into(), ">> ".into());
    m.insert("RELEASE_EXPR".into(), "version('-release')".into());

    // Seconds
    m.insert("STARTUP_TIMEOUT".into(), "120".into());
    m.insert("QUIT_TIMEOUT".into(), "10".into());

    // Bools as strings
    m.insert("CAPTURE_OUTPUT".into(), "false".into());
    m.insert("CLEAR_ON_START".into(), "true".into());

    m
}
