//! Process settings and the per-project configuration store.
//!
//! Wakegate itself is configured entirely through the environment (it is a
//! tiny sidecar, not a service with its own config file). The projects it
//! fronts live in an external config store: one `<name>.conf` file per
//! project under `<config_dir>/projects/`, holding line-oriented
//! `KEY="VALUE"` pairs written by the lifecycle tool. Only the read contract
//! of that store matters here.

use crate::error::WakeError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_config_dir() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wakegate")
}

fn default_home_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wakegate")
}

/// Runtime settings, resolved from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind address for the listener (WAKEGATE_BIND, default 127.0.0.1)
    pub bind: String,
    /// Listen port (WAKEGATE_PORT, default 3999)
    pub port: u16,
    /// Root of the external config store (WAKEGATE_CONFIG_DIR)
    pub config_dir: PathBuf,
    /// Directory handed to the resume command as its working context
    /// (WAKEGATE_HOME)
    pub home_dir: PathBuf,
    /// Resume command line (WAKEGATE_RESUME_CMD); the project name is
    /// appended as the final argument when invoked
    pub resume_cmd: Vec<String>,
    /// Replay buffer cap in bytes (WAKEGATE_MAX_BODY_BYTES)
    pub max_body_bytes: usize,
    /// Hard bound on a single resume invocation
    pub wake_timeout: Duration,
    /// Retention window for a resolved wake before registry eviction
    pub grace_window: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3999,
            config_dir: default_config_dir(),
            home_dir: default_home_dir(),
            resume_cmd: vec!["wakegate-resume".to_string()],
            max_body_bytes: 10 * 1024 * 1024,
            wake_timeout: Duration::from_secs(60),
            grace_window: Duration::from_secs(5),
        }
    }
}

impl Settings {
    /// Resolve settings from the environment, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings = Settings::default();

        if let Ok(bind) = std::env::var("WAKEGATE_BIND") {
            settings.bind = bind;
        }
        if let Ok(port) = std::env::var("WAKEGATE_PORT") {
            settings.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("WAKEGATE_PORT is not a valid port: {}", port))?;
        }
        if let Ok(dir) = std::env::var("WAKEGATE_CONFIG_DIR") {
            settings.config_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("WAKEGATE_HOME") {
            settings.home_dir = PathBuf::from(dir);
        }
        if let Ok(cmd) = std::env::var("WAKEGATE_RESUME_CMD") {
            let words = shell_words::split(&cmd)
                .map_err(|e| anyhow::anyhow!("WAKEGATE_RESUME_CMD is not parseable: {}", e))?;
            if words.is_empty() {
                anyhow::bail!("WAKEGATE_RESUME_CMD is empty");
            }
            settings.resume_cmd = words;
        }
        if let Ok(max) = std::env::var("WAKEGATE_MAX_BODY_BYTES") {
            settings.max_body_bytes = max.parse().map_err(|_| {
                anyhow::anyhow!("WAKEGATE_MAX_BODY_BYTES is not a valid size: {}", max)
            })?;
        }

        Ok(settings)
    }

    /// Path of a project's config file in the store
    pub fn project_conf_path(&self, project: &str) -> PathBuf {
        self.config_dir.join("projects").join(format!("{}.conf", project))
    }
}

/// Activation parameters for one project, loaded fresh per wake attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub name: String,
    /// Port the project serves on once awake (PROJECT_PORT)
    pub port: u16,
}

/// Read a project's config from the store.
///
/// Loaded fresh on every wake attempt rather than cached: the lifecycle tool
/// may rewrite these files between wakes. No side effects, safe to call
/// repeatedly.
pub fn resolve_project(config_dir: &Path, project: &str) -> Result<ProjectConfig, WakeError> {
    let path = config_dir.join("projects").join(format!("{}.conf", project));

    let content = std::fs::read_to_string(&path).map_err(|_| WakeError::ConfigNotFound {
        project: project.to_string(),
    })?;

    let values = parse_conf(&content);

    let port = values
        .get("PROJECT_PORT")
        .and_then(|v| v.parse::<u16>().ok())
        .ok_or_else(|| WakeError::PortNotConfigured {
            project: project.to_string(),
        })?;

    Ok(ProjectConfig {
        name: project.to_string(),
        port,
    })
}

/// Parse the store's line format: `KEY="VALUE"` with KEY in `[A-Z_]+`.
/// Anything that doesn't match is ignored, the writer mixes in comments
/// and shell fragments.
fn parse_conf(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in content.lines() {
        let Some((key, rest)) = line.split_once('=') else {
            continue;
        };
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
            continue;
        }
        let Some(value) = rest
            .strip_prefix('"')
            .and_then(|v| v.split_once('"'))
            .map(|(v, _)| v)
        else {
            continue;
        };
        values.insert(key.to_string(), value.to_string());
    }
    values
}
