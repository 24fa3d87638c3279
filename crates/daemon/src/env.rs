// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration from environment variables.
//!
//! Every knob is a `LATHE_*` environment variable with a default; an
//! optional `lathe.toml` in the user config directory supplies values
//! for variables the environment leaves unset (the environment always
//! wins).

use lathe_core::QueueName;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },

    #[error("config file error: {0}")]
    File(String),
}

/// Worker pool flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolType {
    /// One worker task, one in-flight job.
    Solo,
    /// `concurrent_tasks` worker tasks sharing the process.
    Threads,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub share_path: PathBuf,
    pub process_path: PathBuf,
    pub queues: Vec<QueueName>,
    pub concurrent_tasks: u32,
    pub pool: PoolType,
    pub time_limit: u64,
    pub retry_time_limit: u64,
    pub cleanup_enabled: bool,
    pub cleanup_delay: Duration,
    pub max_tasks_before_shutdown: u32,
    pub disable_kernel: bool,
    pub license_host: Option<String>,
    pub license_port: u16,
    pub license_acquire_at_start: bool,
    pub license_flexlm: bool,
    /// SHA-256 hex digest of the pre-shared API key; `None` disables
    /// authentication (development only).
    pub api_key_sha256: Option<String>,
    pub socket_path: PathBuf,
    pub spool_path: PathBuf,
    pub result_ttl: Duration,
    pub max_memory_mb: Option<u64>,
    pub log_path: PathBuf,
    pub lock_path: PathBuf,
    pub beacon_dir: PathBuf,
    /// Peer façade URL for the remote result backend; `None` runs local.
    pub backend_url: Option<String>,
}

/// Base state directory (`~/.local/share/lathe` or a temp fallback).
pub fn state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("lathe")
}

/// Default daemon socket path.
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var("LATHE_SOCKET") {
        return PathBuf::from(path);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("lathed.sock")
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let file = load_config_file();
        Self::load_with(&file)
    }

    fn load_with(file: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| -> Option<String> {
            std::env::var(key).ok().or_else(|| file.get(key).cloned())
        };
        let base = state_dir();

        let queues = match get("LATHE_QUEUES") {
            None => vec![
                QueueName::Cpu,
                QueueName::Gpu,
                QueueName::Archive,
                QueueName::Maintenance,
                QueueName::Control,
            ],
            Some(list) => QueueName::parse_list(&list).map_err(|e| ConfigError::Invalid {
                key: "LATHE_QUEUES".to_string(),
                value: e.0,
            })?,
        };

        let pool = match get("LATHE_POOL").as_deref() {
            None | Some("solo") => PoolType::Solo,
            Some("threads") => PoolType::Threads,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LATHE_POOL".to_string(),
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            share_path: get("LATHE_SHARE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| base.join("share")),
            process_path: get("LATHE_PROCESS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| base.join("processes")),
            queues,
            concurrent_tasks: parse_or("LATHE_CONCURRENT_TASKS", &get("LATHE_CONCURRENT_TASKS"), 1)?,
            pool,
            time_limit: parse_or("LATHE_TIME_LIMIT", &get("LATHE_TIME_LIMIT"), 2400)?,
            retry_time_limit: parse_or("LATHE_RETRY_TIME_LIMIT", &get("LATHE_RETRY_TIME_LIMIT"), 3600)?,
            cleanup_enabled: parse_bool(&get("LATHE_CLEANUP_ENABLED"), false),
            cleanup_delay: Duration::from_secs(parse_or("LATHE_CLEANUP_DELAY", &get("LATHE_CLEANUP_DELAY"), 3600)?),
            max_tasks_before_shutdown: parse_or("LATHE_MAX_TASKS_BEFORE_SHUTDOWN", &get("LATHE_MAX_TASKS_BEFORE_SHUTDOWN"), 0)?,
            disable_kernel: parse_bool(&get("LATHE_DISABLE_KERNEL"), false),
            license_host: get("LATHE_LICENSE_HOST"),
            license_port: parse_or("LATHE_LICENSE_PORT", &get("LATHE_LICENSE_PORT"), 35000)?,
            license_acquire_at_start: parse_bool(&get("LATHE_LICENSE_ACQUIRE_AT_START"), true),
            license_flexlm: parse_bool(&get("LATHE_LICENSE_FLEXLM"), false),
            api_key_sha256: get("LATHE_API_KEY_SHA256"),
            socket_path: get("LATHE_SOCKET")
                .map(PathBuf::from)
                .unwrap_or_else(default_socket_path),
            spool_path: get("LATHE_SPOOL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| base.join("spool")),
            result_ttl: Duration::from_secs(parse_or(
                "LATHE_RESULT_TTL_SECS",
                &get("LATHE_RESULT_TTL_SECS"),
                60 * 60 * 24 * 3,
            )?),
            max_memory_mb: match parse_or("LATHE_MAX_MEMORY_MB", &get("LATHE_MAX_MEMORY_MB"), 0)? {
                0 => None,
                mb => Some(mb),
            },
            log_path: get("LATHE_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| base.join("lathed.log")),
            lock_path: base.join("lathed.lock"),
            beacon_dir: get("LATHE_BEACON_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            backend_url: get("LATHE_BACKEND_URL"),
        })
    }
}

/// Flatten the optional `lathe.toml` into a key→value map keyed like the
/// environment (`LATHE_*`).
fn load_config_file() -> HashMap<String, String> {
    let Some(config_dir) = dirs::config_dir() else {
        return HashMap::new();
    };
    let path = config_dir.join("lathe").join("lathe.toml");
    load_config_file_from(&path)
}

fn load_config_file_from(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return map;
    };
    let parsed: toml::Table = match content.parse() {
        Ok(table) => table,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable config file");
            return map;
        }
    };
    for (key, value) in parsed {
        let env_key = format!("LATHE_{}", key.to_uppercase());
        let rendered = match value {
            toml::Value::String(s) => s,
            other => other.to_string(),
        };
        map.insert(env_key, rendered);
    }
    map
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    value: &Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
        }),
    }
}

fn parse_bool(value: &Option<String>, default: bool) -> bool {
    match value.as_deref() {
        None => default,
        Some(raw) => matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes"),
    }
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
