//! Configuration management for cmdflow
//!
//! Handles server binding, the flow database location, command execution and
//! notification delivery. Every value can be set through an environment
//! variable for container deployment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Command execution and scheduling
    pub runtime: RuntimeConfig,
    /// Completion notifications
    pub notify: NotifyConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `flows.db` (default: "data")
    pub data_dir: String,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("flows.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Shell invoked as `<shell> -c <command>`
    pub shell: String,
    /// Working directory for commands; the process cwd when unset
    pub working_dir: Option<String>,
    /// Pause after the last schedule edit before parsing
    pub schedule_debounce_ms: u64,
}

impl RuntimeConfig {
    pub fn schedule_debounce(&self) -> Duration {
        Duration::from_millis(self.schedule_debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook receiving `{title, body}`; notifications are only logged when unset
    pub webhook_url: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("CMDFLOW_HOST", "0.0.0.0"),
                port: env_or("CMDFLOW_PORT", "3004").parse().unwrap_or(3004),
            },
            storage: StorageConfig {
                data_dir: env_or("CMDFLOW_DATA_DIR", "data"),
            },
            runtime: RuntimeConfig {
                shell: env_or("CMDFLOW_SHELL", "sh"),
                working_dir: env_opt("CMDFLOW_WORKDIR"),
                schedule_debounce_ms: env_or("CMDFLOW_SCHEDULE_DEBOUNCE_MS", "500")
                    .parse()
                    .unwrap_or(500),
            },
            notify: NotifyConfig {
                webhook_url: env_opt("CMDFLOW_NOTIFY_URL"),
            },
        }
    }
}
