//! Process-wide system configuration.
//!
//! Built once at startup (defaults, then environment overrides) and treated
//! as read-only afterwards.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backend used for the shared state cells and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMode {
    Redis,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Queue this host's global listener consumes invocations from.
    pub queue_name: String,

    /// How long the global queue listener waits for a message before
    /// dropping out.
    pub global_message_timeout_ms: u64,

    /// Per-sub-invocation timeout when a fork awaits its remote team.
    pub chained_call_timeout_ms: u64,

    pub state_mode: StateMode,

    /// Warm up the python runtime when the worker pool starts.
    pub python_preload: bool,

    /// Host file served to guests as `/etc/hosts`.
    pub hosts_file: PathBuf,

    /// Host file served to guests as `/etc/resolv.conf`.
    pub resolv_file: PathBuf,

    /// Upper bound on the device count a user may request for distributed
    /// parallel regions.
    pub max_devices_per_user: i32,

    /// Worker pool slot count.
    pub pool_size: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            queue_name: "incoming".to_owned(),
            global_message_timeout_ms: 60_000,
            chained_call_timeout_ms: 30_000,
            state_mode: StateMode::Redis,
            python_preload: false,
            hosts_file: PathBuf::from("/usr/share/wasmpool/net/hosts"),
            resolv_file: PathBuf::from("/usr/share/wasmpool/net/resolv.conf"),
            max_devices_per_user: 3,
            pool_size: default_pool_size(),
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl SystemConfig {
    /// Defaults with `WASMPOOL_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("WASMPOOL_QUEUE_NAME") {
            config.queue_name = v;
        }
        if let Some(v) = env_u64("WASMPOOL_GLOBAL_MESSAGE_TIMEOUT_MS") {
            config.global_message_timeout_ms = v;
        }
        if let Some(v) = env_u64("WASMPOOL_CHAINED_CALL_TIMEOUT_MS") {
            config.chained_call_timeout_ms = v;
        }
        if let Ok(v) = std::env::var("WASMPOOL_STATE_MODE") {
            match v.as_str() {
                "redis" => config.state_mode = StateMode::Redis,
                "inmemory" => config.state_mode = StateMode::InMemory,
                other => tracing::warn!(mode = other, "unknown state mode, keeping default"),
            }
        }
        if let Ok(v) = std::env::var("WASMPOOL_PYTHON_PRELOAD") {
            config.python_preload = v == "on" || v == "1" || v == "true";
        }
        if let Ok(v) = std::env::var("WASMPOOL_HOSTS_FILE") {
            config.hosts_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WASMPOOL_RESOLV_FILE") {
            config.resolv_file = PathBuf::from(v);
        }
        if let Some(v) = env_u64("WASMPOOL_POOL_SIZE") {
            config.pool_size = v as usize;
        }
        config
    }

    pub fn global_message_timeout(&self) -> Duration {
        Duration::from_millis(self.global_message_timeout_ms)
    }

    pub fn chained_call_timeout(&self) -> Duration {
        Duration::from_millis(self.chained_call_timeout_ms)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SystemConfig::default();
        assert_eq!(config.state_mode, StateMode::Redis);
        assert!(config.pool_size >= 1);
        assert!(config.chained_call_timeout_ms > 0);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("WASMPOOL_STATE_MODE", "inmemory");
        std::env::set_var("WASMPOOL_CHAINED_CALL_TIMEOUT_MS", "1234");
        let config = SystemConfig::from_env();
        std::env::remove_var("WASMPOOL_STATE_MODE");
        std::env::remove_var("WASMPOOL_CHAINED_CALL_TIMEOUT_MS");
        assert_eq!(config.state_mode, StateMode::InMemory);
        assert_eq!(config.chained_call_timeout_ms, 1234);
    }
}
