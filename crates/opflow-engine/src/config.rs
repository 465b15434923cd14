// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use opflow_core::{LabelSelector, RetryPolicy, TimeoutAction};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL or file path for the task store
    pub database_url: String,
    /// Namespaces to watch for execution units
    pub namespaces: Vec<String>,
    /// Resync interval of the polling watch source
    pub watch_poll_interval: Duration,
    /// Bounded wait used when replacing prior work
    pub replacement_retry: RetryPolicy,
    /// Fail instead of warning when prior work outlives the wait
    pub strict_replacement: bool,
    /// Image prefix handed to execution units
    pub image_prefix: String,
    /// Whether S3 repositories verify TLS
    pub s3_verify_tls: bool,
    /// Node selector identifying preferred failover nodes
    pub preferred_failover_nodes: Option<LabelSelector>,
    /// Optional JSON snapshot used to seed the cluster inventory
    pub inventory_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `OPFLOW_DATABASE_URL`: SQLite connection string or file path
    ///
    /// Optional (with defaults):
    /// - `OPFLOW_NAMESPACES`: comma-separated namespaces (default: default)
    /// - `OPFLOW_WATCH_POLL_INTERVAL_MS`: watch resync interval (default: 2000)
    /// - `OPFLOW_REPLACEMENT_MAX_ATTEMPTS`: removal polls (default: 3)
    /// - `OPFLOW_REPLACEMENT_DELAY_MS`: delay between removal polls (default: 2000)
    /// - `OPFLOW_REPLACEMENT_STRICT`: fail on removal timeout (default: false)
    /// - `OPFLOW_IMAGE_PREFIX`: image prefix (default: opflow)
    /// - `OPFLOW_S3_VERIFY_TLS`: verify TLS for S3 repositories (default: true)
    /// - `OPFLOW_PREFERRED_FAILOVER_NODE_SELECTOR`: node label selector (default: none)
    /// - `OPFLOW_INVENTORY_PATH`: inventory snapshot file (default: none)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("OPFLOW_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("OPFLOW_DATABASE_URL"))?;

        let namespaces: Vec<String> = std::env::var("OPFLOW_NAMESPACES")
            .unwrap_or_else(|_| "default".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if namespaces.is_empty() {
            return Err(ConfigError::Invalid(
                "OPFLOW_NAMESPACES",
                "must list at least one namespace",
            ));
        }

        let watch_poll_ms: u64 = std::env::var("OPFLOW_WATCH_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("OPFLOW_WATCH_POLL_INTERVAL_MS", "must be milliseconds")
            })?;

        let max_attempts: u32 = std::env::var("OPFLOW_REPLACEMENT_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "OPFLOW_REPLACEMENT_MAX_ATTEMPTS",
                "must be a positive integer",
            ))?;

        let delay_ms: u64 = std::env::var("OPFLOW_REPLACEMENT_DELAY_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("OPFLOW_REPLACEMENT_DELAY_MS", "must be milliseconds")
            })?;

        let strict_replacement = std::env::var("OPFLOW_REPLACEMENT_STRICT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let image_prefix =
            std::env::var("OPFLOW_IMAGE_PREFIX").unwrap_or_else(|_| "opflow".to_string());

        let s3_verify_tls = std::env::var("OPFLOW_S3_VERIFY_TLS")
            .map(|v| !(v == "false" || v == "0"))
            .unwrap_or(true);

        let preferred_failover_nodes: Option<LabelSelector> =
            match std::env::var("OPFLOW_PREFERRED_FAILOVER_NODE_SELECTOR") {
                Ok(raw) if !raw.trim().is_empty() => Some(raw.parse().map_err(|_| {
                    ConfigError::Invalid(
                        "OPFLOW_PREFERRED_FAILOVER_NODE_SELECTOR",
                        "must be a label selector",
                    )
                })?),
                _ => None,
            };

        let inventory_path = std::env::var("OPFLOW_INVENTORY_PATH").ok().map(PathBuf::from);

        Ok(Self {
            database_url,
            namespaces,
            watch_poll_interval: Duration::from_millis(watch_poll_ms),
            replacement_retry: RetryPolicy::fixed(max_attempts, Duration::from_millis(delay_ms)),
            strict_replacement,
            image_prefix,
            s3_verify_tls,
            preferred_failover_nodes,
            inventory_path,
        })
    }

    /// Settings handed to the orchestrators.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            image_prefix: self.image_prefix.clone(),
            s3_verify_tls: self.s3_verify_tls,
            preferred_failover_nodes: self.preferred_failover_nodes.clone(),
            replacement_retry: self.replacement_retry,
            on_replacement_timeout: if self.strict_replacement {
                TimeoutAction::Fail
            } else {
                TimeoutAction::Warn
            },
        }
    }
}

/// Settings shared by every orchestrator.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub image_prefix: String,
    pub s3_verify_tls: bool,
    pub preferred_failover_nodes: Option<LabelSelector>,
    pub replacement_retry: RetryPolicy,
    pub on_replacement_timeout: TimeoutAction,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            image_prefix: "opflow".to_string(),
            s3_verify_tls: true,
            preferred_failover_nodes: None,
            replacement_retry: RetryPolicy::default(),
            on_replacement_timeout: TimeoutAction::Warn,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "OPFLOW_DATABASE_URL",
        "OPFLOW_NAMESPACES",
        "OPFLOW_WATCH_POLL_INTERVAL_MS",
        "OPFLOW_REPLACEMENT_MAX_ATTEMPTS",
        "OPFLOW_REPLACEMENT_DELAY_MS",
        "OPFLOW_REPLACEMENT_STRICT",
        "OPFLOW_IMAGE_PREFIX",
        "OPFLOW_S3_VERIFY_TLS",
        "OPFLOW_PREFERRED_FAILOVER_NODE_SELECTOR",
        "OPFLOW_INVENTORY_PATH",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in ALL_VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("OPFLOW_DATABASE_URL", "sqlite::memory:");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.namespaces, vec!["default"]);
        assert_eq!(config.watch_poll_interval, Duration::from_secs(2));
        assert_eq!(
            config.replacement_retry,
            RetryPolicy::fixed(3, Duration::from_secs(2))
        );
        assert!(!config.strict_replacement);
        assert_eq!(config.image_prefix, "opflow");
        assert!(config.s3_verify_tls);
        assert!(config.preferred_failover_nodes.is_none());
        assert!(config.inventory_path.is_none());
        assert_eq!(
            config.engine_settings().on_replacement_timeout,
            TimeoutAction::Warn
        );
    }

    #[test]
    fn test_config_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("OPFLOW_DATABASE_URL", ".data/opflow.db");
        guard.set("OPFLOW_NAMESPACES", "pgo, tenant-a ,");
        guard.set("OPFLOW_WATCH_POLL_INTERVAL_MS", "250");
        guard.set("OPFLOW_REPLACEMENT_MAX_ATTEMPTS", "30");
        guard.set("OPFLOW_REPLACEMENT_DELAY_MS", "1000");
        guard.set("OPFLOW_REPLACEMENT_STRICT", "true");
        guard.set("OPFLOW_IMAGE_PREFIX", "registry.local/pg");
        guard.set("OPFLOW_S3_VERIFY_TLS", "false");
        guard.set("OPFLOW_PREFERRED_FAILOVER_NODE_SELECTOR", "disk=ssd");
        guard.set("OPFLOW_INVENTORY_PATH", "/etc/opflow/inventory.json");

        let config = Config::from_env().unwrap();
        assert_eq!(config.namespaces, vec!["pgo", "tenant-a"]);
        assert_eq!(config.watch_poll_interval, Duration::from_millis(250));
        assert_eq!(config.replacement_retry.max_attempts, 30);
        assert!(config.strict_replacement);
        assert!(!config.s3_verify_tls);
        assert_eq!(
            config.preferred_failover_nodes.unwrap().to_string(),
            "disk=ssd"
        );
        assert_eq!(
            config.inventory_path.unwrap(),
            PathBuf::from("/etc/opflow/inventory.json")
        );
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OPFLOW_DATABASE_URL")));
    }

    #[test]
    fn test_config_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("OPFLOW_DATABASE_URL", "sqlite::memory:");

        guard.set("OPFLOW_REPLACEMENT_MAX_ATTEMPTS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("OPFLOW_REPLACEMENT_MAX_ATTEMPTS", _))
        ));

        guard.set("OPFLOW_REPLACEMENT_MAX_ATTEMPTS", "3");
        guard.set("OPFLOW_WATCH_POLL_INTERVAL_MS", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("OPFLOW_WATCH_POLL_INTERVAL_MS", _))
        ));

        guard.set("OPFLOW_WATCH_POLL_INTERVAL_MS", "100");
        guard.set("OPFLOW_NAMESPACES", " , ");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("OPFLOW_NAMESPACES", _))
        ));
    }
}
