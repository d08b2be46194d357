//! Server configuration.
//!
//! Loaded from a RON file; every field is optional. Command-line flags are
//! applied on top with [`ServerConfig::with_overrides`].

use std::{fs, path::Path, time::Duration};

use axrelay_engine::EngineCfg;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, default_socket_path};

/// Allowed range for `poll_ms`.
const POLL_MS_RANGE: (u64, u64) = (1, 10_000);

/// Settings for one server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket path; `None` uses the per-user default.
    pub socket_path: Option<String>,
    /// Focus sampling interval in milliseconds.
    pub poll_ms: u64,
    /// Ceiling on ticks skipped after repeated sampling failures.
    pub max_backoff_ticks: u32,
    /// Heartbeat interval in milliseconds; 0 disables heartbeats.
    pub heartbeat_ms: u64,
    /// Application names or bundle ids treated as editors.
    pub editor_apps: Vec<String>,
    /// Forward server logs to connected clients.
    pub forward_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            poll_ms: 100,
            max_backoff_ticks: 50,
            heartbeat_ms: 0,
            editor_apps: vec!["Xcode".into(), "com.apple.dt.Xcode".into()],
            forward_logs: false,
        }
    }
}

impl ServerConfig {
    /// Parse and validate a RON document.
    pub fn from_ron(text: &str) -> Result<Self> {
        let cfg: Self = ron::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse, and validate a RON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_ron(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = POLL_MS_RANGE;
        if !(lo..=hi).contains(&self.poll_ms) {
            return Err(Error::Config(format!(
                "poll_ms must be between {lo} and {hi}, got {}",
                self.poll_ms
            )));
        }
        Ok(())
    }

    /// Apply command-line overrides, then re-validate.
    pub fn with_overrides(mut self, socket: Option<String>, poll_ms: Option<u64>) -> Result<Self> {
        if socket.is_some() {
            self.socket_path = socket;
        }
        if let Some(ms) = poll_ms {
            self.poll_ms = ms;
        }
        self.validate()?;
        Ok(self)
    }

    /// Socket path to bind, falling back to the per-user default.
    pub fn socket_path(&self) -> String {
        self.socket_path
            .clone()
            .unwrap_or_else(default_socket_path)
    }

    /// Heartbeat interval, if enabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_ms > 0).then(|| Duration::from_millis(self.heartbeat_ms))
    }

    /// Engine tuning derived from this config.
    pub fn engine_cfg(&self) -> EngineCfg {
        EngineCfg {
            poll_interval: Duration::from_millis(self.poll_ms),
            max_backoff_ticks: self.max_backoff_ticks,
            editor_apps: self.editor_apps.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = ServerConfig::from_ron("()").expect("parse");
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.heartbeat_interval(), None);
        assert_eq!(cfg.engine_cfg().poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn fields_are_read() {
        let cfg = ServerConfig::from_ron(
            r#"(
                socket_path: Some("/tmp/ax.sock"),
                poll_ms: 250,
                heartbeat_ms: 1000,
                editor_apps: ["Zed"],
                forward_logs: true,
            )"#,
        )
        .expect("parse");
        assert_eq!(cfg.socket_path(), "/tmp/ax.sock");
        assert_eq!(cfg.engine_cfg().editor_apps, vec!["Zed".to_string()]);
        assert_eq!(cfg.heartbeat_interval(), Some(Duration::from_secs(1)));
        assert!(cfg.forward_logs);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ServerConfig::from_ron("(pol_ms: 5)").expect_err("typo");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn poll_interval_is_range_checked() {
        assert!(ServerConfig::from_ron("(poll_ms: 0)").is_err());
        assert!(ServerConfig::from_ron("(poll_ms: 20000)").is_err());
        let cfg = ServerConfig::default()
            .with_overrides(None, Some(5))
            .expect("override");
        assert_eq!(cfg.poll_ms, 5);
        assert!(ServerConfig::default().with_overrides(None, Some(0)).is_err());
    }

    #[test]
    fn cli_socket_overrides_file() {
        let cfg = ServerConfig::from_ron(r#"(socket_path: Some("/a.sock"))"#)
            .expect("parse")
            .with_overrides(Some("/b.sock".into()), None)
            .expect("override");
        assert_eq!(cfg.socket_path(), "/b.sock");
    }
}
