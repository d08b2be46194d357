//! Log setup shared by the axrelay binaries.
//!
//! - [`LogArgs`]: the `--trace`/`--debug`/`--log-level`/`--log-filter` flags
//!   and the filter spec they resolve to.
//! - [`fmt`]: renders an event into the `(level, target, message)` carried by
//!   `ServerMsg::Log`.
//! - [`forward`]: a layer that hands rendered lines to the socket server.
#![warn(missing_docs)]

use std::env;

use clap::Args;
use tracing_subscriber::EnvFilter;

pub mod fmt;
pub mod forward;

/// Tracing targets belonging to this workspace. Level flags only touch these,
/// so dependencies stay quiet at `--debug`.
pub const WORKSPACE_CRATES: [&str; 6] = [
    "axrelay",
    "axrelay_server",
    "axrelay_engine",
    "axrelay_protocol",
    "mac_ax_source",
    "logging",
];

/// Log verbosity flags, flattened into each binary's CLI.
#[derive(Debug, Clone, Default, Args)]
pub struct LogArgs {
    /// Trace-level output from axrelay crates
    #[arg(long, conflicts_with_all = ["debug", "log_level", "log_filter"])]
    pub trace: bool,

    /// Debug-level output from axrelay crates
    #[arg(long, conflicts_with_all = ["trace", "log_level", "log_filter"])]
    pub debug: bool,

    /// Level for axrelay crates: error, warn, info, debug or trace
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Raw EnvFilter directives, used as given
    /// (e.g. "axrelay_engine=trace,axrelay_server=debug")
    #[arg(long, value_name = "DIRECTIVES")]
    pub log_filter: Option<String>,
}

impl LogArgs {
    /// Filter spec for these flags; see [`compute_spec`].
    pub fn spec(&self) -> String {
        compute_spec(
            self.trace,
            self.debug,
            self.log_level.as_deref(),
            self.log_filter.as_deref(),
        )
    }
}

/// `crate=level` directives for every workspace crate.
pub fn scoped_spec(level: &str) -> String {
    let level = level.to_ascii_lowercase();
    WORKSPACE_CRATES
        .map(|krate| format!("{krate}={level}"))
        .join(",")
}

/// Resolve the filter spec. An explicit filter is used verbatim; otherwise
/// the first of `trace`, `debug`, `log_level` that is set picks a
/// workspace-scoped level. With no flags, a non-blank `RUST_LOG` is honoured,
/// and the fallback is workspace-scoped `info`.
pub fn compute_spec(
    trace: bool,
    debug: bool,
    log_level: Option<&str>,
    log_filter: Option<&str>,
) -> String {
    let level = match (log_filter, trace, debug, log_level) {
        (Some(filter), ..) => return filter.to_string(),
        (None, true, ..) => Some("trace"),
        (None, false, true, _) => Some("debug"),
        (None, false, false, level) => level,
    };
    if let Some(level) = level {
        return scoped_spec(level);
    }
    env::var("RUST_LOG")
        .ok()
        .filter(|spec| !spec.trim().is_empty())
        .unwrap_or_else(|| scoped_spec("info"))
}

/// Build an [`EnvFilter`] from a resolved spec.
pub fn env_filter_from_spec(spec: &str) -> EnvFilter {
    EnvFilter::new(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins() {
        let spec = compute_spec(false, false, Some("warn"), Some("axrelay_engine=trace"));
        assert_eq!(spec, "axrelay_engine=trace");
    }

    #[test]
    fn flags_are_crate_scoped() {
        let spec = compute_spec(false, true, None, None);
        assert!(spec.contains("axrelay_engine=debug"));
        assert!(spec.contains("mac_ax_source=debug"));
        assert!(!spec.contains("tokio"));
        assert_eq!(
            compute_spec(false, false, Some("WARN"), None),
            scoped_spec("warn")
        );
    }

    #[test]
    fn level_flag_beats_level_name() {
        assert_eq!(
            compute_spec(true, false, Some("error"), None),
            scoped_spec("trace")
        );
        assert_eq!(scoped_spec("INFO").split(',').count(), WORKSPACE_CRATES.len());
    }
}
