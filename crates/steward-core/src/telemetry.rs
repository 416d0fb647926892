//! Tracing setup for the `steward` binary.
//!
//! The steward's own crates log at the requested level. HTTP and runtime
//! crates stay at `warn` so a `--verbose` run is not drowned in connection
//! chatter. `RUST_LOG` replaces the whole filter when set.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Name reported in the startup event and used as the root span name.
pub const SERVICE_NAME: &str = "pr-steward";

const STEWARD_TARGETS: &[&str] = &["steward", "steward_core", "steward_hosting"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_filter(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(STEWARD_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Install the global subscriber on stderr; stdout is reserved for command
/// output. `json` switches to newline-delimited JSON for CI log collectors.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    let installed = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.compact())
            .try_init()
    };
    if installed.is_ok() {
        tracing::debug!(service = SERVICE_NAME, version = crate::VERSION, "tracing ready");
    }
}
