//! Process-wide `tracing` subscriber setup shared by both binaries.

use std::{env, sync::Once};

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

/// Environment variable that quiets logging for integration test runs.
pub const INTEGRATION_TEST_ENV: &str = "TUNLEASE_INTEGRATION_TEST";

static INIT_TRACING: Once = Once::new();

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}

/// Install the global subscriber. Subsequent calls are ignored.
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing(format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let default_level = if env::var(INTEGRATION_TEST_ENV).is_ok() {
            "error"
        } else {
            "info"
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_timer(ChronoLocal::rfc_3339());

        match format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}
