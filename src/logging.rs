//! Console logging for the proxy and the demo backends.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LogLevel};

/// Pingora crates that report every connection at info.
const ENGINE_CRATES: [&str; 2] = ["pingora_core", "pingora_proxy"];

/// Builds the filter directives for `level`.
///
/// At `info` the engine crates are held at `warn`, so the console shows
/// routing decisions rather than connection churn. Other levels apply to
/// every crate alike.
pub fn filter_directives(level: LogLevel) -> String {
    match level {
        LogLevel::Info => std::iter::once(level.as_str().to_string())
            .chain(ENGINE_CRATES.iter().map(|krate| format!("{}=warn", krate)))
            .collect::<Vec<_>>()
            .join(","),
        _ => level.as_str().to_string(),
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(level)))?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_ansi(false),
            )
            .try_init()?,
        LogFormat::Text => registry.with(fmt::layer().compact()).try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_level_builds_a_filter() {
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            let directives = filter_directives(level);
            assert!(
                EnvFilter::try_new(&directives).is_ok(),
                "{} should be a valid filter",
                directives
            );
        }
    }

    #[test]
    fn info_quiets_engine_crates() {
        assert_eq!(
            filter_directives(LogLevel::Info),
            "info,pingora_core=warn,pingora_proxy=warn"
        );
    }

    #[test]
    fn debug_applies_to_engine_crates() {
        assert_eq!(filter_directives(LogLevel::Debug), "debug");
    }
}
