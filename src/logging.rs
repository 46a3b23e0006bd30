//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for the filter:
//! 1. `RUST_LOG` environment variable
//! 2. `--verbose` CLI flag (debug for topomap and tower_http)
//! 3. `[logging] filter` from topomap.toml
//!
//! Console logs go to stderr so `topomap run` can print snapshots on stdout.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSection;

const VERBOSE_FILTER: &str = "topomap=debug,tower_http=debug";
const LOG_FILE_PREFIX: &str = "topomap.log";

/// Initialise the global subscriber.
///
/// The returned guard flushes the log file on drop; keep it alive for the
/// life of the process.
pub fn init(section: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directives = filter_directives(section, verbose);
            EnvFilter::try_new(directives)
                .with_context(|| format!("Invalid log filter '{}'", directives))?
        }
    };

    let (file_layer, guard) = match &section.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = section
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let plain_layer = (!section.json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(plain_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(guard)
}

/// Filter directives used when `RUST_LOG` is unset.
pub fn filter_directives(section: &LoggingSection, verbose: bool) -> &str {
    if verbose {
        VERBOSE_FILTER
    } else {
        &section.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_overrides_configured_filter() {
        let section = LoggingSection {
            filter: "topomap=warn".into(),
            ..LoggingSection::default()
        };
        assert_eq!(filter_directives(&section, false), "topomap=warn");
        assert_eq!(filter_directives(&section, true), VERBOSE_FILTER);
    }

    #[test]
    fn test_default_filter_parses() {
        let section = LoggingSection::default();
        assert!(EnvFilter::try_new(filter_directives(&section, false)).is_ok());
        assert!(EnvFilter::try_new(VERBOSE_FILTER).is_ok());
    }
}
