use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Resolve the log filter. An explicit RUST_LOG wins outright, so an
/// operator can scope debugging to one subsystem (say,
/// `crawlerd::proxy=trace`) without also drowning in per-request worker
/// output. Without it, `--verbose` opens this crate at debug while
/// dependencies stay at warn.
fn resolve_filter(verbose: bool, env_override: Option<&str>) -> Result<EnvFilter> {
    if let Some(directives) = env_override {
        return EnvFilter::try_new(directives)
            .context(format!("Invalid RUST_LOG filter: {}", directives));
    }

    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_new(format!("warn,crawlerd={}", level))
        .context("Failed to build default log filter")
}

/// Initialize logging for the daemon: console output, plus a plain-text
/// file sink when `--log-file` is given. The file opens in append mode so
/// a restart never truncates the previous run's log.
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = resolve_filter(verbose, rust_log.as_deref())?;

    let console_layer = fmt::layer().with_target(true);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .context(format!("Failed to open log file {}", path.display()))?;
            let file_layer = fmt::layer().with_target(true).with_ansi(false).with_writer(file);

            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console_layer).init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_flag_controls_the_crate_level() {
        let filter = resolve_filter(true, None).unwrap().to_string();
        assert!(filter.contains("crawlerd=debug"));
        assert!(filter.contains("warn"));

        let filter = resolve_filter(false, None).unwrap().to_string();
        assert!(filter.contains("crawlerd=info"));
    }

    #[test]
    fn explicit_rust_log_replaces_the_defaults() {
        let filter = resolve_filter(false, Some("crawlerd::proxy=trace")).unwrap().to_string();
        assert!(filter.contains("proxy=trace"));
        assert!(!filter.contains("crawlerd=info"));

        assert!(resolve_filter(true, Some("not a filter !!")).is_err());
    }
}
