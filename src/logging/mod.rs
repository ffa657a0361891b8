/*!
 * Logging Module
 * tracing subscriber setup: console plus daily rolling files under logs/
 */
pub mod middleware;

use std::io;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::AppConfig;

const LOG_DIR: &str = "logs";

/// Directive used when `RUST_LOG` is not set.
fn default_directive(is_production: bool, log_level: Option<&str>) -> String {
    let level = log_level
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(if is_production { "info" } else { "debug" });
    format!("consultancy_cms={},tower_http=info,sqlx=warn", level)
}

/// Initialize the logging system for the loaded configuration.
///
/// The returned guards flush the background writers on drop; hold them for
/// the lifetime of the process.
pub fn init(config: &AppConfig) -> Vec<WorkerGuard> {
    let is_production = config.is_production();

    std::fs::create_dir_all(LOG_DIR).ok();

    let (file_writer, file_guard) = non_blocking(rolling::daily(LOG_DIR, "app.log"));
    let (error_writer, error_guard) = non_blocking(rolling::daily(LOG_DIR, "error.log"));
    let (console_writer, console_guard) = non_blocking(io::stdout());

    let log_level = std::env::var("LOG_LEVEL").ok();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_directive(is_production, log_level.as_deref()))
    });

    // Errors always get their own file.
    let error_layer = fmt::layer()
        .json()
        .with_writer(error_writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(error_layer);

    if is_production {
        let file_layer = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        let console_layer = fmt::layer()
            .json()
            .with_writer(console_writer)
            .with_target(false);

        subscriber.with(file_layer).with(console_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);

        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_target(true)
            .pretty();

        subscriber.with(file_layer).with(console_layer).init();
    }

    tracing::info!("Logging initialized for {} environment", config.environment);
    vec![file_guard, error_guard, console_guard]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_by_environment() {
        assert_eq!(
            default_directive(true, None),
            "consultancy_cms=info,tower_http=info,sqlx=warn"
        );
        assert!(default_directive(false, None).starts_with("consultancy_cms=debug"));
        assert!(default_directive(true, Some("trace")).starts_with("consultancy_cms=trace"));
        assert!(default_directive(true, Some("  ")).starts_with("consultancy_cms=info"));
    }

    #[test]
    fn test_init_installs_the_layered_subscriber() {
        // The only test that touches the global dispatcher.
        let guards = init(&AppConfig::default());
        assert_eq!(guards.len(), 3);
        tracing::error!("routed to the console, app.log and error.log");
    }
}
