use crate::config::AppConfig;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Target carrying audit entries; routed to its own file as JSON.
pub const AUDIT_TARGET: &str = "audit";
pub const AUDIT_LOG_FILE: &str = "audit.log";

/// Flushes both log files on drop. Keep it alive for the life of the process.
pub struct LogGuards {
    _main: WorkerGuard,
    _audit: WorkerGuard,
}

fn appender(config: &AppConfig, file: &str) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, file),
        _ => tracing_appender::rolling::never(&config.log_dir, file),
    }
}

fn level_filter(config: &AppConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

pub fn init_logging(config: &AppConfig) -> LogGuards {
    let (main_writer, main_guard) = tracing_appender::non_blocking(appender(config, &config.log_file));
    let (audit_writer, audit_guard) =
        tracing_appender::non_blocking(appender(config, AUDIT_LOG_FILE));

    // Audit trail is always JSON, independent of the level filter
    let audit_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_writer(audit_writer)
        .with_ansi(false)
        .with_filter(Targets::new().with_target(AUDIT_TARGET, Level::INFO));

    let registry = tracing_subscriber::registry().with(audit_layer);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true) // Keep target in JSON for structured queries
            .with_writer(main_writer)
            .with_ansi(false)
            .with_filter(level_filter(config));
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(true)
            .with_writer(main_writer)
            .with_ansi(false)
            .with_filter(level_filter(config));
        let stdout_layer = fmt::layer()
            .with_target(false)
            .with_ansi(true)
            .with_filter(level_filter(config));
        registry.with(file_layer).with(stdout_layer).init();
    }

    LogGuards {
        _main: main_guard,
        _audit: audit_guard,
    }
}
