use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::constants::{DEFAULT_LOG_FILTER, LOG_DIR, LOG_FILE};
use crate::error::Result;

/// `RUST_LOG` wins when it parses; otherwise the crate logs at info.
pub fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Console output for people, a daily-rolled JSON file for later digging.
///
/// The returned guard flushes the file writer when dropped, so `main` holds it
/// until exit.
pub fn init_logging() -> Result<WorkerGuard> {
    init_logging_in(Path::new(LOG_DIR))
}

fn init_logging_in(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE));

    let directives = std::env::var("RUST_LOG").ok();
    tracing_subscriber::registry()
        .with(env_filter(directives.as_deref()))
        .with(fmt::layer().json().with_current_span(true).with_writer(writer))
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stdout))
        .init();
    Ok(guard)
}
