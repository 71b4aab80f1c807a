use crate::config::{DEFAULT_LOG_FILTER, LOG_ENV};

/// Install the JSON tracing subscriber on stderr and bridge `log` records
/// (sqlx emits through `log`) into it.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_directive(std::env::var(LOG_ENV).ok()))
        .json()
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter_directive(env: Option<String>) -> String {
    env.filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}
