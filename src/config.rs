use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CascadeError, CascadeResult};

pub const DB_ENV: &str = "CASCADE_DELETE_DB";
pub const LOG_ENV: &str = "CASCADE_DELETE_LOG";
pub const MAX_CONNECTIONS_ENV: &str = "CASCADE_DELETE_MAX_CONNECTIONS";
pub const ACQUIRE_TIMEOUT_ENV: &str = "CASCADE_DELETE_ACQUIRE_TIMEOUT_MS";
pub const STATEMENT_TIMEOUT_ENV: &str = "CASCADE_DELETE_STATEMENT_TIMEOUT_MS";
pub const BATCH_SIZE_ENV: &str = "CASCADE_DELETE_BATCH_SIZE";

pub const DEFAULT_LOG_FILTER: &str = "cascade_delete=info,sqlx=warn";
pub const DEFAULT_BATCH_SIZE: usize = 500;
const APP_DIR: &str = "cascade-delete";
const DB_FILE: &str = "disruptions.sqlite3";

/// Runtime settings: defaults, then environment, then command line flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeConfig {
    pub db_path: PathBuf,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
    pub statement_timeout: Option<Duration>,
    pub batch_size: NonZeroUsize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        CascadeConfig {
            db_path: default_db_path(),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_millis(5000),
            statement_timeout: None,
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl CascadeConfig {
    pub fn from_env() -> CascadeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; tests pass a map here.
    pub fn from_lookup<F>(lookup: F) -> CascadeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = CascadeConfig::default();
        if let Some(path) = lookup(DB_ENV).filter(|v| !v.trim().is_empty()) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(MAX_CONNECTIONS_ENV) {
            config.max_connections = parse_positive(MAX_CONNECTIONS_ENV, &raw)?;
        }
        if let Some(raw) = lookup(ACQUIRE_TIMEOUT_ENV) {
            config.acquire_timeout = Duration::from_millis(parse_positive(ACQUIRE_TIMEOUT_ENV, &raw)?);
        }
        if let Some(raw) = lookup(STATEMENT_TIMEOUT_ENV) {
            let ms: u64 = parse_number(STATEMENT_TIMEOUT_ENV, &raw)?;
            config.statement_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(raw) = lookup(BATCH_SIZE_ENV) {
            let size: usize = parse_positive(BATCH_SIZE_ENV, &raw)?;
            config.batch_size = NonZeroUsize::new(size)
                .ok_or_else(|| CascadeError::validation(BATCH_SIZE_ENV, "must be positive"))?;
        }
        Ok(config)
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }
}

pub fn default_db_path() -> PathBuf {
    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(std::env::temp_dir);
    base.join(APP_DIR).join(DB_FILE)
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> CascadeResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| CascadeError::validation(key, format!("`{raw}` is not a valid number")))
}

fn parse_positive<T>(key: &str, raw: &str) -> CascadeResult<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value: T = parse_number(key, raw)?;
    if value > T::default() {
        Ok(value)
    } else {
        Err(CascadeError::validation(key, "must be positive"))
    }
}
