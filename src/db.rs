use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{ConnectOptions, Sqlite, SqlitePool};

use crate::config::CascadeConfig;
use crate::error::{CascadeError, CascadeResult};

pub mod classify;
pub mod coordinator;

pub use coordinator::{ProgressObserver, Step, StepOutcome, TransactionCoordinator};

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    Int(i64),
    Text(String),
}

impl BindValue {
    pub(crate) fn bind<'q>(
        &'q self,
        query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            BindValue::Int(value) => query.bind(*value),
            BindValue::Text(value) => query.bind(value.as_str()),
        }
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        BindValue::Int(value)
    }
}

/// Open the pool the engine runs against. The database must already exist;
/// schema is owned by the migration tooling, never created here.
pub async fn open_pool(config: &CascadeConfig) -> CascadeResult<SqlitePool> {
    tracing::info!(
        target: "cascade_delete",
        event = "db_path",
        path = %config.db_path.display()
    );
    let opts = SqliteConnectOptions::new()
        .filename(&config.db_path)
        .create_if_missing(false)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(opts)
        .await
        .map_err(|err| {
            tracing::error!(
                target: "cascade_delete",
                event = "db_open_failed",
                error = %err,
                path = %config.db_path.display()
            );
            CascadeError::from_store(err, "<connect>")
        })?;

    log_effective_pragmas(&pool).await;
    Ok(pool)
}

/// `PRAGMA synchronous` reports FULL as 2.
const SYNCHRONOUS_FULL: i64 = 2;

async fn pragma_value(pool: &SqlitePool, pragma: &str) -> Option<i64> {
    let sql = format!("PRAGMA {pragma}");
    sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await.ok()
}

/// Read back the settings `open_pool` asked for and warn where the store
/// disagrees with them.
async fn log_effective_pragmas(pool: &SqlitePool) {
    use tracing::{info, warn};

    let version: Option<String> = sqlx::query_scalar("SELECT sqlite_version()")
        .fetch_one(pool)
        .await
        .ok();
    let journal_mode: Option<String> = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(pool)
        .await
        .ok();
    let synchronous = pragma_value(pool, "synchronous").await;
    let foreign_keys = pragma_value(pool, "foreign_keys").await;
    let busy_timeout = pragma_value(pool, "busy_timeout").await;

    info!(
        target: "cascade_delete",
        event = "db_open",
        sqlite_version = version.as_deref().unwrap_or("unknown"),
        journal_mode = journal_mode.as_deref().unwrap_or("unknown"),
        synchronous = ?synchronous,
        foreign_keys = ?foreign_keys,
        busy_timeout_ms = ?busy_timeout
    );

    if synchronous != Some(SYNCHRONOUS_FULL) {
        warn!(
            target: "cascade_delete",
            event = "db_open_warning",
            pragma = "synchronous",
            value = ?synchronous,
            msg = "commits are not fully synced"
        );
    }
    if foreign_keys != Some(1) {
        warn!(
            target: "cascade_delete",
            event = "db_open_warning",
            pragma = "foreign_keys",
            value = ?foreign_keys,
            msg = "foreign_keys disabled; cascade order is the only orphan guard"
        );
    }
}
