use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{error, info, warn};

use super::classify::{classify, is_interrupted};
use super::BindValue;
use crate::error::{CascadeError, CascadeResult};

const OPTIONAL_SAVEPOINT: &str = "cascade_optional_step";
/// VM instructions between deadline checks while a statement runs.
const DEADLINE_CHECK_OPS: i32 = 1_000;

/// Called once per step, in execution order, after the transaction commits.
/// A run that rolls back reports nothing.
pub type ProgressObserver = Arc<dyn Fn(&StepOutcome) + Send + Sync>;

/// One mutating statement inside a coordinated transaction.
#[derive(Debug, Clone)]
pub struct Step {
    pub table: String,
    pub sql: String,
    pub params: Vec<BindValue>,
    /// A missing `table` is skipped instead of failing the transaction.
    pub optional: bool,
    /// Fail the whole transaction with this error if no row was affected.
    pub on_empty: Option<CascadeError>,
}

impl Step {
    pub fn new(table: impl Into<String>, sql: impl Into<String>) -> Self {
        Step {
            table: table.into(),
            sql: sql.into(),
            params: Vec::new(),
            optional: false,
            on_empty: None,
        }
    }

    pub fn bind(mut self, value: impl Into<BindValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn bind_all<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<BindValue>,
    {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn fail_if_empty(mut self, error: CascadeError) -> Self {
        self.on_empty = Some(error);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub table: String,
    pub rows_affected: u64,
    /// The table was optional and absent.
    pub skipped: bool,
}

/// Runs an ordered list of steps as one all-or-nothing unit of work.
///
/// Exactly one commit or one rollback happens per [`run`](Self::run). The
/// pooled connection belongs to the transaction and goes back to the pool on
/// every exit path, including unwinding.
pub struct TransactionCoordinator<'p> {
    pool: &'p SqlitePool,
    statement_timeout: Option<Duration>,
    observer: Option<ProgressObserver>,
}

impl<'p> TransactionCoordinator<'p> {
    pub fn new(pool: &'p SqlitePool) -> Self {
        TransactionCoordinator {
            pool,
            statement_timeout: None,
            observer: None,
        }
    }

    /// Interrupt any single statement still running after `limit`; the run
    /// then rolls back with [`CascadeError::Timeout`].
    pub fn statement_timeout(mut self, limit: Option<Duration>) -> Self {
        self.statement_timeout = limit;
        self
    }

    pub fn observer(mut self, observer: Option<ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub async fn run(&self, steps: Vec<Step>) -> CascadeResult<Vec<StepOutcome>> {
        let started = Instant::now();
        let step_count = steps.len();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| CascadeError::from_store(err, "<begin>"))?;
        info!(target: "cascade_delete", event = "db_tx_begin", steps = step_count);

        let result = self.execute_all(&mut *tx, steps).await;
        match result {
            Ok(outcomes) => {
                tx.commit()
                    .await
                    .map_err(|err| CascadeError::from_store(err, "<commit>"))?;
                info!(
                    target: "cascade_delete",
                    event = "db_tx_commit",
                    steps = step_count,
                    elapsed_ms = started.elapsed().as_millis() as u64
                );
                if let Some(observer) = &self.observer {
                    outcomes.iter().for_each(|outcome| observer(outcome));
                }
                Ok(outcomes)
            }
            Err(err) => {
                if matches!(err, CascadeError::Timeout { .. }) {
                    reopen_after_interrupt(&mut *tx).await;
                }
                if let Err(rb) = tx.rollback().await {
                    error!(target: "cascade_delete", event = "db_tx_rollback_failed", error = %rb);
                } else {
                    warn!(
                        target: "cascade_delete",
                        event = "db_tx_rollback",
                        code = err.code(),
                        error = %err
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute_all(
        &self,
        conn: &mut SqliteConnection,
        steps: Vec<Step>,
    ) -> CascadeResult<Vec<StepOutcome>> {
        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps {
            let outcome = if step.optional {
                self.execute_optional(conn, &step).await?
            } else {
                let rows = self
                    .execute(conn, &step)
                    .await?
                    .map_err(|err| CascadeError::from_store(err, &step.table))?;
                StepOutcome {
                    table: step.table.clone(),
                    rows_affected: rows,
                    skipped: false,
                }
            };

            if outcome.rows_affected == 0 {
                if let Some(err) = step.on_empty {
                    return Err(err);
                }
            }

            info!(
                target: "cascade_delete",
                event = "cascade_step",
                table = %outcome.table,
                rows = outcome.rows_affected,
                skipped = outcome.skipped
            );
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Optional steps run under a savepoint so a missing table leaves the
    /// enclosing transaction usable on stores that abort it on any error.
    async fn execute_optional(
        &self,
        conn: &mut SqliteConnection,
        step: &Step,
    ) -> CascadeResult<StepOutcome> {
        savepoint(conn, &format!("SAVEPOINT {OPTIONAL_SAVEPOINT}"), &step.table).await?;
        match self.execute(conn, step).await? {
            Ok(rows) => {
                savepoint(conn, &format!("RELEASE SAVEPOINT {OPTIONAL_SAVEPOINT}"), &step.table)
                    .await?;
                Ok(StepOutcome {
                    table: step.table.clone(),
                    rows_affected: rows,
                    skipped: false,
                })
            }
            Err(err) if classify(&err).is_missing(&step.table) => {
                savepoint(
                    conn,
                    &format!("ROLLBACK TO SAVEPOINT {OPTIONAL_SAVEPOINT}"),
                    &step.table,
                )
                .await?;
                savepoint(conn, &format!("RELEASE SAVEPOINT {OPTIONAL_SAVEPOINT}"), &step.table)
                    .await?;
                warn!(
                    target: "cascade_delete",
                    event = "cascade_step_skipped",
                    table = %step.table,
                    reason = "table_missing"
                );
                Ok(StepOutcome {
                    table: step.table.clone(),
                    rows_affected: 0,
                    skipped: true,
                })
            }
            Err(err) => Err(CascadeError::from_store(err, &step.table)),
        }
    }

    /// Outer error is a timeout; inner is the driver's verdict.
    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        step: &Step,
    ) -> CascadeResult<Result<u64, sqlx::Error>> {
        let deadline = self.statement_timeout.map(|limit| Instant::now() + limit);
        if let Some(deadline) = deadline {
            conn.lock_handle()
                .await
                .map_err(|err| CascadeError::from_store(err, &step.table))?
                .set_progress_handler(DEADLINE_CHECK_OPS, move || Instant::now() < deadline);
        }

        let mut query = sqlx::query(&step.sql);
        for param in &step.params {
            query = param.bind(query);
        }
        let result = query.execute(&mut *conn).await;

        if deadline.is_some() {
            conn.lock_handle()
                .await
                .map_err(|err| CascadeError::from_store(err, &step.table))?
                .remove_progress_handler();
        }
        match result {
            Err(err) if deadline.is_some() && is_interrupted(&err) => Err(CascadeError::Timeout {
                table: step.table.clone(),
            }),
            result => Ok(result.map(|done| done.rows_affected())),
        }
    }
}

async fn savepoint(conn: &mut SqliteConnection, sql: &str, table: &str) -> CascadeResult<()> {
    sqlx::query(sql)
        .execute(&mut *conn)
        .await
        .map_err(|err| CascadeError::from_store(err, table))?;
    Ok(())
}

/// SQLite ends the whole transaction when a write statement is interrupted,
/// while the driver still counts it as open. Start an empty one so the
/// driver's ROLLBACK has a transaction to close. `BEGIN` fails harmlessly if
/// the original transaction survived.
async fn reopen_after_interrupt(conn: &mut SqliteConnection) {
    if sqlx::query("BEGIN").execute(&mut *conn).await.is_ok() {
        warn!(target: "cascade_delete", event = "db_tx_ended_by_interrupt");
    }
}
