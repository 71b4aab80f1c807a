//! Cascade deletion of flight disruptions.
//!
//! Both entry points resolve a set of root ids, expand the [`DeletionPlan`]
//! into statements keyed by that set, and hand them to a
//! [`TransactionCoordinator`] so the whole cascade commits or rolls back as
//! one unit.

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::config::CascadeConfig;
use crate::criteria::{DeletionCriteria, Predicate};
use crate::db::{BindValue, ProgressObserver, Step, StepOutcome, TransactionCoordinator};
use crate::error::{CascadeError, CascadeResult};
use crate::plan::DeletionPlan;

#[derive(Clone)]
pub struct EngineOptions {
    /// Upper bound on ids bound into a single statement.
    pub batch_size: NonZeroUsize,
    pub statement_timeout: Option<Duration>,
    pub progress: Option<ProgressObserver>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions::from(&CascadeConfig::default())
    }
}

impl From<&CascadeConfig> for EngineOptions {
    fn from(config: &CascadeConfig) -> Self {
        EngineOptions {
            batch_size: config.batch_size,
            statement_timeout: config.statement_timeout,
            progress: None,
        }
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("batch_size", &self.batch_size)
            .field("statement_timeout", &self.statement_timeout)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Rows removed from one table of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDeletion {
    pub table: String,
    pub deleted: u64,
    /// Optional table absent from the schema.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisruptionSummary {
    pub id: i64,
    /// `None` when the column is NULL.
    pub flight_number: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleDeletion {
    pub disruption_id: i64,
    pub deleted_per_table: Vec<TableDeletion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeletion {
    pub deleted_root_count: u64,
    /// Roots selected by the criteria before the transaction began.
    pub matched: Vec<DisruptionSummary>,
    pub deleted_per_table: Vec<TableDeletion>,
}

/// Per-table counts shared by single and bulk results.
pub trait DeletionReport {
    fn per_table(&self) -> &[TableDeletion];

    fn deleted_from(&self, table: &str) -> Option<u64> {
        self.per_table()
            .iter()
            .find(|entry| entry.table == table)
            .map(|entry| entry.deleted)
    }

    fn total_deleted(&self) -> u64 {
        self.per_table().iter().map(|entry| entry.deleted).sum()
    }
}

impl DeletionReport for SingleDeletion {
    fn per_table(&self) -> &[TableDeletion] {
        &self.deleted_per_table
    }
}

impl DeletionReport for BulkDeletion {
    fn per_table(&self) -> &[TableDeletion] {
        &self.deleted_per_table
    }
}

pub struct CascadeDeleteEngine {
    pool: SqlitePool,
    plan: DeletionPlan,
    options: EngineOptions,
}

impl CascadeDeleteEngine {
    pub fn new(pool: SqlitePool, plan: DeletionPlan) -> Self {
        CascadeDeleteEngine {
            pool,
            plan,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn plan(&self) -> &DeletionPlan {
        &self.plan
    }

    /// Delete one disruption and everything hanging off it.
    ///
    /// Fails with [`CascadeError::NotFound`] and leaves the database untouched
    /// when the root row is gone by the time its delete runs, whatever the
    /// child steps reported.
    pub async fn delete_one(&self, id: i64) -> CascadeResult<SingleDeletion> {
        info!(target: "cascade_delete", event = "cascade_begin", mode = "single", id);
        let steps = self.steps_for(&[id], Some(id));
        let outcomes = self.coordinator().run(steps).await?;
        let deleted_per_table = self.tally(&outcomes);
        info!(
            target: "cascade_delete",
            event = "cascade_complete",
            mode = "single",
            id,
            total = deleted_per_table.iter().map(|t| t.deleted).sum::<u64>()
        );
        Ok(SingleDeletion {
            disruption_id: id,
            deleted_per_table,
        })
    }

    /// Delete every disruption matching `criteria` in one transaction.
    ///
    /// Criteria with no field set, or matching no row, are a successful
    /// no-op and open no transaction.
    pub async fn delete_by_criteria(
        &self,
        criteria: &DeletionCriteria,
    ) -> CascadeResult<BulkDeletion> {
        let matched = self.preview(criteria).await?;
        if matched.is_empty() {
            info!(target: "cascade_delete", event = "cascade_noop", mode = "bulk");
            return Ok(BulkDeletion {
                deleted_root_count: 0,
                matched,
                deleted_per_table: self.tally(&[]),
            });
        }

        let ids: Vec<i64> = matched.iter().map(|d| d.id).collect();
        info!(target: "cascade_delete", event = "cascade_begin", mode = "bulk", roots = ids.len());
        let outcomes = self.coordinator().run(self.steps_for(&ids, None)).await?;
        let deleted_per_table = self.tally(&outcomes);
        let deleted_root_count = self
            .tally_for(&outcomes, &self.plan.root().table)
            .deleted;
        info!(
            target: "cascade_delete",
            event = "cascade_complete",
            mode = "bulk",
            matched = ids.len(),
            deleted_roots = deleted_root_count
        );
        Ok(BulkDeletion {
            deleted_root_count,
            matched,
            deleted_per_table,
        })
    }

    /// Read-only: the disruptions `criteria` currently selects, by id.
    pub async fn preview(
        &self,
        criteria: &DeletionCriteria,
    ) -> CascadeResult<Vec<DisruptionSummary>> {
        let (clause, params) = match criteria.build(Utc::now())? {
            Predicate::MatchNothing => {
                info!(
                    target: "cascade_delete",
                    event = "cascade_noop",
                    reason = "empty_criteria"
                );
                return Ok(Vec::new());
            }
            Predicate::Where { clause, params } => (clause, params),
        };
        self.candidates(&clause, &params).await
    }

    async fn candidates(
        &self,
        clause: &str,
        params: &[BindValue],
    ) -> CascadeResult<Vec<DisruptionSummary>> {
        let root = self.plan.root();
        let sql = format!(
            "SELECT {id}, flight_number, status FROM {table} WHERE {clause} ORDER BY {id}",
            id = root.id_column,
            table = root.table
        );
        let mut query = sqlx::query(&sql);
        for param in params {
            query = param.bind(query);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|err| CascadeError::from_store(err, &root.table))?;

        let matched = rows
            .iter()
            .map(|row| {
                Ok(DisruptionSummary {
                    id: row.try_get(0)?,
                    flight_number: row.try_get(1)?,
                    status: row.try_get(2)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|err| CascadeError::from_store(err, &root.table))?;

        info!(
            target: "cascade_delete",
            event = "cascade_candidates",
            count = matched.len(),
            flights = %matched
                .iter()
                .map(|d| format!(
                    "{} ({})",
                    d.flight_number.as_deref().unwrap_or("?"),
                    d.status.as_deref().unwrap_or("?")
                ))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(matched)
    }

    fn coordinator(&self) -> TransactionCoordinator<'_> {
        TransactionCoordinator::new(&self.pool)
            .statement_timeout(self.options.statement_timeout)
            .observer(self.options.progress.clone())
    }

    /// Expand the plan for `ids`: every batch of a table runs before the next
    /// table, and the root table comes last.
    fn steps_for(&self, ids: &[i64], single: Option<i64>) -> Vec<Step> {
        let batch = self.options.batch_size.get();
        let mut steps = Vec::new();
        for table_step in self.plan.steps() {
            for chunk in ids.chunks(batch) {
                steps.push(
                    Step::new(&table_step.table, table_step.delete_sql(chunk.len()))
                        .bind_all(chunk.iter().copied())
                        .optional(table_step.optional),
                );
            }
        }

        let root = self.plan.root();
        for chunk in ids.chunks(batch) {
            let step = Step::new(&root.table, root.delete_sql(chunk.len()))
                .bind_all(chunk.iter().copied());
            steps.push(match single {
                Some(id) => step.fail_if_empty(CascadeError::NotFound { id }),
                None => step,
            });
        }
        steps
    }

    fn tally(&self, outcomes: &[StepOutcome]) -> Vec<TableDeletion> {
        self.plan
            .tables()
            .into_iter()
            .map(|table| self.tally_for(outcomes, table))
            .collect()
    }

    fn tally_for(&self, outcomes: &[StepOutcome], table: &str) -> TableDeletion {
        let mut entry = TableDeletion {
            table: table.to_string(),
            deleted: 0,
            skipped: false,
        };
        for outcome in outcomes.iter().filter(|o| o.table == table) {
            entry.deleted += outcome.rows_affected;
            entry.skipped |= outcome.skipped;
        }
        entry
    }
}
