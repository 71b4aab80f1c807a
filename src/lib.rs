//! Transactional cascade deletion of flight disruptions.
//!
//! A disruption owns recovery options, steps, crew and hotel records and a
//! handful of detail tables keyed through its recovery options. The
//! [`CascadeDeleteEngine`] removes one disruption, or every disruption
//! matching a [`DeletionCriteria`], together with all of those rows inside a
//! single transaction.

pub mod cascade;
pub mod config;
pub mod criteria;
pub mod db;
pub mod error;
pub mod logging;
pub mod plan;

pub use cascade::{
    BulkDeletion, CascadeDeleteEngine, DeletionReport, DisruptionSummary, EngineOptions,
    SingleDeletion, TableDeletion,
};
pub use config::CascadeConfig;
pub use criteria::{DeletionCriteria, Predicate};
pub use db::{open_pool, BindValue, ProgressObserver, Step, StepOutcome, TransactionCoordinator};
pub use error::{CascadeError, CascadeResult, ErrorPayload};
pub use plan::{DeletionPlan, KeyPath, RootTable, TableStep};
