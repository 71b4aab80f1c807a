use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::Error as SqlxError;
use thiserror::Error;

use crate::db::classify::{classify, StoreFailure};

pub type CascadeResult<T> = std::result::Result<T, CascadeError>;

/// Every failure the cascade engine can surface to a caller.
///
/// Missing optional tables are absorbed inside the transaction coordinator
/// and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CascadeError {
    #[error("flight disruption {id} not found")]
    NotFound { id: i64 },
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },
    #[error("constraint violation on {table}: {message}")]
    ConstraintViolation {
        table: String,
        constraint: Option<String>,
        message: String,
    },
    #[error("database error on {table}: {message}")]
    Database {
        table: String,
        code: Option<String>,
        message: String,
    },
    #[error("connection error: {message}")]
    Connection { message: String },
    #[error("statement timed out on {table}")]
    Timeout { table: String },
    #[error("invalid deletion plan: {message}")]
    InvalidPlan { message: String },
}

impl CascadeError {
    pub const NOT_FOUND_CODE: &'static str = "CASCADE/NOT_FOUND";
    pub const VALIDATION_CODE: &'static str = "CASCADE/VALIDATION";
    pub const INVALID_PLAN_CODE: &'static str = "CASCADE/INVALID_PLAN";

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CascadeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_plan(message: impl Into<String>) -> Self {
        CascadeError::InvalidPlan {
            message: message.into(),
        }
    }

    /// Map a driver error raised while working on `table` into the taxonomy.
    ///
    /// A missing table reaching this point was not tolerated by the
    /// coordinator, so it is reported as a plain database error.
    pub fn from_store(error: SqlxError, table: &str) -> Self {
        match classify(&error) {
            StoreFailure::Constraint { constraint } => CascadeError::ConstraintViolation {
                table: table.to_string(),
                constraint,
                message: error_message(&error),
            },
            StoreFailure::Connection => CascadeError::Connection {
                message: error_message(&error),
            },
            StoreFailure::MissingTable { .. } | StoreFailure::Other { .. } => {
                CascadeError::Database {
                    table: table.to_string(),
                    code: database_code(&error),
                    message: error_message(&error),
                }
            }
        }
    }

    /// Machine readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            CascadeError::NotFound { .. } => Self::NOT_FOUND_CODE,
            CascadeError::Validation { .. } => Self::VALIDATION_CODE,
            CascadeError::ConstraintViolation { .. } => "DB/CONSTRAINT",
            CascadeError::Database { .. } => "DB/ERROR",
            CascadeError::Connection { .. } => "DB/CONNECTION",
            CascadeError::Timeout { .. } => "DB/TIMEOUT",
            CascadeError::InvalidPlan { .. } => Self::INVALID_PLAN_CODE,
        }
    }

    /// Contextual key/value pairs for structured output.
    pub fn context(&self) -> BTreeMap<String, String> {
        let mut context = BTreeMap::new();
        match self {
            CascadeError::NotFound { id } => {
                context.insert("id".into(), id.to_string());
            }
            CascadeError::Validation { field, .. } => {
                context.insert("field".into(), field.clone());
            }
            CascadeError::ConstraintViolation {
                table, constraint, ..
            } => {
                context.insert("table".into(), table.clone());
                if let Some(constraint) = constraint {
                    context.insert("constraint".into(), constraint.clone());
                }
            }
            CascadeError::Database { table, code, .. } => {
                context.insert("table".into(), table.clone());
                if let Some(code) = code {
                    context.insert("db_code".into(), code.clone());
                }
            }
            CascadeError::Timeout { table } => {
                context.insert("table".into(), table.clone());
            }
            CascadeError::Connection { .. } | CascadeError::InvalidPlan { .. } => {}
        }
        context
    }
}

impl From<SqlxError> for CascadeError {
    fn from(error: SqlxError) -> Self {
        CascadeError::from_store(error, "<none>")
    }
}

fn error_message(error: &SqlxError) -> String {
    match error {
        SqlxError::Database(db) => db.message().to_string(),
        SqlxError::PoolTimedOut => "Timed out acquiring a database connection".to_string(),
        SqlxError::PoolClosed => "Database pool is closed".to_string(),
        other => other.to_string(),
    }
}

fn database_code(error: &SqlxError) -> Option<String> {
    match error {
        SqlxError::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Flat, serializable view of a [`CascadeError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl From<&CascadeError> for ErrorPayload {
    fn from(error: &CascadeError) -> Self {
        ErrorPayload {
            code: error.code().to_string(),
            message: error.to_string(),
            context: error.context(),
        }
    }
}
