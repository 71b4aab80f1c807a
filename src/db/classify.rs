use sqlx::error::ErrorKind;
use sqlx::Error as SqlxError;

const PG_UNDEFINED_TABLE: &str = "42P01";
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;
const SQLITE_INTERRUPT: i64 = 9;

/// Driver-neutral category of a storage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFailure {
    /// The statement referenced a table that does not exist.
    MissingTable { table: Option<String> },
    Constraint { constraint: Option<String> },
    /// Acquiring a connection or taking the write lock failed.
    Connection,
    Other { code: Option<String> },
}

impl StoreFailure {
    /// True when this is a missing-table failure for `table` itself.
    ///
    /// A failure whose table name could not be recovered from the driver
    /// message is attributed to the statement's own table.
    pub fn is_missing(&self, table: &str) -> bool {
        match self {
            StoreFailure::MissingTable { table: Some(missing) } => {
                missing.eq_ignore_ascii_case(table)
            }
            StoreFailure::MissingTable { table: None } => true,
            _ => false,
        }
    }
}

pub fn classify(error: &SqlxError) -> StoreFailure {
    match error {
        SqlxError::Database(db) => {
            let code = db.code().map(|c| c.into_owned());
            if code.as_deref() == Some(PG_UNDEFINED_TABLE) {
                return StoreFailure::MissingTable {
                    table: quoted_relation(db.message()),
                };
            }
            if let Some(table) = sqlite_missing_table(db.message()) {
                return StoreFailure::MissingTable { table: Some(table) };
            }
            match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => StoreFailure::Constraint {
                    constraint: db.constraint().map(str::to_string),
                },
                _ if is_sqlite_lock(code.as_deref()) => StoreFailure::Connection,
                _ => StoreFailure::Other { code },
            }
        }
        SqlxError::PoolTimedOut
        | SqlxError::PoolClosed
        | SqlxError::Io(_)
        | SqlxError::Tls(_)
        | SqlxError::Protocol(_)
        | SqlxError::WorkerCrashed
        | SqlxError::Configuration(_) => StoreFailure::Connection,
        _ => StoreFailure::Other { code: None },
    }
}

/// `no such table: main.hotel_bookings` -> `hotel_bookings`
fn sqlite_missing_table(message: &str) -> Option<String> {
    let name = message.strip_prefix("no such table:")?.trim();
    let name = name.rsplit('.').next().unwrap_or(name);
    (!name.is_empty()).then(|| name.to_string())
}

/// `relation "hotel_bookings" does not exist` -> `hotel_bookings`
fn quoted_relation(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let len = message[start..].find('"')?;
    let name = &message[start..start + len];
    let name = name.rsplit('.').next().unwrap_or(name);
    (!name.is_empty()).then(|| name.to_string())
}

/// The statement was cut short by `sqlite3_interrupt` or a progress handler.
pub fn is_interrupted(error: &SqlxError) -> bool {
    match error {
        SqlxError::Database(db) => db
            .code()
            .and_then(|c| c.parse::<i64>().ok())
            .map(|c| c & 0xff == SQLITE_INTERRUPT)
            .unwrap_or(false),
        _ => false,
    }
}

fn is_sqlite_lock(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i64>().ok())
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}
