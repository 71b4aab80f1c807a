use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::BindValue;
use crate::error::{CascadeError, CascadeResult};

pub const RESOLVED_RETENTION_DAYS: i64 = 30;

const CUTOFF_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Conjunctive filter selecting flight disruptions for bulk deletion.
///
/// A criteria value with no field set selects nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub older_than_days: Option<i64>,
}

/// Parameterized `WHERE` body over the root table.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    MatchNothing,
    Where {
        clause: String,
        params: Vec<BindValue>,
    },
}

impl DeletionCriteria {
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_flight_number(mut self, flight_number: impl Into<String>) -> Self {
        self.flight_number = Some(flight_number.into());
        self
    }

    pub fn older_than(mut self, days: i64) -> Self {
        self.older_than_days = Some(days);
        self
    }

    /// Resolved disruptions past the retention window.
    pub fn resolved() -> Self {
        DeletionCriteria::default()
            .with_status("Resolved")
            .older_than(RESOLVED_RETENTION_DAYS)
    }

    pub fn cancelled() -> Self {
        DeletionCriteria::default().with_status("Cancelled")
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.flight_number.is_none() && self.older_than_days.is_none()
    }

    pub fn validate(&self) -> CascadeResult<()> {
        if let Some(status) = &self.status {
            require_text("status", status)?;
        }
        if let Some(flight_number) = &self.flight_number {
            require_text("flightNumber", flight_number)?;
        }
        if let Some(days) = self.older_than_days {
            age_window(days)?;
        }
        Ok(())
    }

    /// Build the predicate, resolving the age threshold against `now`.
    pub fn build(&self, now: DateTime<Utc>) -> CascadeResult<Predicate> {
        self.validate()?;
        if self.is_empty() {
            return Ok(Predicate::MatchNothing);
        }

        let mut terms = Vec::new();
        let mut params = Vec::new();
        if let Some(status) = &self.status {
            terms.push("status = ?");
            params.push(BindValue::Text(status.clone()));
        }
        if let Some(flight_number) = &self.flight_number {
            terms.push("flight_number = ?");
            params.push(BindValue::Text(flight_number.clone()));
        }
        if let Some(days) = self.older_than_days {
            let cutoff = now
                .checked_sub_signed(age_window(days)?)
                .ok_or_else(|| CascadeError::validation("olderThanDays", "is out of range"))?;
            terms.push("julianday(created_at) < julianday(?)");
            params.push(BindValue::Text(cutoff.format(CUTOFF_FORMAT).to_string()));
        }

        Ok(Predicate::Where {
            clause: terms.join(" AND "),
            params,
        })
    }

    /// Parse command line filters: `key=value` pairs or a named preset.
    pub fn parse_filters<S: AsRef<str>>(args: &[S]) -> CascadeResult<Self> {
        let mut criteria = DeletionCriteria::default();
        for arg in args {
            let arg = arg.as_ref().trim();
            let Some((key, value)) = arg.split_once('=') else {
                let preset = match arg.to_ascii_lowercase().as_str() {
                    "resolved" => DeletionCriteria::resolved(),
                    "cancelled" => DeletionCriteria::cancelled(),
                    _ => {
                        return Err(CascadeError::validation(
                            "filter",
                            format!("expected key=value or a preset, got `{arg}`"),
                        ))
                    }
                };
                criteria = criteria.merge(preset)?;
                continue;
            };
            let value = value.trim();
            let field = match key.trim() {
                "status" => DeletionCriteria::default().with_status(require_text("status", value)?),
                "flightNumber" | "flight_number" => DeletionCriteria::default()
                    .with_flight_number(require_text("flightNumber", value)?),
                "olderThanDays" | "older_than_days" => {
                    let days = value.parse::<i64>().map_err(|_| {
                        CascadeError::validation(
                            "olderThanDays",
                            format!("`{value}` is not an integer"),
                        )
                    })?;
                    age_window(days)?;
                    DeletionCriteria::default().older_than(days)
                }
                other => {
                    return Err(CascadeError::validation(
                        "filter",
                        format!("unknown filter `{other}`"),
                    ))
                }
            };
            criteria = criteria.merge(field)?;
        }
        Ok(criteria)
    }

    fn merge(self, other: DeletionCriteria) -> CascadeResult<Self> {
        fn pick<T>(field: &str, a: Option<T>, b: Option<T>) -> CascadeResult<Option<T>> {
            match (a, b) {
                (Some(_), Some(_)) => Err(CascadeError::validation(
                    field,
                    "given more than once",
                )),
                (a, b) => Ok(a.or(b)),
            }
        }
        Ok(DeletionCriteria {
            status: pick("status", self.status, other.status)?,
            flight_number: pick("flightNumber", self.flight_number, other.flight_number)?,
            older_than_days: pick("olderThanDays", self.older_than_days, other.older_than_days)?,
        })
    }
}

fn require_text<'a>(field: &str, value: &'a str) -> CascadeResult<&'a str> {
    if value.trim().is_empty() {
        Err(CascadeError::validation(field, "must not be empty"))
    } else {
        Ok(value)
    }
}

fn age_window(days: i64) -> CascadeResult<Duration> {
    if days < 0 {
        return Err(CascadeError::validation(
            "olderThanDays",
            "must be a non-negative integer",
        ));
    }
    Duration::try_days(days)
        .ok_or_else(|| CascadeError::validation("olderThanDays", "is out of range"))
}
