//! Ordered description of every table that hangs off a flight disruption.
//!
//! The plan is the single source of truth for traversal order: tables keyed
//! through a recovery option come first, then tables keyed directly by the
//! disruption id, and the `flight_disruptions` root is always deleted last.

use serde::Serialize;

use crate::error::{CascadeError, CascadeResult};

pub const ROOT_TABLE: &str = "flight_disruptions";
pub const RECOVERY_OPTIONS_TABLE: &str = "recovery_options";
pub const DISRUPTION_KEY: &str = "disruption_id";
pub const RECOVERY_OPTION_KEY: &str = "recovery_option_id";

const OPTION_DETAIL_TABLES: &[&str] = &[
    "rotation_plan_details",
    "cost_analysis_details",
    "timeline_details",
    "resource_details",
    "technical_specifications",
];

// (table, optional)
const DISRUPTION_CHILD_TABLES: &[(&str, bool)] = &[
    ("recovery_steps_detailed", true),
    ("recovery_options_detailed", true),
    (RECOVERY_OPTIONS_TABLE, false),
    ("recovery_steps", false),
    ("crew_disruption_mapping", false),
    ("hotel_bookings", false),
    ("pending_recovery_solutions", true),
];

/// How rows of a child table are tied to a set of root ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyPath {
    /// `column` holds the root id.
    Direct { column: String },
    /// `column` holds the id of a row in `parent_table`, whose
    /// `parent_key_column` holds the root id.
    Via {
        column: String,
        parent_table: String,
        parent_id_column: String,
        parent_key_column: String,
    },
}

impl KeyPath {
    pub fn direct(column: &str) -> Self {
        KeyPath::Direct {
            column: column.to_string(),
        }
    }

    pub fn via_recovery_option() -> Self {
        KeyPath::Via {
            column: RECOVERY_OPTION_KEY.to_string(),
            parent_table: RECOVERY_OPTIONS_TABLE.to_string(),
            parent_id_column: "id".to_string(),
            parent_key_column: DISRUPTION_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStep {
    pub table: String,
    pub key: KeyPath,
    /// Absence of the table is tolerated and reported as zero rows.
    pub optional: bool,
}

impl TableStep {
    pub fn new(table: &str, key: KeyPath, optional: bool) -> Self {
        TableStep {
            table: table.to_string(),
            key,
            optional,
        }
    }

    /// `DELETE` statement for a batch of `id_count` root ids, bound as `?`.
    pub fn delete_sql(&self, id_count: usize) -> String {
        let ids = placeholders(id_count);
        match &self.key {
            KeyPath::Direct { column } => {
                format!("DELETE FROM {} WHERE {column} IN ({ids})", self.table)
            }
            KeyPath::Via {
                column,
                parent_table,
                parent_id_column,
                parent_key_column,
            } => format!(
                "DELETE FROM {} WHERE {column} IN (SELECT p.{parent_id_column} FROM {parent_table} p WHERE p.{parent_key_column} IN ({ids}))",
                self.table
            ),
        }
    }

    fn identifiers(&self) -> Vec<&str> {
        let mut names = vec![self.table.as_str()];
        match &self.key {
            KeyPath::Direct { column } => names.push(column),
            KeyPath::Via {
                column,
                parent_table,
                parent_id_column,
                parent_key_column,
            } => names.extend([
                column.as_str(),
                parent_table.as_str(),
                parent_id_column.as_str(),
                parent_key_column.as_str(),
            ]),
        }
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootTable {
    pub table: String,
    pub id_column: String,
}

impl RootTable {
    pub fn delete_sql(&self, id_count: usize) -> String {
        format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.table,
            self.id_column,
            placeholders(id_count)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionPlan {
    steps: Vec<TableStep>,
    root: RootTable,
}

impl DeletionPlan {
    /// Build a plan, checking identifiers and traversal order.
    pub fn new(steps: Vec<TableStep>, root: RootTable) -> CascadeResult<Self> {
        for name in steps
            .iter()
            .flat_map(TableStep::identifiers)
            .chain([root.table.as_str(), root.id_column.as_str()])
        {
            if !is_identifier(name) {
                return Err(CascadeError::invalid_plan(format!(
                    "`{name}` is not a plain SQL identifier"
                )));
            }
        }

        let mut seen_direct = false;
        for (idx, step) in steps.iter().enumerate() {
            if step.table == root.table {
                return Err(CascadeError::invalid_plan(format!(
                    "root table {} must only appear as the final step",
                    root.table
                )));
            }
            if steps[..idx].iter().any(|s| s.table == step.table) {
                return Err(CascadeError::invalid_plan(format!(
                    "table {} appears twice",
                    step.table
                )));
            }
            match &step.key {
                KeyPath::Direct { .. } => seen_direct = true,
                KeyPath::Via { parent_table, .. } => {
                    if seen_direct {
                        return Err(CascadeError::invalid_plan(format!(
                            "indirect table {} follows a direct table",
                            step.table
                        )));
                    }
                    let parent_later = steps[idx + 1..].iter().any(|s| {
                        &s.table == parent_table && matches!(s.key, KeyPath::Direct { .. })
                    });
                    if !parent_later {
                        return Err(CascadeError::invalid_plan(format!(
                            "parent {parent_table} of {} is not deleted after it",
                            step.table
                        )));
                    }
                }
            }
        }

        Ok(DeletionPlan { steps, root })
    }

    /// The flight disruption aggregate: recovery option details, then the
    /// disruption's direct children, then the disruption itself.
    pub fn flight_disruptions() -> Self {
        let indirect = OPTION_DETAIL_TABLES
            .iter()
            .map(|table| TableStep::new(table, KeyPath::via_recovery_option(), true));
        let direct = DISRUPTION_CHILD_TABLES
            .iter()
            .map(|(table, optional)| TableStep::new(table, KeyPath::direct(DISRUPTION_KEY), *optional));
        DeletionPlan {
            steps: indirect.chain(direct).collect(),
            root: RootTable {
                table: ROOT_TABLE.to_string(),
                id_column: "id".to_string(),
            },
        }
    }

    pub fn steps(&self) -> &[TableStep] {
        &self.steps
    }

    pub fn root(&self) -> &RootTable {
        &self.root
    }

    /// Every table in traversal order, root last.
    pub fn tables(&self) -> Vec<&str> {
        self.steps
            .iter()
            .map(|s| s.table.as_str())
            .chain(std::iter::once(self.root.table.as_str()))
            .collect()
    }
}

impl Default for DeletionPlan {
    fn default() -> Self {
        DeletionPlan::flight_disruptions()
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
