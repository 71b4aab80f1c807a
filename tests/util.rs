#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub const OPTION_DETAIL_TABLES: &[&str] = &[
    "rotation_plan_details",
    "cost_analysis_details",
    "timeline_details",
    "resource_details",
    "technical_specifications",
];

pub const DISRUPTION_CHILD_TABLES: &[&str] = &[
    "recovery_steps_detailed",
    "recovery_options_detailed",
    "recovery_options",
    "recovery_steps",
    "crew_disruption_mapping",
    "hotel_bookings",
    "pending_recovery_solutions",
];

pub async fn temp_pool() -> SqlitePool {
    memory_pool(true).await
}

pub async fn memory_pool(foreign_keys: bool) -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::from_str("sqlite::memory:")
                .expect("memory url")
                .foreign_keys(foreign_keys),
        )
        .await
        .expect("connect sqlite::memory:")
}

pub async fn file_pool(path: &Path) -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
        .expect("open sqlite file")
}

/// Create the disruption schema, leaving out any table named in `omit`.
pub async fn create_schema(pool: &SqlitePool, omit: &[&str]) {
    sqlx::query(
        "CREATE TABLE flight_disruptions (
            id INTEGER PRIMARY KEY,
            flight_number TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .unwrap();

    for table in DISRUPTION_CHILD_TABLES {
        if omit.contains(table) {
            continue;
        }
        let sql = format!(
            "CREATE TABLE {table} (
                id INTEGER PRIMARY KEY,
                disruption_id INTEGER NOT NULL REFERENCES flight_disruptions(id),
                payload TEXT
            )"
        );
        sqlx::query(&sql).execute(pool).await.unwrap();
    }

    for table in OPTION_DETAIL_TABLES {
        if omit.contains(table) {
            continue;
        }
        let sql = format!(
            "CREATE TABLE {table} (
                id INTEGER PRIMARY KEY,
                recovery_option_id INTEGER NOT NULL REFERENCES recovery_options(id),
                payload TEXT
            )"
        );
        sqlx::query(&sql).execute(pool).await.unwrap();
    }
}

pub async fn insert_disruption(
    pool: &SqlitePool,
    id: i64,
    flight_number: &str,
    status: &str,
    age_days: i64,
) {
    sqlx::query(
        "INSERT INTO flight_disruptions (id, flight_number, status, created_at)
         VALUES (?1, ?2, ?3, datetime('now', '-' || ?4 || ' days'))",
    )
    .bind(id)
    .bind(flight_number)
    .bind(status)
    .bind(age_days)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_child(pool: &SqlitePool, table: &str, disruption_id: i64) {
    let sql = format!("INSERT INTO {table} (disruption_id, payload) VALUES (?1, 'x')");
    sqlx::query(&sql)
        .bind(disruption_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_option(pool: &SqlitePool, option_id: i64, disruption_id: i64) {
    sqlx::query("INSERT INTO recovery_options (id, disruption_id, payload) VALUES (?1, ?2, 'opt')")
        .bind(option_id)
        .bind(disruption_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_detail(pool: &SqlitePool, table: &str, option_id: i64) {
    let sql = format!("INSERT INTO {table} (recovery_option_id, payload) VALUES (?1, 'd')");
    sqlx::query(&sql).bind(option_id).execute(pool).await.unwrap();
}

/// Option ids owned by a fully seeded disruption.
pub fn option_ids(disruption_id: i64) -> [i64; 2] {
    [disruption_id * 100 + 1, disruption_id * 100 + 2]
}

/// Seed a disruption with two recovery options (one row per detail table
/// each), three recovery steps and one row in every other child table.
/// Tables missing from the schema are passed in `omit`.
pub async fn seed_full(
    pool: &SqlitePool,
    id: i64,
    flight_number: &str,
    status: &str,
    age_days: i64,
    omit: &[&str],
) {
    insert_disruption(pool, id, flight_number, status, age_days).await;
    for option_id in option_ids(id) {
        insert_option(pool, option_id, id).await;
        for table in OPTION_DETAIL_TABLES {
            if !omit.contains(table) {
                insert_detail(pool, table, option_id).await;
            }
        }
    }
    for _ in 0..3 {
        insert_child(pool, "recovery_steps", id).await;
    }
    for table in [
        "recovery_steps_detailed",
        "recovery_options_detailed",
        "crew_disruption_mapping",
        "hotel_bookings",
        "pending_recovery_solutions",
    ] {
        if !omit.contains(&table) {
            insert_child(pool, table, id).await;
        }
    }
}

/// Row counts per table for rows tied to a fully seeded disruption.
pub async fn rows_for(pool: &SqlitePool, id: i64, omit: &[&str]) -> BTreeMap<String, i64> {
    let mut counts = BTreeMap::new();
    let [a, b] = option_ids(id);
    for table in OPTION_DETAIL_TABLES {
        if omit.contains(table) {
            continue;
        }
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE recovery_option_id IN (?1, ?2)");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(a)
            .bind(b)
            .fetch_one(pool)
            .await
            .unwrap();
        counts.insert(table.to_string(), count);
    }
    for table in DISRUPTION_CHILD_TABLES {
        if omit.contains(table) {
            continue;
        }
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE disruption_id = ?1");
        let count: i64 = sqlx::query_scalar(&sql).bind(id).fetch_one(pool).await.unwrap();
        counts.insert(table.to_string(), count);
    }
    let root: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flight_disruptions WHERE id = ?1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap();
    counts.insert("flight_disruptions".to_string(), root);
    counts
}

/// Total row count of every user table, for before/after comparisons.
pub async fn snapshot(pool: &SqlitePool) -> BTreeMap<String, i64> {
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .unwrap();
    let mut counts = BTreeMap::new();
    for table in tables {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap();
        counts.insert(table, count);
    }
    counts
}

pub async fn root_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM flight_disruptions")
        .fetch_one(pool)
        .await
        .unwrap()
}
