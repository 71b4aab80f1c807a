use std::num::NonZeroUsize;

use anyhow::Result;
use cascade_delete::{
    CascadeDeleteEngine, CascadeError, DeletionCriteria, DeletionPlan, DeletionReport,
    EngineOptions,
};
use sqlx::SqlitePool;

#[path = "util.rs"]
mod util;

fn engine(pool: &SqlitePool) -> CascadeDeleteEngine {
    CascadeDeleteEngine::new(pool.clone(), DeletionPlan::flight_disruptions())
}

async fn seeded_pool() -> SqlitePool {
    let pool = util::temp_pool().await;
    util::create_schema(&pool, &[]).await;
    util::seed_full(&pool, 1, "BA117", "Resolved", 45, &[]).await;
    util::seed_full(&pool, 2, "BA117", "Active", 2, &[]).await;
    util::seed_full(&pool, 3, "QR1", "Resolved", 5, &[]).await;
    util::seed_full(&pool, 4, "QR1", "Cancelled", 60, &[]).await;
    pool
}

#[tokio::test]
async fn deletes_only_matching_disruptions() -> Result<()> {
    let pool = seeded_pool().await;
    let untouched = util::rows_for(&pool, 2, &[]).await;

    let result = engine(&pool)
        .delete_by_criteria(&DeletionCriteria::default().with_status("Resolved"))
        .await?;

    assert_eq!(result.deleted_root_count, 2);
    let matched: Vec<i64> = result.matched.iter().map(|d| d.id).collect();
    assert_eq!(matched, vec![1, 3]);
    assert_eq!(result.deleted_from("recovery_steps"), Some(6));
    assert_eq!(result.deleted_from("technical_specifications"), Some(4));
    for id in [1, 3] {
        for (table, count) in util::rows_for(&pool, id, &[]).await {
            assert_eq!(count, 0, "{table} still references {id}");
        }
    }
    assert_eq!(util::rows_for(&pool, 2, &[]).await, untouched);
    assert_eq!(util::root_count(&pool).await, 2);
    Ok(())
}

#[tokio::test]
async fn criteria_fields_combine_conjunctively() -> Result<()> {
    let pool = seeded_pool().await;

    let criteria = DeletionCriteria::default()
        .with_flight_number("BA117")
        .with_status("Resolved");
    let result = engine(&pool).delete_by_criteria(&criteria).await?;

    assert_eq!(result.deleted_root_count, 1);
    assert_eq!(result.matched[0].id, 1);
    assert_eq!(result.matched[0].flight_number.as_deref(), Some("BA117"));
    assert_eq!(util::root_count(&pool).await, 3);
    Ok(())
}

#[tokio::test]
async fn age_threshold_selects_only_older_rows() -> Result<()> {
    let pool = seeded_pool().await;

    let result = engine(&pool)
        .delete_by_criteria(&DeletionCriteria::default().older_than(30))
        .await?;

    let matched: Vec<i64> = result.matched.iter().map(|d| d.id).collect();
    assert_eq!(matched, vec![1, 4]);
    assert_eq!(result.deleted_root_count, 2);
    Ok(())
}

#[tokio::test]
async fn resolved_preset_keeps_recent_resolutions() -> Result<()> {
    let pool = seeded_pool().await;

    let result = engine(&pool)
        .delete_by_criteria(&DeletionCriteria::resolved())
        .await?;

    assert_eq!(result.deleted_root_count, 1);
    assert_eq!(result.matched[0].id, 1);
    assert_eq!(util::rows_for(&pool, 3, &[]).await["flight_disruptions"], 1);
    Ok(())
}

#[tokio::test]
async fn no_match_is_success_and_mutates_nothing() -> Result<()> {
    let pool = seeded_pool().await;
    let before = util::snapshot(&pool).await;

    let result = engine(&pool)
        .delete_by_criteria(&DeletionCriteria::default().with_status("NoSuchStatus"))
        .await?;

    assert_eq!(result.deleted_root_count, 0);
    assert!(result.matched.is_empty());
    assert_eq!(result.total_deleted(), 0);
    assert_eq!(
        result.deleted_per_table.len(),
        DeletionPlan::flight_disruptions().tables().len()
    );
    assert_eq!(util::snapshot(&pool).await, before);
    Ok(())
}

#[tokio::test]
async fn empty_criteria_never_deletes_everything() -> Result<()> {
    let pool = seeded_pool().await;
    let before = util::snapshot(&pool).await;

    let result = engine(&pool)
        .delete_by_criteria(&DeletionCriteria::default())
        .await?;

    assert_eq!(result.deleted_root_count, 0);
    assert_eq!(util::snapshot(&pool).await, before);
    Ok(())
}

#[tokio::test]
async fn repeating_a_bulk_delete_is_a_noop() -> Result<()> {
    let pool = seeded_pool().await;
    let criteria = DeletionCriteria::default().with_flight_number("QR1");
    let engine = engine(&pool);

    let first = engine.delete_by_criteria(&criteria).await?;
    assert_eq!(first.deleted_root_count, 2);

    let second = engine.delete_by_criteria(&criteria).await?;
    assert_eq!(second.deleted_root_count, 0);
    assert_eq!(second.total_deleted(), 0);
    Ok(())
}

#[tokio::test]
async fn invalid_criteria_fail_before_any_mutation() -> Result<()> {
    let pool = seeded_pool().await;
    let before = util::snapshot(&pool).await;

    let err = engine(&pool)
        .delete_by_criteria(&DeletionCriteria::default().with_status("Resolved").older_than(-1))
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::Validation { ref field, .. } if field == "olderThanDays"));
    assert_eq!(util::snapshot(&pool).await, before);
    Ok(())
}

#[tokio::test]
async fn large_sets_are_split_into_batches_within_one_transaction() -> Result<()> {
    let pool = util::temp_pool().await;
    util::create_schema(&pool, &[]).await;
    for id in 1..=5 {
        util::seed_full(&pool, id, "EK1", "Cancelled", 1, &[]).await;
    }
    let options = EngineOptions {
        batch_size: NonZeroUsize::new(2).unwrap(),
        ..EngineOptions::default()
    };

    let result = engine(&pool)
        .with_options(options)
        .delete_by_criteria(&DeletionCriteria::cancelled())
        .await?;

    assert_eq!(result.deleted_root_count, 5);
    assert_eq!(result.deleted_from("recovery_options"), Some(10));
    assert_eq!(result.deleted_from("rotation_plan_details"), Some(10));
    assert_eq!(util::root_count(&pool).await, 0);
    Ok(())
}

#[tokio::test]
async fn bulk_failure_rolls_back_the_whole_set() -> Result<()> {
    let pool = seeded_pool().await;
    sqlx::query(
        "CREATE TRIGGER crew_fault BEFORE DELETE ON crew_disruption_mapping
         WHEN OLD.disruption_id = 3
         BEGIN SELECT RAISE(ABORT, 'crew locked'); END;",
    )
    .execute(&pool)
    .await?;
    let before = util::snapshot(&pool).await;

    let err = engine(&pool)
        .delete_by_criteria(&DeletionCriteria::default().with_status("Resolved"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("crew locked"));
    assert_eq!(util::snapshot(&pool).await, before);
    Ok(())
}

#[tokio::test]
async fn preview_lists_candidates_without_deleting() -> Result<()> {
    let pool = seeded_pool().await;
    let before = util::snapshot(&pool).await;

    let matched = engine(&pool)
        .preview(&DeletionCriteria::default().with_flight_number("BA117"))
        .await?;

    let ids: Vec<i64> = matched.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(matched[1].status.as_deref(), Some("Active"));
    assert_eq!(util::snapshot(&pool).await, before);
    Ok(())
}

#[tokio::test]
async fn preview_keeps_null_columns_distinct_from_empty() -> Result<()> {
    let pool = util::temp_pool().await;
    sqlx::query(
        "CREATE TABLE flight_disruptions (
            id INTEGER PRIMARY KEY,
            flight_number TEXT,
            status TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "INSERT INTO flight_disruptions (id, flight_number, status)
         VALUES (1, NULL, 'Cancelled'), (2, '', 'Cancelled')",
    )
    .execute(&pool)
    .await?;

    let matched = engine(&pool)
        .preview(&DeletionCriteria::cancelled())
        .await?;

    assert_eq!(matched.len(), 2);
    assert_eq!(matched[0].flight_number, None);
    assert_eq!(matched[1].flight_number.as_deref(), Some(""));
    assert_eq!(matched[0].status.as_deref(), Some("Cancelled"));
    Ok(())
}
