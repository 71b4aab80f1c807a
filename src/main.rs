use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cascade_delete::{
    open_pool, BulkDeletion, CascadeConfig, CascadeDeleteEngine, CascadeError, DeletionCriteria,
    DeletionPlan, DeletionReport, DisruptionSummary, EngineOptions, ErrorPayload, SingleDeletion,
    TableDeletion,
};

const EXIT_FAILURE: i32 = 1;
const EXIT_VALIDATION: i32 = 2;
const EXIT_NOT_FOUND: i32 = 3;

#[derive(Debug, Parser)]
#[command(
    name = "cascade-delete",
    about = "Delete flight disruptions together with all of their recovery data",
    version
)]
struct Cli {
    /// SQLite database to operate on (overrides CASCADE_DELETE_DB).
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Emit machine-readable JSON instead of the table view.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Delete a single disruption by id.
    Single {
        /// Disruption id.
        id: i64,
    },
    /// Delete every disruption matching all given filters.
    Bulk {
        /// List the matching disruptions without deleting anything.
        #[arg(long)]
        dry_run: bool,

        /// status=<S>, flightNumber=<F>, olderThanDays=<N>, or a preset
        /// (`resolved`, `cancelled`).
        #[arg(value_name = "FILTER")]
        filters: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    cascade_delete::logging::init();

    let cli = Cli::parse();
    let json = cli.json;
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            let cascade = err.downcast_ref::<CascadeError>();
            match (cascade, json) {
                (Some(cascade), true) => match serde_json::to_string(&ErrorPayload::from(cascade)) {
                    Ok(payload) => eprintln!("{payload}"),
                    Err(_) => eprintln!("Error: {err:#}"),
                },
                _ => eprintln!("Error: {err:#}"),
            }
            exit_code(cascade)
        }
    };
    process::exit(code);
}

fn exit_code(error: Option<&CascadeError>) -> i32 {
    match error {
        Some(CascadeError::Validation { .. }) => EXIT_VALIDATION,
        Some(CascadeError::NotFound { .. }) => EXIT_NOT_FOUND,
        _ => EXIT_FAILURE,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = CascadeConfig::from_env()?;
    if let Some(db) = cli.db {
        config = config.with_db_path(db);
    }

    // Reject bad filters before touching the database.
    let bulk_criteria = match &cli.command {
        Command::Bulk { filters, .. } => {
            let criteria = DeletionCriteria::parse_filters(filters)?;
            if criteria.is_empty() {
                return Err(CascadeError::validation(
                    "filter",
                    "bulk deletion needs at least one filter",
                )
                .into());
            }
            criteria.validate()?;
            Some(criteria)
        }
        Command::Single { .. } => None,
    };

    let pool = open_pool(&config).await?;
    let engine = CascadeDeleteEngine::new(pool.clone(), DeletionPlan::flight_disruptions())
        .with_options(EngineOptions::from(&config));

    let outcome = match (cli.command, bulk_criteria) {
        (Command::Single { id }, _) => engine
            .delete_one(id)
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| print_single(&result, cli.json)),
        (Command::Bulk { dry_run: true, .. }, Some(criteria)) => engine
            .preview(&criteria)
            .await
            .map_err(anyhow::Error::from)
            .and_then(|matched| print_preview(&matched, cli.json)),
        (Command::Bulk { .. }, Some(criteria)) => engine
            .delete_by_criteria(&criteria)
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| print_bulk(&result, cli.json)),
        (Command::Bulk { .. }, None) => Ok(()),
    };

    pool.close().await;
    outcome
}

fn print_single(result: &SingleDeletion, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }
    println!("Deleted flight disruption {}", result.disruption_id);
    print_table(result.per_table(), result.total_deleted());
    Ok(())
}

fn print_bulk(result: &BulkDeletion, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }
    if result.matched.is_empty() {
        println!("No flight disruptions matched; nothing deleted");
        return Ok(());
    }
    println!(
        "Deleted {} of {} matching flight disruptions",
        result.deleted_root_count,
        result.matched.len()
    );
    print_table(result.per_table(), result.total_deleted());
    Ok(())
}

fn print_preview(matched: &[DisruptionSummary], json: bool) -> Result<()> {
    if json {
        return print_json(&matched);
    }
    if matched.is_empty() {
        println!("No flight disruptions match");
        return Ok(());
    }
    println!("{:>8}  {:<12} STATUS", "ID", "FLIGHT");
    for disruption in matched {
        println!(
            "{:>8}  {:<12} {}",
            disruption.id,
            disruption.flight_number.as_deref().unwrap_or("-"),
            disruption.status.as_deref().unwrap_or("-")
        );
    }
    println!("{} disruption(s) would be deleted", matched.len());
    Ok(())
}

fn print_table(rows: &[TableDeletion], total: u64) {
    let width = rows.iter().map(|row| row.table.len()).max().unwrap_or(5);
    for row in rows {
        if row.skipped {
            println!("  {:<width$}  {:>6}  (table missing, skipped)", row.table, row.deleted);
        } else {
            println!("  {:<width$}  {:>6}", row.table, row.deleted);
        }
    }
    println!("  {:<width$}  {:>6}", "total", total);
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize result")?;
    println!("{out}");
    Ok(())
}
