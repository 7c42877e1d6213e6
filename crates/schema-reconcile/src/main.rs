//! schema-reconcile CLI
//!
//! Brings a SQLite database in line with a schema script.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use schema_reconcile::introspect::read_schema_with_columns;
use schema_reconcile::prelude::*;

/// Declarative schema reconciliation for SQLite.
#[derive(Parser)]
#[command(name = "schema-reconcile")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:quakes.sqlite3")]
    database: String,

    /// Schema script describing the desired tables and indices.
    #[arg(short, long, env = "SCHEMA_PATH", default_value = "./schema.sql")]
    schema: PathBuf,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate the database to the schema script.
    Migrate {
        /// Roll back every table rebuild if any of them fails.
        #[arg(long)]
        atomic: bool,

        /// Also rebuild tables whose columns changed type, nullability,
        /// default or primary key.
        #[arg(long)]
        strict_columns: bool,
    },

    /// Show the statements a migration would run, without running them.
    Plan {
        /// Also detect type, nullability, default and primary key drift.
        #[arg(long)]
        strict_columns: bool,
    },

    /// Print the live schema as JSON.
    Inspect,
}

fn options(atomic: bool, strict_columns: bool) -> MigrateOptions {
    let mut options = MigrateOptions::default();
    if atomic {
        options.atomicity = Atomicity::AllTables;
    }
    if strict_columns {
        options.column_equivalence = Arc::new(Strict);
    }
    options
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Migrate {
            atomic,
            strict_columns,
        } => {
            let script = schema_reconcile::read_schema_file(&cli.schema)?;
            let mut conn = schema_reconcile::connect(&cli.database).await?;

            let report = Migrator::with_options(options(atomic, strict_columns))
                .run(&mut conn, &script)
                .await?;

            for table in &report.rebuilt_tables {
                info!(table = %table, "Rebuilt");
            }
        }

        Commands::Plan { strict_columns } => {
            let script = schema_reconcile::read_schema_file(&cli.schema)?;
            let mut conn = schema_reconcile::connect_existing(&cli.database).await?;
            let plan = Migrator::with_options(options(false, strict_columns))
                .plan(&mut conn, &script)
                .await?;

            if plan.is_empty() {
                info!("Schema is up to date, nothing to do.");
            } else {
                for table in &plan.altered_tables {
                    if !table.removed_columns.is_empty() {
                        info!(
                            table = %table.name,
                            columns = ?table.removed_columns,
                            "Data in removed columns will be lost"
                        );
                    }
                }
                for sql in plan.statements()? {
                    println!("{sql};");
                }
            }
        }

        Commands::Inspect => {
            let mut conn = schema_reconcile::connect_existing(&cli.database).await?;
            let schema = read_schema_with_columns(&mut conn).await?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(())
}
