//! Declarative schema reconciliation for SQLite.
//!
//! `schema-reconcile` takes a live database and a schema script (plain
//! `CREATE TABLE` / `CREATE INDEX` statements) and brings the database in
//! line with the script, keeping row data wherever a column survives.
//!
//! SQLite cannot alter columns in place, so a table whose column set
//! changed is rebuilt:
//! - the script's `CREATE TABLE` is replayed under a shadow name,
//! - the columns both versions share are copied over,
//! - the old table is dropped and the shadow renamed into place,
//! - the script's indices for the table are recreated,
//! - `PRAGMA foreign_key_check` must come back clean.
//!
//! # Architecture
//!
//! - **Introspect** - reads the catalog into a [`Schema`](schema::Schema)
//! - **Diff** - name-keyed add/remove sets and intersections
//! - **Reference** - runs the script on a private in-memory database
//! - **Plan** - tables to create/drop/rebuild and index drift
//! - **Executor** - applies all of it to the live connection
//!
//! # Example
//!
//! ```rust,no_run
//! use schema_reconcile::prelude::*;
//!
//! # async fn run() -> schema_reconcile::error::Result<()> {
//! let mut conn = schema_reconcile::connect("sqlite:quakes.sqlite3").await?;
//! let script = schema_reconcile::read_schema_file("schema.sql")?;
//!
//! let report = Migrator::new().run(&mut conn, &script).await?;
//! println!("rebuilt: {:?}", report.rebuilt_tables);
//! # Ok(())
//! # }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Bring the database in line with schema.sql
//! schema-reconcile --database sqlite:quakes.sqlite3 --schema schema.sql migrate
//!
//! # Show the statements a migration would run
//! schema-reconcile plan
//!
//! # Dump the live schema as JSON
//! schema-reconcile inspect
//! ```

use std::path::Path;
use std::str::FromStr;

use sqlx::ConnectOptions;
use sqlx::SqliteConnection;
use sqlx::sqlite::SqliteConnectOptions;

pub mod ddl;
pub mod diff;
pub mod error;
pub mod executor;
pub mod introspect;
pub mod plan;
pub mod reference;
pub mod schema;

use error::{ReconcileError, Result};
use executor::{MigrationReport, Migrator};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{RebuildStep, ReconcileError, Result};
    pub use crate::executor::{Atomicity, MigrateOptions, MigrationReport, Migrator};
    pub use crate::introspect::{read_columns, read_schema};
    pub use crate::plan::{AlteredTable, IndexChanges, MigrationPlan};
    pub use crate::reference::ReferenceSchema;
    pub use crate::schema::{
        ColumnEquivalence, Index, NameOnly, Schema, Strict, Table, TableColumn,
    };
}

/// Opens the live database at `url`, creating the file if it does not
/// exist.
pub async fn connect(url: &str) -> Result<SqliteConnection> {
    let conn = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .connect()
        .await?;
    Ok(conn)
}

/// Opens the live database at `url` only if it already exists.
///
/// Read-only entry points use this so a mistyped path fails instead of
/// leaving an empty database file behind.
pub async fn connect_existing(url: &str) -> Result<SqliteConnection> {
    let conn = SqliteConnectOptions::from_str(url)?
        .create_if_missing(false)
        .connect()
        .await?;
    Ok(conn)
}

/// Reads a schema script from disk.
pub fn read_schema_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| ReconcileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Migrates `conn` to `script` with default options.
pub async fn migrate(conn: &mut SqliteConnection, script: &str) -> Result<MigrationReport> {
    Migrator::new().run(conn, script).await
}
