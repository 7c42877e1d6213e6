//! The reference (desired) schema.
//!
//! Rather than parsing DDL, the desired schema is discovered by running the
//! schema script against a private in-memory database and reading its
//! catalog back with the same introspection used for the live database.

use std::collections::BTreeMap;

use sqlx::{Connection, SqliteConnection};
use tracing::{debug, warn};

use crate::error::{ReconcileError, Result};
use crate::introspect::{read_columns, read_schema};
use crate::schema::{Schema, TableColumn};

const MEMORY_URL: &str = "sqlite::memory:";

/// A materialized desired schema backed by a throwaway in-memory database.
///
/// The database is private to this value and never touches disk.
pub struct ReferenceSchema {
    conn: SqliteConnection,
    schema: Schema,
}

impl ReferenceSchema {
    /// Runs `script` against a fresh in-memory database and snapshots it.
    ///
    /// Any failure while executing the script is reported as
    /// [`ReconcileError::ReferenceBuild`]; the live database is never
    /// involved.
    pub async fn build(script: &str) -> Result<Self> {
        let mut conn = SqliteConnection::connect(MEMORY_URL).await?;

        if !script.trim().is_empty() {
            sqlx::raw_sql(script)
                .execute(&mut conn)
                .await
                .map_err(ReconcileError::ReferenceBuild)?;
        }

        let schema = read_schema(&mut conn).await?;
        debug!(
            tables = schema.tables.len(),
            indices = schema.indices.len(),
            "Built reference schema"
        );
        Ok(Self { conn, schema })
    }

    /// The reference catalog snapshot.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Reads the declared columns of a reference table.
    pub async fn columns(&mut self, table: &str) -> Result<BTreeMap<String, TableColumn>> {
        read_columns(&mut self.conn, table).await
    }

    /// Closes the in-memory database.
    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            warn!(error = %e, "Failed to close reference database");
        }
    }
}

impl std::fmt::Debug for ReferenceSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceSchema")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
