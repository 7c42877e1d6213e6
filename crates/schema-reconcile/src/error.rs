//! Error types for the reconciliation engine.

use std::fmt;
use std::path::PathBuf;

/// A step of the per-table rebuild protocol.
///
/// Carried by [`ReconcileError::Rebuild`] so a failure names the exact
/// point the table's transaction was abandoned at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildStep {
    /// Opening the table's transaction (or savepoint).
    Begin,
    /// Creating the `<table>_new` shadow table.
    CreateShadow,
    /// Copying the shared columns into the shadow table.
    CopyData,
    /// Dropping the original table.
    DropOriginal,
    /// Renaming the shadow table to the original name.
    RenameShadow,
    /// Recreating the reference indices on the rebuilt table.
    RestoreIndices,
    /// Running `PRAGMA foreign_key_check`.
    CheckForeignKeys,
    /// Committing the table's transaction.
    Commit,
}

impl fmt::Display for RebuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Self::Begin => "begin transaction",
            Self::CreateShadow => "create shadow table",
            Self::CopyData => "copy data",
            Self::DropOriginal => "drop original table",
            Self::RenameShadow => "rename shadow table",
            Self::RestoreIndices => "restore indices",
            Self::CheckForeignKeys => "foreign key check",
            Self::Commit => "commit",
        };
        f.write_str(step)
    }
}

/// One row reported by `PRAGMA foreign_key_check`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ForeignKeyViolation {
    /// Table holding the offending row.
    pub table: String,
    /// Rowid of the offending row (`None` for WITHOUT ROWID tables).
    pub rowid: Option<i64>,
    /// Table the foreign key points at.
    pub parent: String,
    /// Index of the foreign key constraint within `table`.
    pub fkid: i64,
}

impl fmt::Display for ForeignKeyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rowid {
            Some(rowid) => write!(
                f,
                "{} rowid {} -> {} (fk {})",
                self.table, rowid, self.parent, self.fkid
            ),
            None => write!(f, "{} -> {} (fk {})", self.table, self.parent, self.fkid),
        }
    }
}

/// Errors that can occur while reconciling a database against a schema.
///
/// Every variant is terminal for the migration run.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Connection or catalog query failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The desired-schema script failed on the reference database.
    #[error("Schema script is invalid: {0}")]
    ReferenceBuild(#[source] sqlx::Error),

    /// A DDL statement failed against the live database.
    #[error("Statement failed: {source}\n  {sql}")]
    Statement {
        /// The statement that failed, verbatim.
        sql: String,
        /// The driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A step of the rebuild protocol failed for one table.
    #[error("Rebuilding table '{table}' failed at step '{step}': {source}")]
    Rebuild {
        /// The table being rebuilt.
        table: String,
        /// The protocol step that failed.
        step: RebuildStep,
        /// The underlying failure.
        #[source]
        source: Box<ReconcileError>,
    },

    /// The post-rebuild foreign key check reported violations.
    #[error("Foreign key check failed:\n{}", .0.iter().map(|v| format!("  - {v}")).collect::<Vec<_>>().join("\n"))]
    ForeignKeyViolations(Vec<ForeignKeyViolation>),

    /// The reference create-statement does not name its own table.
    #[error("Cannot derive shadow statement for table '{table}' from: {sql}")]
    ShadowStatement {
        /// The table being rebuilt.
        table: String,
        /// The reference create-statement.
        sql: String,
    },

    /// The shadow table name of a rebuild is already taken.
    #[error("Cannot rebuild table '{table}': shadow table '{shadow}' already exists")]
    ShadowCollision {
        /// The table being rebuilt.
        table: String,
        /// The live or desired table occupying the shadow name.
        shadow: String,
    },

    /// IO error reading the schema file.
    #[error("Cannot read schema file '{path}': {source}")]
    Io {
        /// Path of the schema file.
        path: PathBuf,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ReconcileError {
    /// Wraps `self` as a failure of `step` while rebuilding `table`.
    #[must_use]
    pub fn during(self, table: &str, step: RebuildStep) -> Self {
        Self::Rebuild {
            table: table.to_string(),
            step,
            source: Box::new(self),
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
