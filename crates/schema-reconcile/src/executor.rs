//! Migration executor.
//!
//! Applies a desired schema to a live database in place:
//!
//! 1. build the reference schema from the script,
//! 2. switch foreign key enforcement off,
//! 3. drop tables the reference lacks, create tables the live database
//!    lacks (with their indices),
//! 4. rebuild every table whose column set drifted, one transaction per
//!    table,
//! 5. reconcile indices on the tables that survived untouched,
//! 6. restore foreign key enforcement.
//!
//! The run is not resumable. A failure aborts it; tables already rebuilt
//! stay rebuilt unless [`Atomicity::AllTables`] is selected.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};

use crate::ddl;
use crate::error::{ForeignKeyViolation, RebuildStep, ReconcileError, Result};
use crate::introspect::read_schema;
use crate::plan::{
    AlteredTable, MigrationPlan, TableChanges, find_altered_tables, find_index_changes,
};
use crate::reference::ReferenceSchema;
use crate::schema::{ColumnEquivalence, NameOnly, Schema};

/// How rebuilds of several tables relate to each other transactionally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Atomicity {
    /// Each table commits on its own. A failure leaves earlier tables
    /// rebuilt.
    #[default]
    PerTable,
    /// All rebuilds share one outer transaction, each table in its own
    /// savepoint. A failure rolls every rebuild back.
    AllTables,
}

/// Options for a migration run.
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Transaction scope of the rebuild phase.
    pub atomicity: Atomicity,
    /// Predicate deciding whether same-named columns match.
    pub column_equivalence: Arc<dyn ColumnEquivalence>,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            atomicity: Atomicity::PerTable,
            column_equivalence: Arc::new(NameOnly),
        }
    }
}

/// What a migration run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Tables created from the reference.
    pub created_tables: Vec<String>,
    /// Tables dropped because the reference lacks them.
    pub dropped_tables: Vec<String>,
    /// Tables rebuilt through a shadow table.
    pub rebuilt_tables: Vec<String>,
    /// Indices created outside of table creation and rebuilds.
    pub created_indices: Vec<String>,
    /// Indices dropped because the reference lacks them.
    pub dropped_indices: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl MigrationReport {
    /// Returns `true` if the run executed no DDL.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created_tables.is_empty()
            && self.dropped_tables.is_empty()
            && self.rebuilt_tables.is_empty()
            && self.created_indices.is_empty()
            && self.dropped_indices.is_empty()
    }
}

/// Reconciles live databases against a desired schema script.
///
/// Holds configuration only; no state survives between runs.
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    options: MigrateOptions,
}

impl Migrator {
    /// Creates a migrator with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a migrator with custom options.
    #[must_use]
    pub fn with_options(options: MigrateOptions) -> Self {
        Self { options }
    }

    /// Sets the transaction scope of the rebuild phase.
    #[must_use]
    pub fn atomicity(mut self, atomicity: Atomicity) -> Self {
        self.options.atomicity = atomicity;
        self
    }

    /// Sets the predicate used to compare same-named columns.
    #[must_use]
    pub fn column_equivalence(mut self, equivalence: impl ColumnEquivalence + 'static) -> Self {
        self.options.column_equivalence = Arc::new(equivalence);
        self
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &MigrateOptions {
        &self.options
    }

    /// Computes what [`run`](Self::run) would do without changing anything.
    pub async fn plan(&self, conn: &mut SqliteConnection, script: &str) -> Result<MigrationPlan> {
        let mut reference = ReferenceSchema::build(script).await?;
        let result = self.plan_against(conn, &mut reference).await;
        reference.close().await;
        result
    }

    async fn plan_against(
        &self,
        conn: &mut SqliteConnection,
        reference: &mut ReferenceSchema,
    ) -> Result<MigrationPlan> {
        let live = read_schema(conn).await?;
        let tables = TableChanges::between(reference.schema(), &live);

        let altered_tables = find_altered_tables(
            conn,
            &live,
            reference,
            self.options.column_equivalence.as_ref(),
        )
        .await?;

        let rebuilt: BTreeSet<&str> = altered_tables.iter().map(|t| t.name.as_str()).collect();
        let index_changes = find_index_changes(reference.schema(), &live, &rebuilt);

        let create_table_indices = tables.created_indices(reference.schema());

        Ok(MigrationPlan {
            drop_tables: tables.drop.into_keys().collect(),
            create_table_indices,
            create_tables: tables.create.into_values().collect(),
            altered_tables,
            index_changes,
        })
    }

    /// Migrates the live database to the schema defined by `script`.
    ///
    /// The connection must not be used by anything else until this
    /// returns.
    pub async fn run(&self, conn: &mut SqliteConnection, script: &str) -> Result<MigrationReport> {
        let started_at = Utc::now();
        info!("Migrating...");

        let mut reference = ReferenceSchema::build(script).await?;
        let mut report = MigrationReport {
            started_at,
            ..MigrationReport::default()
        };

        let result = self.run_against(conn, &mut reference, &mut report).await;
        reference.close().await;
        result?;

        report.finished_at = Utc::now();
        if report.is_noop() {
            info!("Schema is up to date");
        } else {
            info!(
                created = report.created_tables.len(),
                dropped = report.dropped_tables.len(),
                rebuilt = report.rebuilt_tables.len(),
                "Migration complete"
            );
        }
        Ok(report)
    }

    async fn run_against(
        &self,
        conn: &mut SqliteConnection,
        reference: &mut ReferenceSchema,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let enforced = foreign_keys_enabled(conn).await?;
        if enforced {
            set_foreign_keys(conn, false).await?;
        }

        let result = match self.reconcile_tables(conn, reference.schema(), report).await {
            Ok(()) => self.reconcile_columns(conn, reference, report).await,
            Err(e) => Err(e),
        };

        if enforced {
            if let Err(e) = set_foreign_keys(conn, true).await {
                if result.is_ok() {
                    return Err(e);
                }
                warn!(error = %e, "Failed to re-enable foreign keys after aborted migration");
            }
        }
        result
    }

    /// Drops and creates whole tables, then attaches indices to the new
    /// ones. Runs with foreign key enforcement off, so a parent can go
    /// before its children.
    async fn reconcile_tables(
        &self,
        conn: &mut SqliteConnection,
        reference: &Schema,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let live = read_schema(conn).await?;
        let changes = TableChanges::between(reference, &live);

        for name in changes.drop.keys() {
            info!(table = %name, "Dropping table");
            execute(conn, &ddl::drop_table_sql(name, false)).await?;
            report.dropped_tables.push(name.clone());
        }

        for (name, table) in &changes.create {
            info!(table = %name, "Creating table");
            execute(conn, &table.sql).await?;
            report.created_tables.push(name.clone());
        }

        for index in changes.created_indices(reference) {
            debug!(index = %index.name, table = %index.table, "Creating index");
            execute(conn, &index.sql).await?;
        }

        Ok(())
    }

    /// Rebuilds tables whose columns drifted and reconciles indices on the
    /// rest. Runs with foreign key enforcement off.
    async fn reconcile_columns(
        &self,
        conn: &mut SqliteConnection,
        reference: &mut ReferenceSchema,
        report: &mut MigrationReport,
    ) -> Result<()> {
        // Fresh snapshot: the table set changed above.
        let live = read_schema(conn).await?;
        let altered = find_altered_tables(
            conn,
            &live,
            reference,
            self.options.column_equivalence.as_ref(),
        )
        .await?;

        match self.options.atomicity {
            Atomicity::PerTable => {
                for table in &altered {
                    rebuild_table(conn, table).await?;
                    report.rebuilt_tables.push(table.name.clone());
                }
            }
            Atomicity::AllTables if !altered.is_empty() => {
                let mut outer = conn.begin().await?;
                for table in &altered {
                    if let Err(e) = rebuild_table(&mut outer, table).await {
                        if let Err(rollback) = outer.rollback().await {
                            warn!(error = %rollback, "Failed to roll back migration");
                        }
                        return Err(e);
                    }
                }
                outer.commit().await?;
                report
                    .rebuilt_tables
                    .extend(altered.iter().map(|t| t.name.clone()));
            }
            Atomicity::AllTables => {}
        }

        let rebuilt: BTreeSet<&str> = altered.iter().map(|t| t.name.as_str()).collect();
        for changes in find_index_changes(reference.schema(), &live, &rebuilt) {
            for index in &changes.drop {
                info!(index = %index.name, table = %changes.table, "Dropping index");
                execute(conn, &ddl::drop_index_sql(&index.name)).await?;
                report.dropped_indices.push(index.name.clone());
            }
            for index in &changes.create {
                info!(index = %index.name, table = %changes.table, "Creating index");
                execute(conn, &index.sql).await?;
                report.created_indices.push(index.name.clone());
            }
        }

        Ok(())
    }
}

/// Rebuilds one table through a shadow copy inside its own transaction
/// (a savepoint if `conn` is already in one).
async fn rebuild_table(conn: &mut SqliteConnection, table: &AlteredTable) -> Result<()> {
    info!(
        table = %table.name,
        added = ?table.added_columns,
        removed = ?table.removed_columns,
        drifted = ?table.drifted_columns,
        "Rebuilding altered table"
    );

    let mut tx = conn
        .begin()
        .await
        .map_err(|e| ReconcileError::from(e).during(&table.name, RebuildStep::Begin))?;

    if let Err((step, e)) = rebuild_steps(&mut tx, table).await {
        if let Err(rollback) = tx.rollback().await {
            warn!(table = %table.name, error = %rollback, "Failed to roll back rebuild");
        }
        return Err(e.during(&table.name, step));
    }

    tx.commit()
        .await
        .map_err(|e| ReconcileError::from(e).during(&table.name, RebuildStep::Commit))?;

    info!(table = %table.name, "Rebuilt table");
    Ok(())
}

async fn rebuild_steps(
    conn: &mut SqliteConnection,
    table: &AlteredTable,
) -> std::result::Result<(), (RebuildStep, ReconcileError)> {
    let shadow = table.shadow_name();
    let at = |step: RebuildStep| move |e: ReconcileError| (step, e);

    let shadow_sql = table.shadow_sql().map_err(at(RebuildStep::CreateShadow))?;
    execute(conn, &shadow_sql)
        .await
        .map_err(at(RebuildStep::CreateShadow))?;

    if table.copy_columns.is_empty() {
        debug!(table = %table.name, "No shared columns, skipping data copy");
    } else {
        execute(
            conn,
            &ddl::copy_rows_sql(&table.name, &shadow, &table.copy_columns),
        )
        .await
        .map_err(at(RebuildStep::CopyData))?;
    }

    execute(conn, &ddl::drop_table_sql(&table.name, true))
        .await
        .map_err(at(RebuildStep::DropOriginal))?;

    execute(conn, &ddl::rename_table_sql(&shadow, &table.name))
        .await
        .map_err(at(RebuildStep::RenameShadow))?;

    for index in &table.indices {
        execute(conn, &index.sql)
            .await
            .map_err(at(RebuildStep::RestoreIndices))?;
    }

    check_foreign_keys(conn)
        .await
        .map_err(at(RebuildStep::CheckForeignKeys))?;

    Ok(())
}

/// Executes one statement, attaching the SQL to any failure.
async fn execute(conn: &mut SqliteConnection, sql: &str) -> Result<()> {
    debug!(sql = %sql, "Executing SQL");
    sqlx::query(sql)
        .execute(&mut *conn)
        .await
        .map_err(|source| ReconcileError::Statement {
            sql: sql.to_string(),
            source,
        })?;
    Ok(())
}

/// Reads `PRAGMA foreign_keys`.
pub async fn foreign_keys_enabled(conn: &mut SqliteConnection) -> Result<bool> {
    let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await?;
    Ok(enabled != 0)
}

/// Sets `PRAGMA foreign_keys`. Has no effect inside a transaction.
pub async fn set_foreign_keys(conn: &mut SqliteConnection, enabled: bool) -> Result<()> {
    let sql = if enabled {
        "PRAGMA foreign_keys = ON"
    } else {
        "PRAGMA foreign_keys = OFF"
    };
    execute(conn, sql).await
}

/// Runs `PRAGMA foreign_key_check` over the whole database and fails with
/// every reported violation.
pub async fn check_foreign_keys(conn: &mut SqliteConnection) -> Result<()> {
    let rows: Vec<(String, Option<i64>, String, i64)> =
        sqlx::query_as("PRAGMA foreign_key_check")
            .fetch_all(&mut *conn)
            .await?;

    if rows.is_empty() {
        return Ok(());
    }

    Err(ReconcileError::ForeignKeyViolations(
        rows.into_iter()
            .map(|(table, rowid, parent, fkid)| ForeignKeyViolation {
                table,
                rowid,
                parent,
                fkid,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::read_columns;
    use crate::schema::Strict;

    async fn create_test_conn() -> SqliteConnection {
        SqliteConnection::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory SQLite connection")
    }

    async fn exec(conn: &mut SqliteConnection, sql: &str) {
        sqlx::raw_sql(sql).execute(&mut *conn).await.unwrap();
    }

    async fn table_names(conn: &mut SqliteConnection) -> Vec<String> {
        read_schema(conn)
            .await
            .unwrap()
            .tables
            .into_keys()
            .collect()
    }

    #[test]
    fn test_builder_sets_options() {
        let migrator = Migrator::new()
            .atomicity(Atomicity::AllTables)
            .column_equivalence(Strict);
        assert_eq!(migrator.options().atomicity, Atomicity::AllTables);
        assert!(!migrator.options().column_equivalence.names_only());

        let migrator = Migrator::with_options(MigrateOptions::default());
        assert_eq!(migrator.options().atomicity, Atomicity::PerTable);
        assert!(migrator.options().column_equivalence.names_only());
    }

    #[tokio::test]
    async fn test_migrate_empty_database() {
        let mut conn = create_test_conn().await;
        let script = "
            CREATE TABLE entries (guid TEXT PRIMARY KEY, title TEXT);
            CREATE INDEX idx_entries_title ON entries(title);
        ";

        let report = Migrator::new().run(&mut conn, script).await.unwrap();

        assert_eq!(report.created_tables, vec!["entries"]);
        assert!(report.rebuilt_tables.is_empty());
        let schema = read_schema(&mut conn).await.unwrap();
        assert_eq!(schema.indices_for_table("entries").len(), 1);
    }

    #[tokio::test]
    async fn test_drop_table() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE legacy (id INTEGER); INSERT INTO legacy VALUES (1);
             CREATE TABLE points (id INTEGER PRIMARY KEY);",
        )
        .await;

        let report = Migrator::new()
            .run(&mut conn, "CREATE TABLE points (id INTEGER PRIMARY KEY);")
            .await
            .unwrap();

        assert_eq!(report.dropped_tables, vec!["legacy"]);
        assert_eq!(table_names(&mut conn).await, vec!["points"]);
    }

    #[tokio::test]
    async fn test_drop_referenced_parent_with_child() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE authors (id INTEGER PRIMARY KEY);
             CREATE TABLE books (id INTEGER PRIMARY KEY, author_id INTEGER REFERENCES authors(id));
             CREATE TABLE points (id INTEGER PRIMARY KEY);
             INSERT INTO authors VALUES (1);
             INSERT INTO books VALUES (1, 1);",
        )
        .await;
        assert!(foreign_keys_enabled(&mut conn).await.unwrap());

        let report = Migrator::new()
            .run(&mut conn, "CREATE TABLE points (id INTEGER PRIMARY KEY);")
            .await
            .unwrap();

        assert_eq!(report.dropped_tables, vec!["authors", "books"]);
        assert_eq!(table_names(&mut conn).await, vec!["points"]);
        assert!(foreign_keys_enabled(&mut conn).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_column_preserves_rows() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE events (id INTEGER PRIMARY KEY); INSERT INTO events (id) VALUES (1);",
        )
        .await;

        let report = Migrator::new()
            .run(
                &mut conn,
                "CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT DEFAULT 'unnamed');",
            )
            .await
            .unwrap();

        assert_eq!(report.rebuilt_tables, vec!["events"]);
        let rows: Vec<(i64, Option<String>)> = sqlx::query_as("SELECT id, name FROM events")
            .fetch_all(&mut conn)
            .await
            .unwrap();
        assert_eq!(rows, vec![(1, Some("unnamed".to_string()))]);
    }

    #[tokio::test]
    async fn test_rebuild_restores_indices_and_foreign_keys() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE events (id INTEGER PRIMARY KEY, legacy TEXT);
             CREATE INDEX idx_events_legacy ON events(legacy);",
        )
        .await;
        assert!(foreign_keys_enabled(&mut conn).await.unwrap());

        Migrator::new()
            .run(
                &mut conn,
                "CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE INDEX idx_events_name ON events(name);",
            )
            .await
            .unwrap();

        let schema = read_schema(&mut conn).await.unwrap();
        let indices = schema.indices_for_table("events");
        assert_eq!(indices.keys().collect::<Vec<_>>(), vec!["idx_events_name"]);
        assert!(read_schema(&mut conn).await.unwrap().table("events_new").is_none());
        assert!(foreign_keys_enabled(&mut conn).await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_keys_left_disabled_if_disabled_on_entry() {
        let mut conn = create_test_conn().await;
        set_foreign_keys(&mut conn, false).await.unwrap();
        exec(&mut conn, "CREATE TABLE t (a);").await;

        Migrator::new()
            .run(&mut conn, "CREATE TABLE t (a, b);")
            .await
            .unwrap();

        assert!(!foreign_keys_enabled(&mut conn).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_script_leaves_live_untouched() {
        let mut conn = create_test_conn().await;
        exec(&mut conn, "CREATE TABLE legacy (id);").await;

        let err = Migrator::new()
            .run(&mut conn, "CREATE TABLE ok (id); CREATE TABLE broken (;")
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::ReferenceBuild(_)));
        assert_eq!(table_names(&mut conn).await, vec!["legacy"]);
    }

    #[tokio::test]
    async fn test_foreign_key_violation_aborts_and_restores_enforcement() {
        let mut conn = create_test_conn().await;
        set_foreign_keys(&mut conn, false).await.unwrap();
        exec(
            &mut conn,
            "CREATE TABLE feeds (id INTEGER PRIMARY KEY);
             CREATE TABLE entries (id INTEGER PRIMARY KEY, feed_id INTEGER REFERENCES feeds(id));
             INSERT INTO entries VALUES (1, 42);",
        )
        .await;
        set_foreign_keys(&mut conn, true).await.unwrap();

        let err = Migrator::new()
            .run(
                &mut conn,
                "CREATE TABLE feeds (id INTEGER PRIMARY KEY);
                 CREATE TABLE entries (
                    id INTEGER PRIMARY KEY,
                    feed_id INTEGER REFERENCES feeds(id),
                    title TEXT
                 );",
            )
            .await
            .unwrap_err();

        match err {
            ReconcileError::Rebuild { table, step, source } => {
                assert_eq!(table, "entries");
                assert_eq!(step, RebuildStep::CheckForeignKeys);
                assert!(matches!(*source, ReconcileError::ForeignKeyViolations(ref v) if v.len() == 1));
            }
            other => panic!("Expected rebuild failure, got {other:?}"),
        }

        // Rolled back: the old column set is intact and enforcement is back.
        let columns = read_columns(&mut conn, "entries").await.unwrap();
        assert!(!columns.contains_key("title"));
        assert!(read_schema(&mut conn).await.unwrap().table("entries_new").is_none());
        assert!(foreign_keys_enabled(&mut conn).await.unwrap());
    }

    #[tokio::test]
    async fn test_shadow_name_taken_by_desired_table() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE events (id INTEGER PRIMARY KEY);
             CREATE TABLE events_new (id INTEGER PRIMARY KEY);
             INSERT INTO events VALUES (1);",
        )
        .await;
        let script = "
            CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT);
            CREATE TABLE events_new (id INTEGER PRIMARY KEY);
        ";

        let err = Migrator::new().plan(&mut conn, script).await.unwrap_err();
        assert!(matches!(err, ReconcileError::ShadowCollision { .. }));

        let err = Migrator::new().run(&mut conn, script).await.unwrap_err();
        match err {
            ReconcileError::ShadowCollision { table, shadow } => {
                assert_eq!(table, "events");
                assert_eq!(shadow, "events_new");
            }
            other => panic!("Expected shadow collision, got {other:?}"),
        }

        let columns = read_columns(&mut conn, "events").await.unwrap();
        assert!(!columns.contains_key("name"));
        assert!(foreign_keys_enabled(&mut conn).await.unwrap());
    }

    #[tokio::test]
    async fn test_per_table_keeps_earlier_rebuilds_on_failure() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE a (id INTEGER PRIMARY KEY);
             CREATE TABLE b (id INTEGER PRIMARY KEY, v TEXT);
             INSERT INTO b VALUES (1, NULL);",
        )
        .await;

        // Rebuilding `b` fails: the copied NULL violates NOT NULL.
        let script = "
            CREATE TABLE a (id INTEGER PRIMARY KEY, extra TEXT);
            CREATE TABLE b (id INTEGER PRIMARY KEY, v TEXT NOT NULL, extra TEXT);
        ";
        let err = Migrator::new().run(&mut conn, script).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Rebuild {
                step: RebuildStep::CopyData,
                ..
            }
        ));

        assert!(read_columns(&mut conn, "a").await.unwrap().contains_key("extra"));
        assert!(!read_columns(&mut conn, "b").await.unwrap().contains_key("extra"));
    }

    #[tokio::test]
    async fn test_all_tables_rolls_back_every_rebuild_on_failure() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE a (id INTEGER PRIMARY KEY);
             CREATE TABLE b (id INTEGER PRIMARY KEY, v TEXT);
             INSERT INTO b VALUES (1, NULL);",
        )
        .await;

        let script = "
            CREATE TABLE a (id INTEGER PRIMARY KEY, extra TEXT);
            CREATE TABLE b (id INTEGER PRIMARY KEY, v TEXT NOT NULL, extra TEXT);
        ";
        Migrator::new()
            .atomicity(Atomicity::AllTables)
            .run(&mut conn, script)
            .await
            .unwrap_err();

        assert!(!read_columns(&mut conn, "a").await.unwrap().contains_key("extra"));
        assert!(!read_columns(&mut conn, "b").await.unwrap().contains_key("extra"));
        assert!(foreign_keys_enabled(&mut conn).await.unwrap());
    }

    #[tokio::test]
    async fn test_all_tables_commits_every_rebuild() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE a (id INTEGER PRIMARY KEY); CREATE TABLE b (id INTEGER PRIMARY KEY);",
        )
        .await;

        let report = Migrator::new()
            .atomicity(Atomicity::AllTables)
            .run(
                &mut conn,
                "CREATE TABLE a (id INTEGER PRIMARY KEY, x);
                 CREATE TABLE b (id INTEGER PRIMARY KEY, y);",
            )
            .await
            .unwrap();

        assert_eq!(report.rebuilt_tables, vec!["a", "b"]);
        assert!(read_columns(&mut conn, "a").await.unwrap().contains_key("x"));
        assert!(read_columns(&mut conn, "b").await.unwrap().contains_key("y"));
    }

    #[tokio::test]
    async fn test_strict_equivalence_rebuilds_retyped_column() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE points (id INTEGER PRIMARY KEY, lat TEXT); INSERT INTO points VALUES (1, '45.5');",
        )
        .await;
        let script = "CREATE TABLE points (id INTEGER PRIMARY KEY, lat REAL);";

        let report = Migrator::new().run(&mut conn, script).await.unwrap();
        assert!(report.is_noop());

        let report = Migrator::new()
            .column_equivalence(Strict)
            .run(&mut conn, script)
            .await
            .unwrap();
        assert_eq!(report.rebuilt_tables, vec!["points"]);

        let columns = read_columns(&mut conn, "points").await.unwrap();
        assert_eq!(columns["lat"].declared_type, "REAL");
        let (lat,): (f64,) = sqlx::query_as("SELECT lat FROM points WHERE id = 1")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert!((lat - 45.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_index_reconciliation_on_untouched_table() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE points (id INTEGER PRIMARY KEY, lat REAL, lng REAL);
             CREATE INDEX idx_points_lat ON points(lat);",
        )
        .await;

        let report = Migrator::new()
            .run(
                &mut conn,
                "CREATE TABLE points (id INTEGER PRIMARY KEY, lat REAL, lng REAL);
                 CREATE INDEX idx_points_lng ON points(lng);",
            )
            .await
            .unwrap();

        assert!(report.rebuilt_tables.is_empty());
        assert_eq!(report.dropped_indices, vec!["idx_points_lat"]);
        assert_eq!(report.created_indices, vec!["idx_points_lng"]);
    }

    #[tokio::test]
    async fn test_plan_does_not_mutate() {
        let mut conn = create_test_conn().await;
        exec(
            &mut conn,
            "CREATE TABLE legacy (id); CREATE TABLE events (id INTEGER PRIMARY KEY);",
        )
        .await;
        let script = "
            CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT);
            CREATE TABLE feeds (url TEXT PRIMARY KEY);
            CREATE INDEX idx_feeds_url ON feeds(url);
        ";

        let plan = Migrator::new().plan(&mut conn, script).await.unwrap();

        assert_eq!(plan.drop_tables, vec!["legacy"]);
        assert_eq!(plan.create_tables.len(), 1);
        assert_eq!(plan.create_tables[0].name, "feeds");
        assert_eq!(plan.create_table_indices.len(), 1);
        assert_eq!(plan.altered_tables.len(), 1);
        assert_eq!(plan.altered_tables[0].added_columns, vec!["name"]);

        let statements = plan.statements().unwrap();
        assert_eq!(statements[0], "DROP TABLE \"legacy\"");
        assert!(statements.iter().any(|s| s.starts_with("CREATE TABLE events_new")));

        assert_eq!(table_names(&mut conn).await, vec!["events", "legacy"]);

        Migrator::new().run(&mut conn, script).await.unwrap();
        assert!(Migrator::new().plan(&mut conn, script).await.unwrap().is_empty());
    }
}
