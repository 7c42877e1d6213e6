//! Catalog introspection.
//!
//! Reads `sqlite_schema` into a [`Schema`] and `pragma_table_info` into
//! column maps. Column reads are a separate, per-table call so callers only
//! pay for the tables they compare.

use std::collections::BTreeMap;

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::Result;
use crate::schema::{Index, Schema, Table, TableColumn};

/// Tables and indices with a stored create-statement, minus SQLite's own
/// objects (`sqlite_sequence`, `sqlite_autoindex_*`, `sqlite_stat*`).
const CATALOG_SQL: &str = r"
SELECT type, name, tbl_name, sql
FROM sqlite_schema
WHERE type IN ('table', 'index')
  AND sql IS NOT NULL
  AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
ORDER BY rowid
";

const TABLE_INFO_SQL: &str =
    r#"SELECT cid, name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#;

/// Reads the tables and indices currently in the catalog.
///
/// Columns are left empty; see [`read_columns`].
pub async fn read_schema(conn: &mut SqliteConnection) -> Result<Schema> {
    let rows: Vec<(String, String, String, String)> =
        sqlx::query_as(CATALOG_SQL).fetch_all(&mut *conn).await?;

    let mut schema = Schema::default();
    for (kind, name, table, sql) in rows {
        match kind.as_str() {
            "table" => {
                schema.tables.insert(name.clone(), Table::new(name, sql));
            }
            "index" => schema.indices.push(Index { name, table, sql }),
            _ => {}
        }
    }

    debug!(
        tables = schema.tables.len(),
        indices = schema.indices.len(),
        "Read schema snapshot"
    );
    Ok(schema)
}

/// Reads the declared columns of `table`, keyed by name.
///
/// An unknown table yields an empty map.
pub async fn read_columns(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<BTreeMap<String, TableColumn>> {
    let rows: Vec<(i64, String, String, i64, Option<String>, i64)> = sqlx::query_as(TABLE_INFO_SQL)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(_cid, name, declared_type, not_null, default_value, pk)| {
            let column = TableColumn {
                name: name.clone(),
                declared_type,
                not_null: not_null != 0,
                default_value,
                primary_key: pk > 0,
            };
            (name, column)
        })
        .collect())
}

/// Reads the schema and fills in every table's columns.
///
/// Used for whole-database inspection; the migration engine itself only
/// loads columns for tables it compares.
pub async fn read_schema_with_columns(conn: &mut SqliteConnection) -> Result<Schema> {
    let mut schema = read_schema(conn).await?;
    for table in schema.tables.values_mut() {
        table.columns = read_columns(conn, &table.name).await?;
    }
    Ok(schema)
}
