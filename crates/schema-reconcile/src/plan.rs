//! Migration planning.
//!
//! Turns a live snapshot and a reference snapshot into the set of changes a
//! run has to make: tables to create and drop, tables whose column set
//! drifted (and must be rebuilt), and index drift on tables that survive
//! untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::ddl;
use crate::diff::{diff, intersect};
use crate::error::{ReconcileError, Result};
use crate::introspect::read_columns;
use crate::reference::ReferenceSchema;
use crate::schema::{ColumnEquivalence, Index, Schema, Table, TableColumn};

/// Table-level changes: tables only the reference has, tables only the
/// live database has.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableChanges {
    /// Reference tables missing from the live database.
    pub create: BTreeMap<String, Table>,
    /// Live tables missing from the reference.
    pub drop: BTreeMap<String, Table>,
}

impl TableChanges {
    /// Compares table names between the reference and the live snapshot.
    #[must_use]
    pub fn between(reference: &Schema, live: &Schema) -> Self {
        let tables = diff(&reference.tables, &live.tables);
        Self {
            create: tables.to_add,
            drop: tables.to_remove,
        }
    }

    /// Returns `true` if both snapshots have the same table names.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.drop.is_empty()
    }

    /// The reference indices owned by the tables being created.
    #[must_use]
    pub fn created_indices(&self, reference: &Schema) -> Vec<Index> {
        self.create
            .keys()
            .flat_map(|name| reference.indices_for_table(name).into_values())
            .collect()
    }
}

/// A table present on both sides whose columns differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlteredTable {
    /// Table name.
    pub name: String,
    /// The reference `CREATE TABLE` statement.
    pub sql: String,
    /// Columns only the reference declares.
    pub added_columns: Vec<String>,
    /// Columns only the live table has. Their data is lost.
    pub removed_columns: Vec<String>,
    /// Same-named columns the equivalence predicate rejected.
    pub drifted_columns: Vec<String>,
    /// Columns copied from the live table into the rebuilt one.
    pub copy_columns: Vec<String>,
    /// Reference indices to recreate after the rebuild.
    pub indices: Vec<Index>,
}

impl AlteredTable {
    /// Compares the columns of one table. Returns `None` when the live
    /// table already matches.
    #[must_use]
    pub fn compare(
        table: &Table,
        desired: &BTreeMap<String, TableColumn>,
        live: &BTreeMap<String, TableColumn>,
        equivalence: &dyn ColumnEquivalence,
    ) -> Option<Self> {
        let columns = diff(desired, live);
        let copy_columns = intersect(desired, live);

        let drifted_columns: Vec<String> = if equivalence.names_only() {
            Vec::new()
        } else {
            copy_columns
                .iter()
                .filter(|name| !equivalence.equivalent(&desired[*name], &live[*name]))
                .cloned()
                .collect()
        };

        if columns.is_empty() && drifted_columns.is_empty() {
            return None;
        }

        Some(Self {
            name: table.name.clone(),
            sql: table.sql.clone(),
            added_columns: columns.to_add.into_keys().collect(),
            removed_columns: columns.to_remove.into_keys().collect(),
            drifted_columns,
            copy_columns,
            indices: Vec::new(),
        })
    }

    /// The name of the shadow table this rebuild goes through.
    #[must_use]
    pub fn shadow_name(&self) -> String {
        ddl::shadow_name(&self.name)
    }

    /// The reference create-statement retargeted at the shadow table.
    pub fn shadow_sql(&self) -> Result<String> {
        ddl::shadow_create_sql(&self.sql, &self.name, &self.shadow_name()).ok_or_else(|| {
            ReconcileError::ShadowStatement {
                table: self.name.clone(),
                sql: self.sql.clone(),
            }
        })
    }

    /// The statements of the rebuild protocol, in order.
    pub fn statements(&self) -> Result<Vec<String>> {
        let shadow = self.shadow_name();
        let mut statements = vec![self.shadow_sql()?];
        if !self.copy_columns.is_empty() {
            statements.push(ddl::copy_rows_sql(&self.name, &shadow, &self.copy_columns));
        }
        statements.push(ddl::drop_table_sql(&self.name, true));
        statements.push(ddl::rename_table_sql(&shadow, &self.name));
        statements.extend(self.indices.iter().map(|index| index.sql.clone()));
        Ok(statements)
    }
}

/// Reads columns on both sides for every table the two snapshots share and
/// returns the ones that need a rebuild.
///
/// Fails with [`ReconcileError::ShadowCollision`] if a table that needs a
/// rebuild has its shadow name taken by a live or desired table.
pub async fn find_altered_tables(
    live: &mut SqliteConnection,
    live_schema: &Schema,
    reference: &mut ReferenceSchema,
    equivalence: &dyn ColumnEquivalence,
) -> Result<Vec<AlteredTable>> {
    let shared = intersect(&reference.schema().tables, &live_schema.tables);

    let mut altered = Vec::new();
    for name in shared {
        let desired = reference.columns(&name).await?;
        let current = read_columns(live, &name).await?;

        let reference_schema = reference.schema();
        let table = &reference_schema.tables[&name];
        if let Some(mut table) = AlteredTable::compare(table, &desired, &current, equivalence) {
            let shadow = table.shadow_name();
            if live_schema.table(&shadow).is_some() || reference_schema.table(&shadow).is_some() {
                return Err(ReconcileError::ShadowCollision {
                    table: table.name,
                    shadow,
                });
            }
            table.indices = reference_schema.indices_for_table(&name).into_values().collect();
            altered.push(table);
        }
    }
    Ok(altered)
}

/// Index drift on one table that is not being rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexChanges {
    /// Owning table.
    pub table: String,
    /// Reference indices missing from the live table.
    pub create: Vec<Index>,
    /// Live indices the reference does not define.
    pub drop: Vec<Index>,
}

impl IndexChanges {
    /// The statements that reconcile this table's indices: drops first.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.drop
            .iter()
            .map(|index| ddl::drop_index_sql(&index.name))
            .chain(self.create.iter().map(|index| index.sql.clone()))
            .collect()
    }
}

/// Compares indices, by name, for every table both snapshots share except
/// those in `skip`.
#[must_use]
pub fn find_index_changes(
    reference: &Schema,
    live: &Schema,
    skip: &BTreeSet<&str>,
) -> Vec<IndexChanges> {
    intersect(&reference.tables, &live.tables)
        .into_iter()
        .filter(|name| !skip.contains(name.as_str()))
        .filter_map(|name| {
            let indices = diff(
                &reference.indices_for_table(&name),
                &live.indices_for_table(&name),
            );
            if indices.is_empty() {
                return None;
            }
            Some(IndexChanges {
                table: name,
                create: indices.to_add.into_values().collect(),
                drop: indices.to_remove.into_values().collect(),
            })
        })
        .collect()
}

/// Everything a migration run would do, computed without touching the live
/// database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    /// Tables to drop.
    pub drop_tables: Vec<String>,
    /// Tables to create, with their reference statements.
    pub create_tables: Vec<Table>,
    /// Reference indices for the tables being created.
    pub create_table_indices: Vec<Index>,
    /// Tables to rebuild.
    pub altered_tables: Vec<AlteredTable>,
    /// Index drift on surviving, non-rebuilt tables.
    pub index_changes: Vec<IndexChanges>,
}

impl MigrationPlan {
    /// Returns `true` if a run would execute no DDL.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drop_tables.is_empty()
            && self.create_tables.is_empty()
            && self.altered_tables.is_empty()
            && self.index_changes.is_empty()
    }

    /// The DDL a run would execute, in execution order.
    ///
    /// Transaction control and foreign key pragmas are not included.
    pub fn statements(&self) -> Result<Vec<String>> {
        let mut statements: Vec<String> = self
            .drop_tables
            .iter()
            .map(|name| ddl::drop_table_sql(name, false))
            .collect();
        statements.extend(self.create_tables.iter().map(|table| table.sql.clone()));
        statements.extend(self.create_table_indices.iter().map(|index| index.sql.clone()));
        for table in &self.altered_tables {
            statements.extend(table.statements()?);
        }
        for changes in &self.index_changes {
            statements.extend(changes.statements());
        }
        Ok(statements)
    }
}
