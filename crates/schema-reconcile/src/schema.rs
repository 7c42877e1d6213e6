//! Schema snapshot types.
//!
//! A [`Schema`] is a point-in-time view of a database catalog. It is never
//! cached across mutations: every phase of a migration that needs to see the
//! catalog reads a fresh one.

use std::collections::BTreeMap;

use serde::Serialize;

/// A snapshot of a database catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schema {
    /// Tables keyed by name.
    pub tables: BTreeMap<String, Table>,
    /// Indices in catalog order.
    pub indices: Vec<Index>,
}

impl Schema {
    /// Looks up a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Returns the indices owned by `table`, keyed by index name.
    #[must_use]
    pub fn indices_for_table(&self, table: &str) -> BTreeMap<String, Index> {
        self.indices
            .iter()
            .filter(|index| index.table == table)
            .map(|index| (index.name.clone(), index.clone()))
            .collect()
    }

    /// Returns the table names in this snapshot.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// A table as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// The `CREATE TABLE` statement exactly as the catalog stores it.
    pub sql: String,
    /// Columns, filled in on demand by
    /// [`read_columns`](crate::introspect::read_columns).
    pub columns: BTreeMap<String, TableColumn>,
}

impl Table {
    /// Creates a table entry with no columns loaded.
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            columns: BTreeMap::new(),
        }
    }
}

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableColumn {
    /// Column name.
    pub name: String,
    /// Declared type, verbatim. SQLite does not enforce it.
    pub declared_type: String,
    /// Whether the column is declared `NOT NULL`.
    pub not_null: bool,
    /// The default expression as SQL text, if any.
    pub default_value: Option<String>,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
}

impl TableColumn {
    /// Creates a nullable column with no default.
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            not_null: false,
            default_value: None,
            primary_key: false,
        }
    }

    /// Marks the column `NOT NULL`.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Sets the default expression.
    #[must_use]
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default_value = Some(expr.into());
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// An index as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Name of the table the index belongs to.
    pub table: String,
    /// The `CREATE INDEX` statement exactly as the catalog stores it.
    pub sql: String,
}

/// Decides whether a desired column and a live column of the same name
/// count as the same column.
///
/// Columns are always paired by name first; this predicate only runs on
/// pairs that share a name. Returning `false` marks the table as altered.
pub trait ColumnEquivalence: Send + Sync + std::fmt::Debug {
    /// Returns `true` if `live` already satisfies `desired`.
    fn equivalent(&self, desired: &TableColumn, live: &TableColumn) -> bool;

    /// Returns `true` if this predicate accepts every same-named pair.
    ///
    /// Lets the planner skip per-column comparison entirely.
    fn names_only(&self) -> bool {
        false
    }
}

/// Same name means same column. Type, nullability, default and primary key
/// drift are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameOnly;

impl ColumnEquivalence for NameOnly {
    fn equivalent(&self, _desired: &TableColumn, _live: &TableColumn) -> bool {
        true
    }

    fn names_only(&self) -> bool {
        true
    }
}

/// Same name, declared type (case-insensitive), nullability, default and
/// primary key flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct Strict;

impl ColumnEquivalence for Strict {
    fn equivalent(&self, desired: &TableColumn, live: &TableColumn) -> bool {
        desired.declared_type.eq_ignore_ascii_case(&live.declared_type)
            && desired.not_null == live.not_null
            && desired.default_value == live.default_value
            && desired.primary_key == live.primary_key
    }
}
