//! SQL text for the statements the engine issues itself.
//!
//! Create statements for tables and indices are never generated here: they
//! are replayed verbatim from the reference catalog. Everything else the
//! rebuild protocol needs (drops, renames, the data copy) is built from
//! quoted identifiers.

/// Quotes an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `DROP TABLE`, optionally guarded with `IF EXISTS`.
#[must_use]
pub fn drop_table_sql(name: &str, if_exists: bool) -> String {
    let mut sql = String::from("DROP TABLE ");
    if if_exists {
        sql.push_str("IF EXISTS ");
    }
    sql.push_str(&quote_identifier(name));
    sql
}

/// `DROP INDEX`.
#[must_use]
pub fn drop_index_sql(name: &str) -> String {
    format!("DROP INDEX {}", quote_identifier(name))
}

/// `ALTER TABLE .. RENAME TO ..`.
#[must_use]
pub fn rename_table_sql(old_name: &str, new_name: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_identifier(old_name),
        quote_identifier(new_name)
    )
}

/// `INSERT INTO <to> (<cols>) SELECT <cols> FROM <from>`.
#[must_use]
pub fn copy_rows_sql(from: &str, to: &str, columns: &[String]) -> String {
    let cols = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
        quote_identifier(to),
        quote_identifier(from)
    )
}

/// The name of the temporary table a rebuild copies `table` into.
///
/// Not unique: a schema that also defines `<table>_new` cannot have
/// `table` rebuilt.
#[must_use]
pub fn shadow_name(table: &str) -> String {
    format!("{table}_new")
}

/// Rewrites a verbatim `CREATE TABLE` statement so it creates `shadow`
/// instead of `table`.
///
/// The statement is treated as a template with a single substitution
/// point: the first occurrence of `table` that stands as a whole
/// identifier, i.e. is not part of a keyword or of a longer name. Quoted
/// names (`"events"`, `[events]`, `` `events` ``) qualify since the quote
/// characters are not identifier characters. Returns `None` if the
/// statement never mentions the table by name.
#[must_use]
pub fn shadow_create_sql(sql: &str, table: &str, shadow: &str) -> Option<String> {
    if table.is_empty() {
        return None;
    }
    let bytes = sql.as_bytes();
    let mut from = 0;
    while let Some(offset) = sql[from..].find(table) {
        let start = from + offset;
        let end = start + table.len();
        let before_ok = start == 0 || !is_ident_byte(bytes[start - 1]);
        let after_ok = end == bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            let mut out = String::with_capacity(sql.len() + shadow.len());
            out.push_str(&sql[..start]);
            out.push_str(shadow);
            out.push_str(&sql[end..]);
            return Some(out);
        }
        from = end;
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}
