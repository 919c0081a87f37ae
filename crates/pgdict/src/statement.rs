//! Statement construction from records.
//!
//! Inserts bind every value as a parameter and never cast: the database
//! coerces each parameter to its target column's type. Resolved SQL types are
//! only written out in DDL (`CREATE TABLE`, `ALTER TABLE ... ADD COLUMN`).
//!
//! Keyed writes append `ON CONFLICT ("key") DO NOTHING` or
//! `DO UPDATE SET "c" = EXCLUDED."c"` for every non-key column.

use std::collections::HashMap;

use crate::error::{DictError, DictResult};
use crate::ident::{TableName, quote_column};
use crate::record::Record;
use crate::sql::{MAX_BIND_PARAMS, Sql};
use crate::value::Value;

/// Rendered SQL text plus its bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl From<Sql> for Statement {
    fn from(sql: Sql) -> Self {
        Self {
            sql: sql.to_sql(),
            params: sql.into_params(),
        }
    }
}

/// A column paired with its resolved SQL type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedColumn {
    pub column: String,
    pub sql_type: String,
    /// Sample value the type was resolved from, if any.
    pub value: Option<Value>,
}

/// `INSERT INTO table ("a", "b") VALUES ($1, $2)` for one record.
pub fn insert(table: &TableName, record: &Record) -> DictResult<Statement> {
    let mut sql = Sql::new("INSERT INTO ");
    sql.push_table(table);
    if record.is_empty() {
        sql.push(" DEFAULT VALUES");
        return Ok(sql.into());
    }
    sql.push(" ");
    sql.push_column_list(record.columns())?;
    sql.push(" VALUES ");
    sql.push_bind_row(record.values().cloned());
    Ok(sql.into())
}

/// What a keyed insert does when the key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Keep the existing row.
    DoNothing,
    /// Overwrite the existing row's non-key columns.
    Update,
}

/// Single-row insert that resolves conflicts on `key`.
///
/// The record must hold a non-null `key`.
pub fn upsert(
    table: &TableName,
    record: &Record,
    key: &str,
    action: OnConflict,
) -> DictResult<Statement> {
    key_of(record, key)?;
    let mut sql = Sql::new("INSERT INTO ");
    sql.push_table(table);
    sql.push(" ");
    sql.push_column_list(record.columns())?;
    sql.push(" VALUES ");
    sql.push_bind_row(record.values().cloned());
    push_on_conflict(&mut sql, key, record.columns(), action)?;
    Ok(sql.into())
}

/// Multi-row inserts for `rows`, laid out in `columns` order.
///
/// Rows are split so no statement carries more than `max_rows` rows or more
/// than [`MAX_BIND_PARAMS`] parameters. Every row must hold exactly
/// `columns`.
pub fn insert_rows(
    table: &TableName,
    columns: &[String],
    rows: &[Record],
    max_rows: usize,
) -> DictResult<Vec<Statement>> {
    let rows: Vec<&Record> = rows.iter().collect();
    build_rows(table, columns, &rows, max_rows, None)
}

/// [`insert_rows`] resolving conflicts on `key`.
///
/// When several rows share a key only the last one is written, at the
/// position of that last occurrence.
pub fn upsert_rows(
    table: &TableName,
    columns: &[String],
    rows: &[Record],
    max_rows: usize,
    key: &str,
    action: OnConflict,
) -> DictResult<Vec<Statement>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    if !columns.iter().any(|c| c == key) {
        return Err(DictError::validation(format!("rows have no id column '{key}'")));
    }
    let rows = last_per_key(rows, key)?;
    build_rows(table, columns, &rows, max_rows, Some((key, action)))
}

fn build_rows(
    table: &TableName,
    columns: &[String],
    rows: &[&Record],
    max_rows: usize,
    conflict: Option<(&str, OnConflict)>,
) -> DictResult<Vec<Statement>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    if columns.is_empty() {
        return Err(DictError::validation("multi-row insert needs at least one column"));
    }
    if columns.len() > MAX_BIND_PARAMS {
        return Err(DictError::validation(format!(
            "{} columns exceed the {MAX_BIND_PARAMS} parameter limit",
            columns.len()
        )));
    }
    let rows_per_statement = max_rows.clamp(1, MAX_BIND_PARAMS / columns.len());

    let mut head = Sql::new("INSERT INTO ");
    head.push_table(table);
    head.push(" ");
    head.push_column_list(columns.iter().map(String::as_str))?;
    head.push(" VALUES ");

    let mut tail = Sql::empty();
    if let Some((key, action)) = conflict {
        push_on_conflict(&mut tail, key, columns.iter().map(String::as_str), action)?;
    }
    let tail = tail.to_sql();

    let mut statements = Vec::with_capacity(rows.len().div_ceil(rows_per_statement));
    for chunk in rows.chunks(rows_per_statement) {
        let mut sql = head.clone();
        for (i, row) in chunk.iter().enumerate() {
            if i > 0 {
                sql.push(", ");
            }
            sql.push_bind_row(ordered_values(columns, row)?);
        }
        sql.push(&tail);
        statements.push(sql.into());
    }
    Ok(statements)
}

fn key_of<'a>(record: &'a Record, key: &str) -> DictResult<&'a Value> {
    match record.get(key) {
        Some(value) if !value.is_null() => Ok(value),
        Some(_) => Err(DictError::validation(format!("id column '{key}' is null"))),
        None => Err(DictError::validation(format!("record has no id column '{key}'"))),
    }
}

// One statement may not touch the same conflicting row twice.
fn last_per_key<'a>(rows: &'a [Record], key: &str) -> DictResult<Vec<&'a Record>> {
    let keys = rows
        .iter()
        .map(|row| key_of(row, key).map(ToString::to_string))
        .collect::<DictResult<Vec<_>>>()?;
    let last: HashMap<&str, usize> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();
    Ok(rows
        .iter()
        .zip(&keys)
        .enumerate()
        .filter(|(i, (_, k))| last.get(k.as_str()) == Some(i))
        .map(|(_, (row, _))| row)
        .collect())
}

fn push_on_conflict<'a>(
    sql: &mut Sql,
    key: &str,
    columns: impl IntoIterator<Item = &'a str>,
    action: OnConflict,
) -> DictResult<()> {
    sql.push(" ON CONFLICT (");
    sql.push_column(key)?;
    sql.push(")");

    let updates: Vec<&str> = match action {
        OnConflict::DoNothing => Vec::new(),
        OnConflict::Update => columns.into_iter().filter(|c| *c != key).collect(),
    };
    if updates.is_empty() {
        sql.push(" DO NOTHING");
        return Ok(());
    }
    sql.push(" DO UPDATE SET ");
    for (i, column) in updates.iter().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        let quoted = quote_column(column)?;
        sql.push(&quoted);
        sql.push(" = EXCLUDED.");
        sql.push(&quoted);
    }
    Ok(())
}

fn ordered_values(columns: &[String], row: &Record) -> DictResult<Vec<Value>> {
    if row.len() != columns.len() {
        return Err(DictError::validation(format!(
            "row has {} columns, expected {}",
            row.len(),
            columns.len()
        )));
    }
    columns
        .iter()
        .map(|c| {
            row.get(c)
                .cloned()
                .ok_or_else(|| DictError::validation(format!("row is missing column '{c}'")))
        })
        .collect()
}

/// `CREATE TABLE table ("a" int, "b" text)`.
///
/// `primary_key` must name one of `columns`.
pub fn create_table(
    table: &TableName,
    columns: &[TypedColumn],
    primary_key: Option<&str>,
) -> DictResult<Statement> {
    if columns.is_empty() {
        return Err(DictError::validation(format!(
            "cannot create table {table} without columns"
        )));
    }
    if let Some(key) = primary_key
        && !columns.iter().any(|c| c.column == key)
    {
        return Err(DictError::validation(format!(
            "primary key '{key}' is not a column of {table}"
        )));
    }
    let mut sql = Sql::new("CREATE TABLE ");
    sql.push_table(table);
    sql.push(" (");
    for (i, typed) in columns.iter().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        validate_sql_type(&typed.sql_type)?;
        sql.push_column(&typed.column)?;
        sql.push(" ");
        sql.push(&typed.sql_type);
        if primary_key == Some(typed.column.as_str()) {
            sql.push(" PRIMARY KEY");
        }
    }
    sql.push(")");
    Ok(sql.into())
}

/// `ALTER TABLE table ADD COLUMN "c" type NULL`.
pub fn add_column(table: &TableName, column: &TypedColumn) -> DictResult<Statement> {
    validate_sql_type(&column.sql_type)?;
    let mut sql = Sql::new("ALTER TABLE ");
    sql.push_table(table);
    sql.push(" ADD COLUMN ");
    sql.push_column(&column.column)?;
    sql.push(" ");
    sql.push(&column.sql_type);
    sql.push(" NULL");
    Ok(sql.into())
}

/// SQL type names are spliced into DDL verbatim, so only a conservative
/// character set is allowed.
pub fn validate_sql_type(sql_type: &str) -> DictResult<()> {
    let ok = !sql_type.trim().is_empty()
        && sql_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || " _(),.[]".contains(c));
    if ok {
        Ok(())
    } else {
        Err(DictError::validation(format!("invalid SQL type '{sql_type}'")))
    }
}
