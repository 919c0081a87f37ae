//! Parameter-safe SQL builder.
//!
//! `Sql` stores raw fragments and bound [`Value`]s separately and renders
//! `$1, $2, ...` placeholders in order, so statement builders never have to
//! track placeholder indices or interpolate values.
//!
//! ```
//! use pgdict::Sql;
//!
//! let mut q = Sql::new("INSERT INTO events (\"id\") VALUES (");
//! q.push_bind(1).push(")");
//! assert_eq!(q.to_sql(), "INSERT INTO events (\"id\") VALUES ($1)");
//! ```

use std::fmt::Write;
use tokio_postgres::types::ToSql;

use crate::error::DictResult;
use crate::ident::{TableName, quote_column};
use crate::value::Value;

/// Postgres accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq)]
enum SqlPart {
    Raw(String),
    Param,
}

/// A SQL statement under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sql {
    parts: Vec<SqlPart>,
    params: Vec<Value>,
}

impl Sql {
    /// Create a new builder with an initial SQL fragment.
    pub fn new(initial_sql: impl Into<String>) -> Self {
        let mut sql = Self::empty();
        sql.push(&initial_sql.into());
        sql
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Append raw SQL (no parameters).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }
        match self.parts.last_mut() {
            Some(SqlPart::Raw(last)) => last.push_str(sql),
            _ => self.parts.push(SqlPart::Raw(sql.to_string())),
        }
        self
    }

    /// Append a placeholder and bind its value.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.parts.push(SqlPart::Param);
        self.params.push(value.into());
        self
    }

    /// Append `($n, $n+1, ...)` for a row of values.
    pub fn push_bind_row<I>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.push("(");
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push_bind(value);
        }
        self.push(")")
    }

    pub fn push_table(&mut self, table: &TableName) -> &mut Self {
        self.push(&table.to_sql())
    }

    /// Append a quoted column name.
    pub fn push_column(&mut self, column: &str) -> DictResult<&mut Self> {
        let quoted = quote_column(column)?;
        Ok(self.push(&quoted))
    }

    /// Append `("a", "b", ...)`.
    pub fn push_column_list<'a>(
        &mut self,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> DictResult<&mut Self> {
        self.push("(");
        for (i, column) in columns.into_iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push_column(column)?;
        }
        Ok(self.push(")"))
    }

    /// Render SQL with `$1, $2, ...` placeholders.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        let mut idx: usize = 0;
        for part in &self.parts {
            match part {
                SqlPart::Raw(s) => out.push_str(s),
                SqlPart::Param => {
                    idx += 1;
                    let _ = write!(&mut out, "${idx}");
                }
            }
        }
        out
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }

}

/// Borrow values as `tokio-postgres` parameters.
pub fn params_ref(values: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

/// Cut `sql` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_sql(sql: &str, max: usize) -> std::borrow::Cow<'_, str> {
    if sql.len() <= max {
        return std::borrow::Cow::Borrowed(sql);
    }
    let mut end = max;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!("{}...", &sql[..end]))
}
