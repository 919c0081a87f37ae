//! The execution capability a connector writes through.

use crate::error::{DictError, DictResult};
use crate::ident::TableName;
use crate::value::Value;

/// An open database session that can run parameterized statements.
///
/// Calls are synchronous: each returns once the database has answered.
/// Executors without explicit transactions can keep the default
/// [`begin`](Executor::begin) / [`rollback`](Executor::rollback).
pub trait Executor {
    /// Run one statement and return the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> DictResult<u64>;

    /// Make everything executed so far durable.
    fn commit(&mut self) -> DictResult<()>;

    /// Start a transaction spanning the following statements.
    fn begin(&mut self) -> DictResult<()> {
        Ok(())
    }

    /// Abandon the transaction started by [`Executor::begin`].
    fn rollback(&mut self) -> DictResult<()> {
        Ok(())
    }

    /// Column names of `table` in ordinal order, or `None` if it doesn't exist.
    fn table_columns(&mut self, table: &TableName) -> DictResult<Option<Vec<String>>> {
        Err(DictError::Unsupported(format!(
            "schema introspection of {table}"
        )))
    }
}

impl<E: Executor + ?Sized> Executor for &mut E {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DictResult<u64> {
        (**self).execute(sql, params)
    }

    fn commit(&mut self) -> DictResult<()> {
        (**self).commit()
    }

    fn begin(&mut self) -> DictResult<()> {
        (**self).begin()
    }

    fn rollback(&mut self) -> DictResult<()> {
        (**self).rollback()
    }

    fn table_columns(&mut self, table: &TableName) -> DictResult<Option<Vec<String>>> {
        (**self).table_columns(table)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DictResult<u64> {
        (**self).execute(sql, params)
    }

    fn commit(&mut self) -> DictResult<()> {
        (**self).commit()
    }

    fn begin(&mut self) -> DictResult<()> {
        (**self).begin()
    }

    fn rollback(&mut self) -> DictResult<()> {
        (**self).rollback()
    }

    fn table_columns(&mut self, table: &TableName) -> DictResult<Option<Vec<String>>> {
        (**self).table_columns(table)
    }
}
