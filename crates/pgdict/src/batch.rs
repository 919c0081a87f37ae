//! Pending records awaiting one combined insert.

use std::collections::BTreeSet;

use crate::error::{DictError, DictResult};
use crate::record::Record;

/// An ordered sequence of records sharing one column set.
///
/// The first record pushed fixes the column set and its order; later records
/// must carry the same set of columns, in any order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    columns: Vec<String>,
    records: Vec<Record>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `record`, rejecting it when its columns differ from the batch's.
    ///
    /// A rejected record leaves the batch untouched.
    pub fn push(&mut self, record: Record) -> DictResult<()> {
        if self.records.is_empty() {
            self.columns = record.columns().map(str::to_string).collect();
            self.records.push(record);
            return Ok(());
        }

        let expected: BTreeSet<&str> = self.columns.iter().map(String::as_str).collect();
        if record.column_set() != expected || record.len() != self.columns.len() {
            return Err(DictError::BatchSchemaMismatch {
                expected: self.columns.clone(),
                found: record.columns().map(str::to_string).collect(),
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Column order established by the first record.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.columns.clear();
        self.records.clear();
    }

    /// Take every pending record, leaving the batch empty.
    pub fn take(&mut self) -> Vec<Record> {
        self.columns.clear();
        std::mem::take(&mut self.records)
    }
}
