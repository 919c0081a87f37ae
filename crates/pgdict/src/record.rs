//! Dictionary-like records.
//!
//! A [`Record`] is one row: column names mapped to [`Value`]s, in insertion
//! order. Records are usually built with [`record!`](crate::record!) or from
//! JSON objects via [`Record::from_json`], which flattens nested objects into
//! dotted column names. [`Record::from_json_keyed`] also flattens arrays of
//! objects, keying each element by one of its fields.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::error::{DictError, DictResult};
use crate::value::Value;

/// Separator used when flattening nested JSON objects.
pub const FLATTEN_SEPARATOR: char = '.';

/// An ordered mapping of column name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

/// Build a [`Record`] from `column => value` pairs.
///
/// ```
/// let row = pgdict::record! { "id" => 1, "name" => "alice" };
/// assert_eq!(row.columns().collect::<Vec<_>>(), ["id", "name"]);
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::Record::new() };
    ($($col:expr => $val:expr),+ $(,)?) => {{
        let mut __pgdict_record = $crate::Record::new();
        $( __pgdict_record.insert($col, $val); )+
        __pgdict_record
    }};
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing an existing value in place.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
        self
    }

    /// Chainable form of [`Record::insert`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(c, _)| c == column)?;
        Some(self.fields.remove(pos).1)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Column names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Column names as an order-insensitive set.
    pub fn column_set(&self) -> BTreeSet<&str> {
        self.columns().collect()
    }

    /// Drop every column whose value is null.
    pub fn without_nulls(mut self) -> Self {
        self.fields.retain(|(_, v)| !v.is_null());
        self
    }

    /// Build a record from a JSON object, flattening nested objects.
    ///
    /// `{"a": 1, "b": {"c": 2}}` becomes columns `a` and `b.c`. Arrays are
    /// kept whole as JSON values.
    pub fn from_json(value: serde_json::Value) -> DictResult<Self> {
        Self::flatten(value, None)
    }

    /// Like [`Record::from_json`], but arrays of objects are flattened too.
    ///
    /// The first of `keys` present in an array's first object keys every
    /// element: with key `k`, `{"b": [{"k": 2, "val": 0}, {"k": 1, "val": 2}]}`
    /// becomes columns `b.2.val` and `b.1.val`. An array of objects holding
    /// none of `keys` is stored as its JSON text. Other arrays stay JSON.
    pub fn from_json_keyed<S: AsRef<str>>(
        value: serde_json::Value,
        keys: &[S],
    ) -> DictResult<Self> {
        let keys: Vec<&str> = keys.iter().map(AsRef::as_ref).collect();
        Self::flatten(value, Some(&keys))
    }

    /// Parse one JSON document into a record.
    pub fn from_json_str(s: &str) -> DictResult<Self> {
        let value: serde_json::Value = serde_json::from_str(s)
            .map_err(|e| DictError::validation(format!("invalid JSON record: {e}")))?;
        Self::from_json(value)
    }

    fn flatten(value: serde_json::Value, keys: Option<&[&str]>) -> DictResult<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(DictError::validation(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        };

        let mut record = Record::new();
        flatten_into(&mut record, None, map, keys)?;
        Ok(record)
    }
}

fn flatten_into(
    record: &mut Record,
    prefix: Option<&str>,
    map: serde_json::Map<String, serde_json::Value>,
    keys: Option<&[&str]>,
) -> DictResult<()> {
    for (key, value) in map {
        let column = match prefix {
            Some(p) => format!("{p}{FLATTEN_SEPARATOR}{key}"),
            None => key,
        };
        flatten_value(record, column, value, keys)?;
    }
    Ok(())
}

fn flatten_value(
    record: &mut Record,
    column: String,
    value: serde_json::Value,
    keys: Option<&[&str]>,
) -> DictResult<()> {
    match (value, keys) {
        (serde_json::Value::Object(inner), _) if !inner.is_empty() => {
            flatten_into(record, Some(&column), inner, keys)
        }
        (serde_json::Value::Array(items), Some(keys)) => {
            flatten_array(record, column, items, keys)
        }
        (other, _) => {
            record.insert(column, Value::from_json(other));
            Ok(())
        }
    }
}

fn flatten_array(
    record: &mut Record,
    column: String,
    items: Vec<serde_json::Value>,
    keys: &[&str],
) -> DictResult<()> {
    let first = items.first().and_then(serde_json::Value::as_object);
    let Some(first) = first else {
        record.insert(column, Value::Json(serde_json::Value::Array(items)));
        return Ok(());
    };
    let Some(key) = keys.iter().copied().find(|k| first.contains_key(*k)) else {
        let text = serde_json::Value::Array(items).to_string();
        record.insert(column, Value::Text(text));
        return Ok(());
    };

    for item in items {
        let mut element = match item {
            serde_json::Value::Object(element) => element,
            other => {
                return Err(DictError::validation(format!(
                    "array '{column}' mixes objects with {}",
                    json_kind(&other)
                )));
            }
        };
        let id = match element.remove(key).map(Value::from_json) {
            Some(id) if !id.is_null() => id,
            _ => {
                return Err(DictError::validation(format!(
                    "element of array '{column}' has no value for key '{key}'"
                )));
            }
        };
        let nested = format!("{column}{FLATTEN_SEPARATOR}{id}");
        flatten_value(record, nested, serde_json::Value::Object(element), Some(keys))?;
    }
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

fn default_separator() -> String {
    "+".to_string()
}

/// A synthetic key column built by joining other columns' values.
///
/// With `name = "key"`, `keys = ["region", "id"]` and the default `+`
/// separator, `{"region": "eu", "id": 7}` gains `"key": "eu+7"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompositeId {
    pub name: String,
    pub keys: Vec<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl CompositeId {
    pub fn new(name: impl Into<String>, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            separator: default_separator(),
        }
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Compute the composite value for `record`.
    pub fn value_for(&self, record: &Record) -> DictResult<String> {
        let mut parts = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let value = record.get(key).ok_or_else(|| {
                DictError::validation(format!(
                    "composite id '{}' needs column '{key}', which the record lacks",
                    self.name
                ))
            })?;
            parts.push(value.to_string());
        }
        Ok(parts.join(&self.separator))
    }

    /// Add (or overwrite) the composite column on `record`.
    pub fn apply(&self, record: &mut Record) -> DictResult<()> {
        let value = self.value_for(record)?;
        record.insert(self.name.clone(), value);
        Ok(())
    }
}
