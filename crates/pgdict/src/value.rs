//! Record values and their type tags.
//!
//! [`Value`] is the closed set of scalar shapes a record column can hold.
//! [`ValueTag`] is the coarse, pandas-style classification used by the
//! `typed` table of a [`TypeMapper`](crate::TypeMapper): every value maps to
//! exactly one tag through [`Value::tag`].

use bit_vec::BitVec;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use tokio_postgres::types::{IsNull, ToSql, Type};

use crate::error::DictError;

/// A single column value of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    /// Arrays and nested objects that were not flattened.
    Json(serde_json::Value),
}

/// Value-type tag used for the `typed` fallback.
///
/// Names follow pandas dtype strings so existing rule tables keep working:
/// `int64`, `float64`, `bool`, `datetime64[ns]` and `object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueTag {
    Int64,
    Float64,
    Bool,
    Datetime,
    Object,
}

impl ValueTag {
    /// All tags, in declaration order.
    pub const ALL: [ValueTag; 5] = [
        ValueTag::Int64,
        ValueTag::Float64,
        ValueTag::Bool,
        ValueTag::Datetime,
        ValueTag::Object,
    ];

    /// Canonical tag name.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueTag::Int64 => "int64",
            ValueTag::Float64 => "float64",
            ValueTag::Bool => "bool",
            ValueTag::Datetime => "datetime64[ns]",
            ValueTag::Object => "object",
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueTag {
    type Err = DictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "int64" => Ok(ValueTag::Int64),
            "float64" => Ok(ValueTag::Float64),
            "bool" => Ok(ValueTag::Bool),
            "datetime64[ns]" | "datetime" => Ok(ValueTag::Datetime),
            "object" => Ok(ValueTag::Object),
            other => Err(DictError::config(format!(
                "unknown value type tag '{other}' (expected one of int64, float64, bool, datetime64[ns], object)"
            ))),
        }
    }
}

impl Value {
    /// Classify this value into its type tag.
    ///
    /// Nulls, strings and nested JSON are all `object`, the same as a pandas
    /// column holding a single such value.
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Int(_) => ValueTag::Int64,
            Value::Float(_) => ValueTag::Float64,
            Value::Bool(_) => ValueTag::Bool,
            Value::Timestamp(_) => ValueTag::Datetime,
            Value::Null | Value::Text(_) | Value::Json(_) => ValueTag::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a JSON value without flattening.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map_or(Value::Null, Value::Float),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            Value::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

fn is_textual(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn is_bit(ty: &Type) -> bool {
    matches!(*ty, Type::BIT | Type::VARBIT)
}

fn mismatch(value: &Value, ty: &Type) -> Box<dyn Error + Sync + Send> {
    format!("cannot bind {} value to column of type {}", value.tag(), ty).into()
}

fn unparsable(text: &str, ty: &Type) -> Box<dyn Error + Sync + Send> {
    format!("cannot parse {text:?} as {ty}").into()
}

fn parse_text<T: FromStr>(text: &str, ty: &Type) -> Result<T, Box<dyn Error + Sync + Send>> {
    text.trim().parse().map_err(|_| unparsable(text, ty))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

const TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parses a timestamp without offset. A bare date means midnight; an RFC 3339
/// value is converted to UTC.
fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|v| v.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_timestamptz(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|v| v.with_timezone(&Utc))
        .or_else(|| parse_timestamp(text).map(|v| v.and_utc()))
}

/// Accepts `0`/`1` digit strings as well as boolean words for a single bit.
fn parse_bits(text: &str) -> Option<BitVec> {
    let text = text.trim();
    if !text.is_empty() && text.bytes().all(|b| b == b'0' || b == b'1') {
        return Some(text.bytes().map(|b| b == b'1').collect());
    }
    parse_bool(text).map(|b| BitVec::from_elem(1, b))
}

fn float_to_decimal(v: f64, ty: &Type) -> Result<Decimal, Box<dyn Error + Sync + Send>> {
    Decimal::try_from(v).map_err(|_| format!("cannot represent {v} as {ty}").into())
}

impl Value {
    // Empty text binds as NULL into non-textual columns, like a missing value.
    fn text_to_sql(
        &self,
        text: &str,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        if is_textual(ty) {
            return text.to_sql(ty, out);
        }
        if text.trim().is_empty() && !matches!(*ty, Type::JSON | Type::JSONB) {
            return Ok(IsNull::Yes);
        }
        match *ty {
            Type::JSON | Type::JSONB => serde_json::Value::from(text).to_sql(ty, out),
            Type::INT2 => parse_text::<i16>(text, ty)?.to_sql(ty, out),
            Type::INT4 => parse_text::<i32>(text, ty)?.to_sql(ty, out),
            Type::INT8 => parse_text::<i64>(text, ty)?.to_sql(ty, out),
            Type::FLOAT4 => parse_text::<f32>(text, ty)?.to_sql(ty, out),
            Type::FLOAT8 => parse_text::<f64>(text, ty)?.to_sql(ty, out),
            Type::NUMERIC => parse_text::<Decimal>(text, ty)?.to_sql(ty, out),
            Type::BOOL => parse_bool(text)
                .ok_or_else(|| unparsable(text, ty))?
                .to_sql(ty, out),
            Type::TIMESTAMP => parse_timestamp(text)
                .ok_or_else(|| unparsable(text, ty))?
                .to_sql(ty, out),
            Type::TIMESTAMPTZ => parse_timestamptz(text)
                .ok_or_else(|| unparsable(text, ty))?
                .to_sql(ty, out),
            Type::DATE => parse_timestamp(text)
                .ok_or_else(|| unparsable(text, ty))?
                .date()
                .to_sql(ty, out),
            _ if is_bit(ty) => parse_bits(text)
                .ok_or_else(|| unparsable(text, ty))?
                .to_sql(ty, out),
            _ => Err(mismatch(self, ty)),
        }
    }
}

// Postgres infers parameter types from the target columns, so each variant
// adapts to the column type it is bound against.
impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => match *ty {
                Type::BOOL => v.to_sql(ty, out),
                Type::INT2 => i16::from(*v).to_sql(ty, out),
                Type::INT4 => i32::from(*v).to_sql(ty, out),
                Type::INT8 => i64::from(*v).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(u8::from(*v)).to_sql(ty, out),
                _ if is_bit(ty) => BitVec::from_elem(1, *v).to_sql(ty, out),
                _ if is_textual(ty) => v.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Int(v) => match *ty {
                Type::INT8 => v.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*v).to_sql(ty, out),
                Type::BOOL => (*v != 0).to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::from(*v).to_sql(ty, out),
                _ if is_bit(ty) => match *v {
                    0 | 1 => BitVec::from_elem(1, *v == 1).to_sql(ty, out),
                    _ => Err(format!("cannot bind {v} to column of type {ty}").into()),
                },
                _ if is_textual(ty) => v.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT8 => v.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::NUMERIC => float_to_decimal(*v, ty)?.to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::from(*v).to_sql(ty, out),
                _ if is_textual(ty) => v.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Text(v) => self.text_to_sql(v, ty, out),
            Value::Timestamp(v) => match *ty {
                Type::TIMESTAMP => v.to_sql(ty, out),
                Type::TIMESTAMPTZ => v.and_utc().to_sql(ty, out),
                Type::DATE => v.date().to_sql(ty, out),
                _ if is_textual(ty) => self.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Json(v) => match *ty {
                Type::JSON | Type::JSONB => v.to_sql(ty, out),
                _ if is_textual(ty) => v.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tags_follow_pandas_dtypes() {
        assert_eq!(Value::from(5).tag(), ValueTag::Int64);
        assert_eq!(Value::from(1.5).tag(), ValueTag::Float64);
        assert_eq!(Value::from(true).tag(), ValueTag::Bool);
        assert_eq!(Value::from("x").tag(), ValueTag::Object);
        assert_eq!(Value::Null.tag(), ValueTag::Object);
        assert_eq!(Value::from(json!([1, 2])).tag(), ValueTag::Object);
    }

    #[test]
    fn tag_names_round_trip() {
        for tag in ValueTag::ALL {
            assert_eq!(tag.as_str().parse::<ValueTag>().unwrap(), tag);
        }
        assert_eq!("datetime".parse::<ValueTag>().unwrap(), ValueTag::Datetime);
        assert!("int32".parse::<ValueTag>().is_err());
    }

    #[test]
    fn json_numbers_split_into_int_and_float() {
        assert_eq!(Value::from(json!(3)), Value::Int(3));
        assert_eq!(Value::from(json!(3.25)), Value::Float(3.25));
        assert_eq!(Value::from(json!(u64::MAX)), Value::Float(u64::MAX as f64));
    }

    #[test]
    fn binds_int_into_narrower_columns() {
        let mut buf = BytesMut::new();
        assert!(Value::Int(7).to_sql(&Type::INT4, &mut buf).is_ok());
        assert_eq!(&buf[..], &7_i32.to_be_bytes());

        let mut buf = BytesMut::new();
        assert!(Value::Int(i64::MAX).to_sql(&Type::INT4, &mut buf).is_err());
    }

    #[test]
    fn null_binds_as_sql_null() {
        let mut buf = BytesMut::new();
        let is_null = Value::Null.to_sql(&Type::INT8, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }

    #[test]
    fn rejects_float_into_bool() {
        let mut buf = BytesMut::new();
        assert!(Value::Float(1.0).to_sql(&Type::BOOL, &mut buf).is_err());
    }

    fn bind(value: Value, ty: &Type) -> Result<BytesMut, Box<dyn Error + Sync + Send>> {
        let mut buf = BytesMut::new();
        value.to_sql(ty, &mut buf)?;
        Ok(buf)
    }

    fn encoded<T: ToSql>(v: T, ty: &Type) -> BytesMut {
        let mut buf = BytesMut::new();
        v.to_sql(ty, &mut buf).unwrap();
        buf
    }

    #[test]
    fn text_parses_into_integer_columns() {
        assert_eq!(
            bind(Value::from("2024"), &Type::INT4).unwrap(),
            encoded(2024_i32, &Type::INT4)
        );
        assert_eq!(
            bind(Value::from(" -7 "), &Type::INT2).unwrap(),
            encoded(-7_i16, &Type::INT2)
        );
        assert_eq!(
            bind(Value::from("9000000000"), &Type::INT8).unwrap(),
            encoded(9_000_000_000_i64, &Type::INT8)
        );
        assert!(bind(Value::from("12abc"), &Type::INT4).is_err());
        assert!(bind(Value::from("70000"), &Type::INT2).is_err());
    }

    #[test]
    fn text_parses_into_float_columns() {
        assert_eq!(
            bind(Value::from("1.5"), &Type::FLOAT8).unwrap(),
            encoded(1.5_f64, &Type::FLOAT8)
        );
        assert_eq!(
            bind(Value::from("0.25"), &Type::FLOAT4).unwrap(),
            encoded(0.25_f32, &Type::FLOAT4)
        );
        assert!(bind(Value::from("one"), &Type::FLOAT8).is_err());
    }

    #[test]
    fn text_parses_into_bool_columns() {
        assert_eq!(
            bind(Value::from("true"), &Type::BOOL).unwrap(),
            encoded(true, &Type::BOOL)
        );
        assert_eq!(
            bind(Value::from("F"), &Type::BOOL).unwrap(),
            encoded(false, &Type::BOOL)
        );
        assert!(bind(Value::from("maybe"), &Type::BOOL).is_err());
    }

    #[test]
    fn text_parses_into_timestamp_columns() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        assert_eq!(
            bind(Value::from("2024-01-01 00:00:00"), &Type::TIMESTAMP).unwrap(),
            encoded(ts, &Type::TIMESTAMP)
        );
        assert_eq!(
            bind(Value::from("2024-01-01T00:00:00"), &Type::TIMESTAMP).unwrap(),
            encoded(ts, &Type::TIMESTAMP)
        );
        assert_eq!(
            bind(Value::from("2024-01-01T02:00:00+02:00"), &Type::TIMESTAMPTZ).unwrap(),
            encoded(ts.and_utc(), &Type::TIMESTAMPTZ)
        );
        assert_eq!(
            bind(Value::from("2024-01-01"), &Type::DATE).unwrap(),
            encoded(ts.date(), &Type::DATE)
        );
        assert!(bind(Value::from("yesterday"), &Type::TIMESTAMP).is_err());
        assert!(bind(Value::from("2024-13-01"), &Type::DATE).is_err());
    }

    #[test]
    fn text_parses_into_numeric_and_bit_columns() {
        assert_eq!(
            bind(Value::from("12.50"), &Type::NUMERIC).unwrap(),
            encoded(Decimal::new(1250, 2), &Type::NUMERIC)
        );
        assert_eq!(
            bind(Value::from("101"), &Type::VARBIT).unwrap(),
            encoded(BitVec::from_iter([true, false, true]), &Type::VARBIT)
        );
        assert!(bind(Value::from("1.2.3"), &Type::NUMERIC).is_err());
        assert!(bind(Value::from("12"), &Type::BIT).is_err());
    }

    #[test]
    fn empty_text_binds_null_into_typed_columns() {
        let mut buf = BytesMut::new();
        let is_null = Value::from("").to_sql(&Type::INT4, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert_eq!(bind(Value::from(""), &Type::TEXT).unwrap(), encoded("", &Type::TEXT));
    }

    #[test]
    fn text_rejects_unsupported_column_types() {
        assert!(bind(Value::from("abc"), &Type::BYTEA).is_err());
        assert!(bind(Value::from("abc"), &Type::UUID).is_err());
    }

    #[test]
    fn numbers_bind_into_numeric_columns() {
        assert_eq!(
            bind(Value::Int(42), &Type::NUMERIC).unwrap(),
            encoded(Decimal::from(42), &Type::NUMERIC)
        );
        assert_eq!(
            bind(Value::Float(0.5), &Type::NUMERIC).unwrap(),
            encoded(Decimal::try_from(0.5).unwrap(), &Type::NUMERIC)
        );
        assert!(bind(Value::Float(f64::NAN), &Type::NUMERIC).is_err());
    }

    #[test]
    fn bools_bind_into_bit_columns() {
        assert_eq!(
            bind(Value::Bool(true), &Type::BIT).unwrap(),
            encoded(BitVec::from_elem(1, true), &Type::BIT)
        );
        assert_eq!(
            bind(Value::Int(0), &Type::BIT).unwrap(),
            encoded(BitVec::from_elem(1, false), &Type::BIT)
        );
        assert!(bind(Value::Int(2), &Type::BIT).is_err());
    }
}
