//! SQL identifier handling for table and column names.
//!
//! Table names come from configuration and may be schema-qualified
//! (`public.events`, `"Raw"."Events"`). Column names come from record keys,
//! which after flattening can contain dots or spaces, so they are always
//! rendered double-quoted.

use crate::error::{DictError, DictResult};

/// A validated, possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    parts: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Matches `[A-Za-z_][A-Za-z0-9_$]*`.
    Bare(String),
    Quoted(String),
}

impl TableName {
    /// Parse `table`, `schema.table` or quoted variants of either.
    pub fn parse(s: &str) -> DictResult<Self> {
        if s.trim().is_empty() {
            return Err(DictError::validation("table name cannot be empty"));
        }
        if s.contains('\0') {
            return Err(DictError::validation("table name cannot contain NUL"));
        }

        let mut parts = Vec::new();
        let mut rest = s;
        loop {
            let (segment, tail) = if let Some(quoted) = rest.strip_prefix('"') {
                split_quoted(quoted, s)?
            } else {
                split_bare(rest, s)?
            };
            parts.push(segment);

            match tail.strip_prefix('.') {
                Some("") => {
                    return Err(DictError::validation(format!(
                        "trailing '.' in table name '{s}'"
                    )));
                }
                Some(next) => rest = next,
                None if tail.is_empty() => break,
                None => {
                    return Err(DictError::validation(format!(
                        "unexpected characters in table name '{s}'"
                    )));
                }
            }
        }

        if parts.len() > 2 {
            return Err(DictError::validation(format!(
                "table name '{s}' has more than two parts"
            )));
        }
        Ok(Self { parts })
    }

    /// The unqualified table name, unquoted.
    pub fn name(&self) -> &str {
        match self.parts.last() {
            Some(Segment::Bare(s) | Segment::Quoted(s)) => s,
            None => "",
        }
    }

    /// The schema, if the name was qualified.
    pub fn schema(&self) -> Option<&str> {
        if self.parts.len() < 2 {
            return None;
        }
        match &self.parts[0] {
            Segment::Bare(s) | Segment::Quoted(s) => Some(s),
        }
    }

    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            match part {
                Segment::Bare(s) => out.push_str(s),
                Segment::Quoted(s) => push_quoted(&mut out, s),
            }
        }
        out
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_sql())
    }
}

fn split_bare<'a>(s: &'a str, whole: &str) -> DictResult<(Segment, &'a str)> {
    let end = s.find('.').unwrap_or(s.len());
    let name = &s[..end];
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric())
        }
        _ => false,
    };
    if !valid {
        return Err(DictError::validation(format!(
            "invalid table name '{whole}'"
        )));
    }
    Ok((Segment::Bare(name.to_string()), &s[end..]))
}

fn split_quoted<'a>(s: &'a str, whole: &str) -> DictResult<(Segment, &'a str)> {
    let mut name = String::new();
    let mut iter = s.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if c != '"' {
            name.push(c);
            continue;
        }
        if matches!(iter.peek(), Some((_, '"'))) {
            iter.next();
            name.push('"');
            continue;
        }
        if name.is_empty() {
            return Err(DictError::validation("empty quoted identifier"));
        }
        return Ok((Segment::Quoted(name), &s[i + 1..]));
    }
    Err(DictError::validation(format!(
        "unclosed quoted identifier in '{whole}'"
    )))
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
}

/// Check that a record key can be used as a column name.
pub fn validate_column(name: &str) -> DictResult<()> {
    if name.is_empty() {
        return Err(DictError::validation("column name cannot be empty"));
    }
    if name.contains('\0') {
        return Err(DictError::validation(format!(
            "column name '{}' contains NUL",
            name.escape_debug()
        )));
    }
    Ok(())
}

/// Render a column name as a quoted identifier.
pub fn quote_column(name: &str) -> DictResult<String> {
    validate_column(name)?;
    let mut out = String::with_capacity(name.len() + 2);
    push_quoted(&mut out, name);
    Ok(out)
}
