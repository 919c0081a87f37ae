//! Column type resolution.
//!
//! A [`TypeMapper`] decides which SQL type a column gets, consulting four rule
//! tables in a fixed order:
//!
//! 1. `direct`: exact column name
//! 2. `prefix`: column name starts with the key (longest key wins)
//! 3. `suffix`: column name ends with the key (longest key wins)
//! 4. `typed`: the [`ValueTag`] of a sample value
//!
//! The first table with a match decides. Nothing matching is an
//! [`DictError::UnresolvedType`].
//!
//! # Example
//!
//! ```
//! use pgdict::{TypeMapper, Value, ValueTag};
//!
//! let mapper = TypeMapper::builder()
//!     .direct("id", "bigint")
//!     .prefix("is_", "boolean")
//!     .suffix("_at", "timestamp")
//!     .typed(ValueTag::Float64, "double precision")
//!     .typed(ValueTag::Object, "text")
//!     .build();
//!
//! assert_eq!(mapper.resolve("created_at", &Value::Null)?, "timestamp");
//! assert_eq!(mapper.resolve("ratio", &Value::from(0.5))?, "double precision");
//! assert!(mapper.resolve("count", &Value::from(3)).is_err());
//! # Ok::<(), pgdict::DictError>(())
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{DictError, DictResult};
use crate::value::{Value, ValueTag};

/// The four immutable rule tables.
#[derive(Debug, Default, PartialEq, Eq)]
struct Rules {
    direct: BTreeMap<String, String>,
    prefix: BTreeMap<String, String>,
    suffix: BTreeMap<String, String>,
    typed: BTreeMap<ValueTag, String>,
}

/// One stage of the resolution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Direct,
    Prefix,
    Suffix,
    Typed,
}

impl Rule {
    /// Stages in priority order.
    pub const CHAIN: [Rule; 4] = [Rule::Direct, Rule::Prefix, Rule::Suffix, Rule::Typed];

    fn apply<'a>(self, rules: &'a Rules, column: &str, tag: Option<ValueTag>) -> Option<&'a str> {
        match self {
            Rule::Direct => rules.direct.get(column).map(String::as_str),
            Rule::Prefix => longest_match(&rules.prefix, |key| column.starts_with(key)),
            Rule::Suffix => longest_match(&rules.suffix, |key| column.ends_with(key)),
            Rule::Typed => tag.and_then(|t| rules.typed.get(&t)).map(String::as_str),
        }
    }
}

/// Pick the longest key accepted by `matches`.
///
/// Two distinct keys of the same length can't both be a prefix (or both a
/// suffix) of one name, so the result never depends on table order.
fn longest_match<'a>(
    table: &'a BTreeMap<String, String>,
    matches: impl Fn(&str) -> bool,
) -> Option<&'a str> {
    table
        .iter()
        .filter(|(key, _)| matches(key))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, sql_type)| sql_type.as_str())
}

/// Maps column names and value types to SQL type names.
///
/// Clones share the same rule tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMapper {
    rules: Arc<Rules>,
}

impl TypeMapper {
    /// Create a mapper from explicit tables.
    pub fn new(
        direct: BTreeMap<String, String>,
        prefix: BTreeMap<String, String>,
        suffix: BTreeMap<String, String>,
        typed: BTreeMap<ValueTag, String>,
    ) -> Self {
        Self {
            rules: Arc::new(Rules {
                direct,
                prefix,
                suffix,
                typed,
            }),
        }
    }

    /// Create a mapper that only knows exact column names.
    pub fn direct_only(direct: BTreeMap<String, String>) -> Self {
        Self::new(direct, BTreeMap::new(), BTreeMap::new(), BTreeMap::new())
    }

    pub fn builder() -> TypeMapperBuilder {
        TypeMapperBuilder::default()
    }

    /// Build a mapper from its configuration form, validating `typed` tags.
    pub fn from_config(config: TypeMapperConfig) -> DictResult<Self> {
        let mut typed = BTreeMap::new();
        for (tag, sql_type) in config.typed {
            typed.insert(tag.parse::<ValueTag>()?, sql_type);
        }
        let mapper = Self::new(config.direct, config.prefix, config.suffix, typed);
        mapper.validate()?;
        Ok(mapper)
    }

    fn validate(&self) -> DictResult<()> {
        let tables = [
            ("direct", &self.rules.direct),
            ("prefix", &self.rules.prefix),
            ("suffix", &self.rules.suffix),
        ];
        for (name, table) in tables {
            for (key, sql_type) in table {
                if key.is_empty() {
                    return Err(DictError::config(format!("empty key in `{name}` table")));
                }
                if sql_type.trim().is_empty() {
                    return Err(DictError::config(format!(
                        "empty SQL type for `{name}` key '{key}'"
                    )));
                }
            }
        }
        for (tag, sql_type) in &self.rules.typed {
            if sql_type.trim().is_empty() {
                return Err(DictError::config(format!(
                    "empty SQL type for `typed` key '{tag}'"
                )));
            }
        }
        Ok(())
    }

    /// Resolve the SQL type for `column`, using `value` for the typed fallback.
    pub fn resolve(&self, column: &str, value: &Value) -> DictResult<&str> {
        self.resolve_tag(column, Some(value.tag()))
    }

    /// Resolve by name, and by `tag` when one is given.
    pub fn resolve_tag(&self, column: &str, tag: Option<ValueTag>) -> DictResult<&str> {
        self.try_resolve(column, tag)
            .map(|(_, sql_type)| sql_type)
            .ok_or_else(|| DictError::unresolved(column))
    }

    /// Resolve without erroring, also reporting which stage matched.
    pub fn try_resolve(&self, column: &str, tag: Option<ValueTag>) -> Option<(Rule, &str)> {
        Rule::CHAIN
            .iter()
            .find_map(|rule| rule.apply(&self.rules, column, tag).map(|t| (*rule, t)))
    }

    pub fn direct(&self) -> &BTreeMap<String, String> {
        &self.rules.direct
    }

    pub fn prefix(&self) -> &BTreeMap<String, String> {
        &self.rules.prefix
    }

    pub fn suffix(&self) -> &BTreeMap<String, String> {
        &self.rules.suffix
    }

    pub fn typed(&self) -> &BTreeMap<ValueTag, String> {
        &self.rules.typed
    }
}

/// Incremental construction of a [`TypeMapper`].
#[derive(Debug, Default)]
#[must_use]
pub struct TypeMapperBuilder {
    rules: Rules,
}

impl TypeMapperBuilder {
    pub fn direct(mut self, column: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.rules.direct.insert(column.into(), sql_type.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.rules.prefix.insert(prefix.into(), sql_type.into());
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.rules.suffix.insert(suffix.into(), sql_type.into());
        self
    }

    pub fn typed(mut self, tag: ValueTag, sql_type: impl Into<String>) -> Self {
        self.rules.typed.insert(tag, sql_type.into());
        self
    }

    pub fn build(self) -> TypeMapper {
        TypeMapper {
            rules: Arc::new(self.rules),
        }
    }
}

/// Configuration form of a [`TypeMapper`] (`[types]` in the config file).
///
/// Only `direct` is required; `typed` keys are tag names such as `int64`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TypeMapperConfig {
    pub direct: BTreeMap<String, String>,
    #[serde(default)]
    pub prefix: BTreeMap<String, String>,
    #[serde(default)]
    pub suffix: BTreeMap<String, String>,
    #[serde(default)]
    pub typed: BTreeMap<String, String>,
}

impl TryFrom<TypeMapperConfig> for TypeMapper {
    type Error = DictError;

    fn try_from(config: TypeMapperConfig) -> DictResult<Self> {
        TypeMapper::from_config(config)
    }
}
