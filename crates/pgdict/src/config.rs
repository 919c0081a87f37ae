//! File-based configuration.
//!
//! A single TOML file names the table, the database, the type-mapper tables
//! and connector options. String values may reference environment variables
//! as `${NAME}`.
//!
//! ```toml
//! version = "1"
//! table = "events"
//!
//! [database]
//! url = "${DATABASE_URL}"
//!
//! [types]
//! direct = { id = "bigint" }
//! suffix = { "_at" = "timestamp" }
//! typed = { int64 = "bigint", float64 = "double precision", object = "text" }
//!
//! [options]
//! sync_schema = true
//! id_column = "id"
//! flatten_keys = ["id", "name"]
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::connector::{ConnectorOptions, DEFAULT_MAX_ROWS_PER_STATEMENT, DictConnector};
use crate::error::{DictError, DictResult};
use crate::postgres::PgExecutor;
use crate::record::CompositeId;
use crate::type_mapper::{TypeMapper, TypeMapperConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub table: String,
    pub database: DatabaseConfig,
    pub types: TypeMapperConfig,
    #[serde(default)]
    pub options: OptionsConfig,
}

/// Either a full `url` or discrete connection fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionsConfig {
    #[serde(default)]
    pub sync_schema: bool,
    #[serde(default)]
    pub keep_nulls: bool,
    #[serde(default = "default_max_rows")]
    pub max_rows_per_statement: usize,
    #[serde(default)]
    pub composite_id: Option<CompositeId>,
    #[serde(default)]
    pub id_column: Option<String>,
    /// Keys for flattening arrays of objects in JSON input; unset keeps
    /// arrays whole.
    #[serde(default)]
    pub flatten_keys: Option<Vec<String>>,
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS_PER_STATEMENT
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            sync_schema: false,
            keep_nulls: false,
            max_rows_per_statement: default_max_rows(),
            composite_id: None,
            id_column: None,
            flatten_keys: None,
        }
    }
}

impl From<OptionsConfig> for ConnectorOptions {
    fn from(o: OptionsConfig) -> Self {
        ConnectorOptions {
            sync_schema: o.sync_schema,
            keep_nulls: o.keep_nulls,
            max_rows_per_statement: o.max_rows_per_statement,
            composite_id: o.composite_id,
            id_column: o.id_column,
        }
    }
}

impl ConfigFile {
    /// Read, expand and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> DictResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DictError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::parse(&raw).map_err(|e| match e {
            DictError::Config(msg) => {
                DictError::config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Parse, expand and validate config text.
    pub fn parse(raw: &str) -> DictResult<Self> {
        let mut file: ConfigFile = toml::from_str(raw)?;
        file.expand_env()?;
        file.validate()?;
        Ok(file)
    }

    pub fn type_mapper(&self) -> DictResult<TypeMapper> {
        TypeMapper::from_config(self.types.clone())
    }

    pub fn connector_options(&self) -> ConnectorOptions {
        self.options.clone().into()
    }

    /// Connect and build a connector for the configured table.
    pub fn connect(&self) -> DictResult<DictConnector<PgExecutor>> {
        let executor = PgExecutor::connect(&self.database.connection_string()?)?;
        DictConnector::with_options(
            &self.table,
            self.type_mapper()?,
            executor,
            self.connector_options(),
        )
    }

    fn expand_env(&mut self) -> DictResult<()> {
        self.table = expand_env_vars(&self.table)?;

        let db = &mut self.database;
        for field in [&mut db.url, &mut db.host, &mut db.dbname, &mut db.user, &mut db.password]
            .into_iter()
            .flatten()
        {
            *field = expand_env_vars(field)?;
        }

        let types = &mut self.types;
        for table in [&mut types.direct, &mut types.prefix, &mut types.suffix, &mut types.typed] {
            for v in table.values_mut() {
                *v = expand_env_vars(v)?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> DictResult<()> {
        if self.version.trim() != "1" {
            return Err(DictError::config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        if self.table.trim().is_empty() {
            return Err(DictError::config("table must not be empty"));
        }
        if self.database.url.is_none() && self.database.host.is_none() {
            return Err(DictError::config("database needs either `url` or `host`"));
        }
        if self.options.max_rows_per_statement == 0 {
            return Err(DictError::config("options.max_rows_per_statement must be at least 1"));
        }
        if self.options.id_column.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(DictError::config("options.id_column must not be empty"));
        }
        // Surface bad typed tags at load time rather than on first use.
        self.type_mapper()?;
        Ok(())
    }
}

impl DatabaseConfig {
    /// The `url` as-is, or the discrete fields as a key/value string.
    pub fn connection_string(&self) -> DictResult<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let Some(host) = &self.host else {
            return Err(DictError::config("database needs either `url` or `host`"));
        };

        let mut parts = vec![format!("host={}", quote_value(host))];
        if let Some(port) = self.port {
            parts.push(format!("port={port}"));
        }
        let fields = [
            ("dbname", &self.dbname),
            ("user", &self.user),
            ("password", &self.password),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                parts.push(format!("{key}={}", quote_value(value)));
            }
        }
        Ok(parts.join(" "))
    }
}

/// Quote a key/value connection parameter when it needs it.
fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

fn expand_env_vars(input: &str) -> DictResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            out.push(c);
            continue;
        }
        chars.next();

        let mut key = String::new();
        let mut closed = false;
        for ch in chars.by_ref() {
            if ch == '}' {
                closed = true;
                break;
            }
            key.push(ch);
        }
        if !closed {
            return Err(DictError::config(format!(
                "unterminated env var reference: ${{{key}}}"
            )));
        }
        if key.is_empty() {
            return Err(DictError::config("invalid env var reference: ${}"));
        }
        let value = std::env::var(&key).map_err(|_| {
            DictError::config(format!("missing env var for config expansion: {key}"))
        })?;
        out.push_str(&value);
    }

    Ok(out)
}
