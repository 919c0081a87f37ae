use crate::cli::ResolveArgs;
use pgdict::{ConfigFile, Rule, TypeMapper, Value};

pub fn run(args: ResolveArgs) -> anyhow::Result<()> {
    let config = ConfigFile::load(&args.config)?;
    let mapper = config.type_mapper()?;
    let (rule, sql_type) = resolve(&mapper, &args.column, args.value.as_deref())?;
    tracing::debug!(target: "pgdict", column = %args.column, ?rule, "resolved");
    println!("{sql_type}");
    Ok(())
}

/// Resolve `column`, parsing `raw` as JSON when given.
///
/// A value that isn't valid JSON is taken as a plain string, so
/// `resolve note hello` works without shell-quoting `"hello"`.
fn resolve<'m>(
    mapper: &'m TypeMapper,
    column: &str,
    raw: Option<&str>,
) -> anyhow::Result<(Rule, &'m str)> {
    let tag = raw.map(|raw| {
        serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from)
            .unwrap_or_else(|_| Value::Text(raw.to_string()))
            .tag()
    });
    mapper.try_resolve(column, tag).ok_or_else(|| match tag {
        Some(tag) => anyhow::anyhow!("no type rule matches column {column:?} with a {tag} value"),
        None => anyhow::anyhow!(
            "no name rule matches column {column:?}; pass a JSON_VALUE to use the typed fallback"
        ),
    })
}
