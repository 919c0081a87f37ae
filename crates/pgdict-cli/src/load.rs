use crate::cli::LoadArgs;
use pgdict::{
    ConfigFile, DictConnector, DictError, DictResult, Executor, Record, TableName, Value,
};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub fn run(args: LoadArgs) -> anyhow::Result<()> {
    let config = ConfigFile::load(&args.config)?;
    let flatten_keys = config.options.flatten_keys.as_deref();

    let stats = if args.dry_run {
        let mut conn = DictConnector::with_options(
            &config.table,
            config.type_mapper()?,
            DryRunExecutor::new(std::io::stdout().lock()),
            config.connector_options(),
        )?;
        load_files(&mut conn, &args.files, args.batch_size, flatten_keys)?
    } else {
        let mut conn = config.connect()?;
        load_files(&mut conn, &args.files, args.batch_size, flatten_keys)?
    };

    tracing::info!(
        target: "pgdict",
        table = %config.table,
        records = stats.records,
        batches = stats.batches,
        dry_run = args.dry_run,
        "load finished"
    );
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub records: usize,
    pub batches: usize,
}

fn load_files<E: Executor>(
    conn: &mut DictConnector<E>,
    files: &[PathBuf],
    batch_size: usize,
    flatten_keys: Option<&[String]>,
) -> anyhow::Result<LoadStats> {
    let mut stats = LoadStats::default();
    for path in files {
        if path == Path::new("-") {
            let stdin = std::io::stdin();
            load_lines(conn, stdin.lock(), "<stdin>", batch_size, flatten_keys, &mut stats)?;
        } else {
            let file = std::fs::File::open(path)
                .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", path.display()))?;
            let name = path.display().to_string();
            let reader = BufReader::new(file);
            load_lines(conn, reader, &name, batch_size, flatten_keys, &mut stats)?;
        }
    }
    flush(conn, &mut stats)?;
    Ok(stats)
}

/// Queue each JSON line, flushing whenever `batch_size` records are pending.
///
/// A record whose columns differ from the pending batch flushes the batch
/// first and starts a new one. With `flatten_keys` arrays of objects are
/// flattened by key.
fn load_lines<E: Executor>(
    conn: &mut DictConnector<E>,
    reader: impl BufRead,
    source: &str,
    batch_size: usize,
    flatten_keys: Option<&[String]>,
    stats: &mut LoadStats,
) -> anyhow::Result<()> {
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| anyhow::anyhow!("{source}: read error: {e}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(&line, flatten_keys)
            .map_err(|e| anyhow::anyhow!("{source}:{}: {e}", idx + 1))?;

        if let Err(e) = conn.append_to_batch(record.clone()) {
            if !e.is_schema_mismatch() {
                return Err(anyhow::anyhow!("{source}:{}: {e}", idx + 1));
            }
            flush(conn, stats)?;
            conn.append_to_batch(record)
                .map_err(|e| anyhow::anyhow!("{source}:{}: {e}", idx + 1))?;
        }
        stats.records += 1;

        if conn.pending() >= batch_size {
            flush(conn, stats)?;
        }
    }
    Ok(())
}

fn parse_record(line: &str, flatten_keys: Option<&[String]>) -> DictResult<Record> {
    match flatten_keys {
        None => Record::from_json_str(line),
        Some(keys) => {
            let value: serde_json::Value = serde_json::from_str(line)
                .map_err(|e| DictError::validation(format!("invalid JSON record: {e}")))?;
            Record::from_json_keyed(value, keys)
        }
    }
}

fn flush<E: Executor>(conn: &mut DictConnector<E>, stats: &mut LoadStats) -> anyhow::Result<()> {
    if conn.pending() == 0 {
        return Ok(());
    }
    conn.execute_batch()?;
    stats.batches += 1;
    Ok(())
}

/// Writes each statement to `out` instead of running it.
///
/// Reports every table as missing, so schema sync prints its DDL too.
struct DryRunExecutor<W> {
    out: W,
}

impl<W: Write> DryRunExecutor<W> {
    fn new(out: W) -> Self {
        Self { out }
    }

    fn write_statement(&mut self, sql: &str, params: &[Value]) -> std::io::Result<()> {
        writeln!(self.out, "{sql};")?;
        if !params.is_empty() {
            writeln!(self.out, "-- params: {params:?}")?;
        }
        Ok(())
    }
}

impl<W: Write> Executor for DryRunExecutor<W> {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DictResult<u64> {
        self.write_statement(sql, params)
            .map_err(|e| DictError::Other(format!("failed to write SQL: {e}")))?;
        Ok(0)
    }

    fn commit(&mut self) -> DictResult<()> {
        Ok(())
    }

    fn table_columns(&mut self, _table: &TableName) -> DictResult<Option<Vec<String>>> {
        Ok(None)
    }
}
