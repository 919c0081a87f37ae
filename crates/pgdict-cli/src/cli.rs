use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "pgdict.toml";
const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Root,
    Load,
    Resolve,
}

#[derive(Debug, Clone)]
pub enum Command {
    Help(HelpTopic),
    Load(LoadArgs),
    Resolve(ResolveArgs),
}

#[derive(Debug, Clone)]
pub struct LoadArgs {
    pub config: PathBuf,
    pub batch_size: usize,
    pub dry_run: bool,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolveArgs {
    pub config: PathBuf,
    pub column: String,
    pub value: Option<String>,
}

pub fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut it = args.iter().skip(1);
    let Some(first) = it.next() else {
        return Ok(Command::Help(HelpTopic::Root));
    };

    match first.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help(HelpTopic::Root)),
        "load" => parse_load(it.map(|s| s.as_str())),
        "resolve" => parse_resolve(it.map(|s| s.as_str())),
        _ => anyhow::bail!("unknown command: {first}"),
    }
}

fn parse_load<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = PathBuf::from(DEFAULT_CONFIG);
    let mut batch_size = DEFAULT_BATCH_SIZE;
    let mut dry_run = false;
    let mut files: Vec<PathBuf> = Vec::new();

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Load)),
            "--config" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--config requires a value");
                };
                config = PathBuf::from(v);
            }
            _ if token.starts_with("--config=") => {
                config = PathBuf::from(token.trim_start_matches("--config="));
            }
            "--batch-size" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--batch-size requires a value");
                };
                batch_size = parse_batch_size(v)?;
            }
            _ if token.starts_with("--batch-size=") => {
                batch_size = parse_batch_size(token.trim_start_matches("--batch-size="))?;
            }
            "--dry-run" => dry_run = true,
            "-" => files.push(PathBuf::from("-")),
            other if other.starts_with('-') => anyhow::bail!("unknown argument: {other}"),
            other => files.push(PathBuf::from(other)),
        }
    }

    if files.is_empty() {
        anyhow::bail!("missing input: expected at least one JSON-lines FILE (or `-` for stdin)");
    }

    Ok(Command::Load(LoadArgs {
        config,
        batch_size,
        dry_run,
        files,
    }))
}

fn parse_batch_size(v: &str) -> anyhow::Result<usize> {
    let n: usize = v
        .parse()
        .map_err(|_| anyhow::anyhow!("--batch-size must be a positive integer, got {v:?}"))?;
    if n == 0 {
        anyhow::bail!("--batch-size must be at least 1");
    }
    Ok(n)
}

fn parse_resolve<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = PathBuf::from(DEFAULT_CONFIG);
    let mut positional: Vec<String> = Vec::new();

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Resolve)),
            "--config" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--config requires a value");
                };
                config = PathBuf::from(v);
            }
            _ if token.starts_with("--config=") => {
                config = PathBuf::from(token.trim_start_matches("--config="));
            }
            // Negative numbers are values, not flags.
            other if other.starts_with("--") => anyhow::bail!("unknown argument: {other}"),
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    let Some(column) = positional.next() else {
        anyhow::bail!("missing COLUMN: expected `pgdict resolve COLUMN [JSON_VALUE]`");
    };
    let value = positional.next();
    if let Some(extra) = positional.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }

    Ok(Command::Resolve(ResolveArgs {
        config,
        column,
        value,
    }))
}

pub fn print_help(topic: HelpTopic) {
    match topic {
        HelpTopic::Root => {
            println!(
                "\
pgdict - load loosely-typed records into PostgreSQL

USAGE:
  pgdict <COMMAND> [OPTIONS]

COMMANDS:
  load          Insert JSON-lines records in batches
  resolve       Print the SQL type a column would get
  help          Print this help

Run `pgdict <command> --help` for more."
            );
        }
        HelpTopic::Load => {
            println!(
                "\
USAGE:
  pgdict load [OPTIONS] <FILE>...

Each non-empty line of each FILE is one JSON object. Use `-` to read stdin.

OPTIONS:
  --config <FILE>       Config file path (default: pgdict.toml)
  --batch-size <N>      Records per flush (default: 1000)
  --dry-run             Print the SQL instead of executing it
  -h, --help            Print help"
            );
        }
        HelpTopic::Resolve => {
            println!(
                "\
USAGE:
  pgdict resolve [OPTIONS] <COLUMN> [JSON_VALUE]

Without JSON_VALUE only the name-based rules are consulted.

OPTIONS:
  --config <FILE>       Config file path (default: pgdict.toml)
  -h, --help            Print help"
            );
        }
    }
}
