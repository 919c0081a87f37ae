mod cli;
mod load;
mod resolve;

use tracing_subscriber::EnvFilter;

pub fn run(args: Vec<String>) -> anyhow::Result<()> {
    let cmd = cli::parse_args(&args)?;
    match cmd {
        cli::Command::Help(topic) => {
            cli::print_help(topic);
            Ok(())
        }
        cli::Command::Load(args) => load::run(args),
        cli::Command::Resolve(args) => resolve::run(args),
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `pgdict=info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgdict=info"));
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
