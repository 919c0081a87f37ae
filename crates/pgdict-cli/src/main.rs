fn main() {
    dotenvy::dotenv().ok();
    pgdict_cli::init_tracing();

    if let Err(e) = pgdict_cli::run(std::env::args().collect()) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
