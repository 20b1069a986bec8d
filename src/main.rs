//! Offline data manager CLI entry point.

use clap::Parser;
use odm::cli::commands;
use odm::cli::{Cli, Commands};
use odm::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Resolve effective JSON mode: --json OR non-TTY stdout
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    // Run the command and handle errors
    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,reqwest=info,hyper_util=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();

    match &cli.command {
        Commands::Init { force } => commands::init::execute(db, *force, json),
        Commands::Version => commands::version::execute(json),
        Commands::Status => commands::status::execute(db, json),

        // Cache and queue
        Commands::Cache { command } => commands::cache::execute(command, db, json),
        Commands::Queue { command } => commands::queue::execute(command, db, json),

        // Collections
        Commands::Put { collection, document } => {
            commands::records::execute_put(collection, document, db, json)
        }
        Commands::Get { collection, key } => commands::records::execute_get(collection, key, db, json),
        Commands::List {
            collection,
            index,
            value,
        } => commands::records::execute_list(
            collection,
            index.as_deref(),
            value.as_deref(),
            db,
            json,
        ),
        Commands::Delete { collection, key } => {
            commands::records::execute_delete(collection, key, db, json)
        }
        Commands::Clear { collection } => commands::records::execute_clear(collection, db, json),
        Commands::Export { output } => commands::export::execute(output.as_ref(), db, json),

        // Sync
        Commands::Sync => commands::sync::execute(db, json),
        Commands::Run { offline } => commands::run::execute(db, *offline, json),

        // Shell completions
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
