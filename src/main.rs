//! gsync CLI entry point.

use clap::Parser;
use gsync::cli::commands::{self, Context};
use gsync::cli::{Cli, Commands, OutputFormat};
use gsync::error::Error;
use std::io::IsTerminal;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Errors are structured when output is JSON or nobody is watching
    let json_errors = cli.output_format() == OutputFormat::Json
        || !std::io::stderr().is_terminal()
        || !std::io::stdout().is_terminal();

    match run(&cli) {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            if json_errors {
                eprintln!("{}", e.to_structured_json());
            } else if let Some(hint) = e.hint() {
                eprintln!("Error: {e}\n  Hint: {hint}");
            } else {
                eprintln!("Error: {e}");
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
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli) -> Result<u8, Error> {
    let json = cli.output_format() == OutputFormat::Json;
    match &cli.command {
        Commands::Init { path, force } => commands::init::execute(path, *force, json).map(|()| 0),
        Commands::Version => commands::version::execute(json).map(|()| 0),
        Commands::Completions { shell } => commands::completions::execute(shell).map(|()| 0),

        Commands::Compare(args) => commands::compare::execute(args, &Context::from_cli(cli)?),
        Commands::Sync(args) => commands::sync::execute(args, &Context::from_cli(cli)?),
        Commands::Import(args) => commands::import::execute_import(args, &Context::from_cli(cli)?),
        Commands::Select(args) => commands::import::execute_select(args, &Context::from_cli(cli)?),
    }
}
