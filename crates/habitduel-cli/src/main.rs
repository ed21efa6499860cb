use clap::{Parser, Subcommand};
use std::env;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "habitduel", version, about = "HabitDuel challenge timer CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Challenge records
    Challenge {
        #[command(subcommand)]
        action: commands::challenge::ChallengeAction,
    },
    /// Live timer session over stdin/stdout JSON lines
    Live(commands::live::LiveArgs),
    /// Weekly close-out and challenge settlement
    Settle {
        #[command(subcommand)]
        action: commands::settle::SettleAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Challenge { action } => commands::challenge::run(action),
        Commands::Live(args) => commands::live::run(args),
        Commands::Settle { action } => commands::settle::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries command output only.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("HABITDUEL_LOG")
        .unwrap_or_else(|_| EnvFilter::new("habitduel=info,warn"));

    let format = env::var("HABITDUEL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}
