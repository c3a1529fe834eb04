pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use jobflow_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "jobflow",
    about = "Jobflow operator CLI",
    long_about = concat!(
        "Inspect configuration, apply migrations, check readiness, ",
        "and compute SLA due dates for the job workflow engine."
    ),
    after_help = concat!(
        "Examples:\n",
        "  jobflow doctor --json\n",
        "  jobflow due-date --start 2024-06-10 --days 2 --holiday 2024-06-11\n",
        "  jobflow smoke"
    )
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Run readiness checks and an end-to-end workflow round trip with timings")]
    Smoke,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Check config, schema, flow templates, holidays, and shift log guards")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Compute a due date in working days, skipping weekends and holidays")]
    DueDate(commands::due_date::DueDateArgs),
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => commands::CommandResult::text(commands::config::run()),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::DueDate(args) => commands::due_date::run(&args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so command payloads on stdout stay machine-readable.
fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let result = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(error) = result {
        eprintln!("logging was already initialized: {error}");
    }
}
