pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "steward",
    about = "Steward operator CLI",
    long_about = "Operate the Steward governance engine: migrations, demo fixtures, readiness checks, and autonomy policy management.",
    after_help = "Examples:\n  steward migrate\n  steward doctor --json\n  steward policy get --tenant demo\n  steward policy set --tenant demo --action-type deposit_reminder --level auto --max-per-day 5"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load demo tenant, policies and a starter pending card")]
    Seed,
    #[command(about = "Expire pending cards older than the configured review window")]
    Expire,
    #[command(about = "Validate config, database connectivity, and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect or change a tenant's autonomy policies")]
    Policy {
        #[command(subcommand)]
        action: PolicyCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum PolicyCommand {
    #[command(about = "Show policy rows, or the effective policy for one action type")]
    Get {
        #[arg(long)]
        tenant: String,
        #[arg(long, help = "Resolve the effective policy for this action type")]
        action_type: Option<String>,
    },
    #[command(about = "Create or update a policy row (use action type `*` for the tenant default)")]
    Set {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        action_type: String,
        #[arg(long, help = "off | assisted | auto")]
        level: String,
        #[arg(long, help = "Daily auto-execution ceiling; omit for unlimited")]
        max_per_day: Option<u32>,
        #[arg(long, help = "staff | manager | admin")]
        required_role: Option<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

pub fn run() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Expire => commands::expire::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Policy { action } => commands::policy::run(action),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
