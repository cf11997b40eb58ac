mod cmd;
mod output;
mod scenario;

use clap::{Parser, Subcommand};
use cmd::{run::RunArgs, ScenarioArgs};

#[derive(Parser)]
#[command(
    name = "smoke",
    about = "Smoke test: drive the orchestration gateway and verify the cloud resources it creates",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log progress at INFO level (RUST_LOG overrides)
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(flatten)]
    scenario: ScenarioArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the steps and clauses of the suite without running anything
    Plan,

    /// Run the suite against a live gateway and project
    Run(RunArgs),
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Plan => cmd::plan::run(&cli.scenario, cli.json).map(|()| true),
        Commands::Run(args) => cmd::run::run(&cli.scenario, args, cli.json),
    };

    match result {
        Ok(true) => {}
        // The report already explains what failed.
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
