use crate::demo::{run_sweep_demo, SweepArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use engage_ai::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Engagement Lifecycle Orchestrator",
    about = "Run the rule-based lifecycle tag engine as a service or from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one engagement sweep against demo or imported data and print the results
    Sweep(SweepArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep(args) => run_sweep_demo(args).await,
    }
}
