mod cli;
mod cmd;
mod error;

use clap::Parser;
use cli::{BackupCommand, Cli, Commands, LogCommand, RetentionCommand, TopologyCommand};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Topology(TopologyCommand::Plan(args)) => cmd::topology::plan(&cli.config, args),
        Commands::Topology(TopologyCommand::Simulate(args)) => cmd::topology::simulate(&cli.config, args).await,
        Commands::Backup(BackupCommand::Plan(args)) => cmd::backup::plan(&cli.config, args).await,
        Commands::Backup(BackupCommand::History(args)) => cmd::backup::history(&cli.config, args).await,
        Commands::Retention(RetentionCommand::Plan) => cmd::backup::retention_plan(&cli.config).await,
        Commands::Log(LogCommand::Drop) => cmd::backup::drop_log(&cli.config).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}
