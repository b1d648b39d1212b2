use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cirrus", about = "Broadcast topology and table backup orchestration")]
pub struct Cli {
    /// Path to the configuration file (.toml or .hcl).
    #[arg(long, global = true, default_value = "cirrus.toml", env = "CIRRUS_CONFIG")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Broadcast topic topologies
    #[command(subcommand)]
    Topology(TopologyCommand),
    /// Table backups
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Expired backup artifacts
    #[command(subcommand)]
    Retention(RetentionCommand),
    /// Backup management log
    #[command(subcommand)]
    Log(LogCommand),
}

#[derive(Subcommand)]
pub enum TopologyCommand {
    /// Print the topic tree for a subscriber count
    Plan(TopologyPlanArgs),
    /// Emit a topology against an in-memory broker and assign slots
    Simulate(TopologySimulateArgs),
}

#[derive(Args, Clone, Debug)]
pub struct TopologyPlanArgs {
    /// Topology from the configuration file.
    #[arg(long, conflicts_with_all = ["root", "subscribers", "max_per_topic"])]
    pub name: Option<String>,
    /// Root topic name.
    #[arg(long, default_value = "topic")]
    pub root: String,
    #[arg(long)]
    pub subscribers: Option<usize>,
    #[arg(long, default_value_t = 2000)]
    pub max_per_topic: usize,
    /// Print every topic, not only the level summary.
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Args, Clone, Debug)]
pub struct TopologySimulateArgs {
    /// Topology from the configuration file.
    #[arg(long)]
    pub name: String,
    /// Subscription slots to request.
    #[arg(long)]
    pub subscribers: usize,
}

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Show what the next backup of each table would do
    Plan(BackupPlanArgs),
    /// List logged backup runs, newest first
    History(BackupHistoryArgs),
}

#[derive(Args, Clone, Debug)]
pub struct BackupPlanArgs {
    /// Only this source table.
    #[arg(long)]
    pub table: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct BackupHistoryArgs {
    #[arg(long)]
    pub table: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Subcommand)]
pub enum RetentionCommand {
    /// Show which logged backup tables are past retention
    Plan,
}

#[derive(Subcommand)]
pub enum LogCommand {
    /// Delete the whole backup management log
    Drop,
}
