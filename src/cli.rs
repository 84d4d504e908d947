use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lineup-bot")]
#[command(about = "Daily lineup announcements and tallies for Discord", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Connect to Discord and run the scheduler (default)")]
    Run,

    #[command(about = "Post today's announcements once and exit")]
    PostNow,

    #[command(about = "Tally the recorded announcements once and exit")]
    TallyNow,

    #[command(about = "Validate the configuration file")]
    ValidateConfig,

    #[command(about = "Print the stored announcement records")]
    ShowRecords,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
