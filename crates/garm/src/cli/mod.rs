mod migrate;
mod run;

pub use migrate::MigrateCommand;
pub use run::RunCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// garm - self-hosted CI runner fleet controller.
#[derive(Parser)]
#[command(name = "garm")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the garm controller.
    Run(RunCommand),

    /// Manage database migrations.
    Migrate(MigrateCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Migrate(cmd) => cmd.execute().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["garm", "run"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_migrate() {
        let cli = Cli::try_parse_from(["garm", "migrate", "up"]);
        assert!(cli.is_ok());
    }
}
