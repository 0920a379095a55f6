use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use std::path::Path;

use garm_core::config::GarmConfig;
use garm_runtime::{load_migrations_from_dir, MigrationRunner, PgStore};

/// Manage database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: MigrateAction,

    /// Configuration file path.
    #[arg(short, long, default_value = "garm.toml", global = true)]
    pub config: String,

    /// Migrations directory path.
    #[arg(short, long, default_value = "migrations", global = true)]
    pub migrations_dir: String,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Run all pending migrations.
    Up,

    /// Show migration status.
    Status,
}

impl MigrateCommand {
    pub async fn execute(self) -> Result<()> {
        dotenvy::dotenv().ok();

        let config_path = Path::new(&self.config);
        if !config_path.exists() {
            anyhow::bail!("configuration file not found: {}", self.config);
        }
        let config = GarmConfig::from_file(&self.config)?;

        let store = PgStore::connect(&config.database).await?;
        let runner = MigrationRunner::new(store.pool().clone());

        let migrations_dir = Path::new(&self.migrations_dir);
        let available = if migrations_dir.exists() {
            load_migrations_from_dir(migrations_dir)?
        } else {
            Vec::new()
        };

        match self.action {
            MigrateAction::Up => {
                println!();
                println!("  {}  {}", style("garm").bold().cyan(), style("migrations").bold());
                println!();
                println!("  {} Running pending migrations...", style("->").dim());
                runner.run(available).await?;
                println!("  {} Migrations complete", style("ok").green());
                println!();
            }
            MigrateAction::Status => {
                println!();
                println!("  {}  {}", style("garm").bold().cyan(), style("migration status").bold());
                println!();

                let status = runner.status(&available).await?;

                if !status.applied.is_empty() {
                    println!("  {} Applied:", style("ok").green());
                    for m in &status.applied {
                        println!(
                            "    {} {} ({})",
                            style(&m.name).cyan(),
                            style("at").dim(),
                            m.applied_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }

                if !status.pending.is_empty() {
                    if !status.applied.is_empty() {
                        println!();
                    }
                    println!("  {} Pending:", style("..").yellow());
                    for name in &status.pending {
                        println!("    {}", style(name).yellow());
                    }
                }

                println!();
                println!("  {} applied, {} pending", status.applied.len(), status.pending.len());
                println!();
            }
        }

        Ok(())
    }
}
