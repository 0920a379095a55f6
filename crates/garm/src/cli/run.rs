use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;

use crate::runtime::Garm;

/// Run the garm controller.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "garm.toml")]
    pub config: String,

    /// Port to listen on (overrides config).
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self) -> Result<()> {
        dotenvy::dotenv().ok();

        let config_path = std::path::Path::new(&self.config);
        if !config_path.exists() {
            anyhow::bail!("configuration file not found: {}", self.config);
        }

        let mut config = garm_core::config::GarmConfig::from_file(&self.config)?;
        garm_runtime::init_tracing(&config.observability);

        if let Some(port) = self.port {
            let host = config
                .controller
                .bind_address
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            config.controller.bind_address = format!("{host}:{port}");
        }

        info!("loading configuration from {}", self.config);

        println!();
        println!("  {}  v{}", style("garm").bold().cyan(), env!("CARGO_PKG_VERSION"));
        println!("  {} listening on {}", style("->").dim(), style(&config.controller.bind_address).cyan());
        println!();

        let garm = Garm::builder().config(config).build().map_err(|e| anyhow::anyhow!("{}", e))?;
        garm.run().await.map_err(|e| anyhow::anyhow!("{}", e))?;

        println!("\n  {} stopped", style("garm").bold());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_defaults() {
        let cmd = RunCommand { config: "garm.toml".to_string(), port: None };
        assert_eq!(cmd.config, "garm.toml");
    }

    #[test]
    fn test_run_command_with_override() {
        let cmd = RunCommand { config: "custom.toml".to_string(), port: Some(3000) };
        assert_eq!(cmd.port, Some(3000));
    }
}
