use anyhow::Result;
use tracing::info;

use crate::{client, config::AppConfig, server};

use super::config::{check_config, expand_path};
use super::template;

/// Execute CLI commands
pub async fn execute_command(cli: &super::Cli) -> Result<()> {
    use super::Commands;

    match &cli.command {
        Commands::Check { config, format } => {
            let config_path = expand_path(config)?;
            check_config(&config_path, format)?;
        }
        Commands::Template {
            template_type,
            output,
        } => {
            template::generate_config_template(template_type, output.as_deref())?;
        }
        Commands::Server { config } => {
            let config_path = expand_path(config)?;
            info!("Loading server configuration from: {}", config_path);
            let server_config = AppConfig::load_server_config(&config_path)?;
            server::run_server(server_config).await?;
        }
        Commands::Client { config } => {
            let config_path = expand_path(config)?;
            info!("Loading client configuration from: {}", config_path);
            let client_config = AppConfig::load_client_config(&config_path)?;
            client::run_client(client_config).await?;
        }
    }

    Ok(())
}
