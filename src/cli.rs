//! Command-line interface definition for the HAIP server
//!
//! This module defines the CLI structure using clap's derive API, providing
//! commands for starting the server façade and validating configuration.

use clap::{Parser, Subcommand};

/// haip-server - HAIP protocol engine server
///
/// Hosts the server façade across the three HAIP transports (duplex
/// socket, bidirectional chunked HTTP, push+post).
#[derive(Parser, Debug, Clone)]
#[command(name = "haip-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "HAIP_CONFIG", default_value = "config/haip.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the HAIP server
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the server façade on the configured transports
    Serve,

    /// Load and validate configuration without starting the server
    ValidateConfig,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/haip.yaml".to_string()),
            verbose: false,
            command: Commands::Serve,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_command_is_serve() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/haip.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from(["haip-server", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn parses_validate_config_subcommand() {
        let cli = Cli::try_parse_from(["haip-server", "validate-config"]).unwrap();
        assert!(matches!(cli.command, Commands::ValidateConfig));
    }

    #[test]
    fn parses_config_override() {
        let cli = Cli::try_parse_from(["haip-server", "--config", "custom.yaml", "serve"]).unwrap();
        assert_eq!(cli.config, Some("custom.yaml".to_string()));
    }

    #[test]
    fn missing_command_is_rejected() {
        assert!(Cli::try_parse_from(["haip-server"]).is_err());
    }

    #[test]
    fn invalid_command_is_rejected() {
        assert!(Cli::try_parse_from(["haip-server", "bogus"]).is_err());
    }

    #[test]
    fn verbose_flag_parses() {
        let cli = Cli::try_parse_from(["haip-server", "-v", "serve"]).unwrap();
        assert!(cli.verbose);
    }
}
