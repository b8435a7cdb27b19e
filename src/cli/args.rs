//! Command line argument parsing
//!
//! Subcommands:
//! - `serve`: Run the HTTP service
//! - `servers`: Print the server catalog as JSON
//! - `stop-all`: Remove every container carrying the management label
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision disposable test-server containers and stream their progress and logs")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path (defaults to discovery)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Bind address override
        #[arg(long = "host")]
        host: Option<String>,
        /// Port override
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
    /// Print the server catalog as JSON
    Servers,
    /// Remove every managed container
    StopAll,
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_accepts_overrides() {
        let args = Args::try_parse_from(["sts", "serve", "--host", "127.0.0.1", "-p", "9090"]).unwrap();
        match args.command {
            Commands::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("127.0.0.1"));
                assert_eq!(port, Some(9090));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(args.config.is_none());
    }

    #[test]
    fn config_flag_is_global() {
        let args = Args::try_parse_from(["sts", "stop-all", "--config", "/tmp/sts.toml"]).unwrap();
        assert!(matches!(args.command, Commands::StopAll));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/sts.toml")));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Args::try_parse_from(["sts"]).is_err());
    }
}
