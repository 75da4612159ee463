use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oracled")]
#[command(about = "Oracle node - local and round-synchronized global price aggregation")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node with the given configuration
    Start {
        /// Which pipeline stages to run in this process
        #[arg(short, long, value_enum, default_value = "all")]
        role: NodeRole,

        /// Path to the configuration file
        #[arg(short, long, default_value = "node_config/oracle.yaml")]
        config: PathBuf,

        /// Override the host identity from the configuration
        #[arg(long, env = "ORACLE_NODE_ID")]
        node_id: Option<String>,

        /// Override the Prometheus exporter port
        #[arg(long)]
        metrics_port: Option<u16>,
    },

    /// Validate configuration without starting the node
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "node_config/oracle.yaml")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "oracle.yaml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    /// Fetcher and aggregator in one process
    All,

    /// Local aggregation only
    Fetcher,

    /// Global aggregation only, fed over the command bus
    Aggregator,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::All => "all",
            NodeRole::Fetcher => "fetcher",
            NodeRole::Aggregator => "aggregator",
        }
    }

    pub fn runs_fetcher(&self) -> bool {
        matches!(self, NodeRole::All | NodeRole::Fetcher)
    }

    pub fn runs_aggregator(&self) -> bool {
        matches!(self, NodeRole::All | NodeRole::Aggregator)
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_defaults() {
        let cli = Cli::try_parse_from(["oracled", "start"]).unwrap();
        match cli.command {
            Commands::Start {
                role,
                config,
                metrics_port,
                ..
            } => {
                assert_eq!(role, NodeRole::All);
                assert_eq!(config, PathBuf::from("node_config/oracle.yaml"));
                assert!(metrics_port.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_start_with_role_and_overrides() {
        let cli = Cli::try_parse_from([
            "oracled",
            "start",
            "--role",
            "aggregator",
            "--node-id",
            "node-7",
            "--metrics-port",
            "9100",
        ])
        .unwrap();
        match cli.command {
            Commands::Start {
                role,
                node_id,
                metrics_port,
                ..
            } => {
                assert!(!role.runs_fetcher());
                assert!(role.runs_aggregator());
                assert_eq!(node_id.as_deref(), Some("node-7"));
                assert_eq!(metrics_port, Some(9100));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(Cli::try_parse_from(["oracled", "start", "--role", "gateway"]).is_err());
    }
}
