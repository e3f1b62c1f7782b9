use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

use crate::config::{LoggerConfig, config_path, load_config};
use crate::error::{LoggerError, Result};
use crate::ipc::client::{fetch_snapshot, follow, send_datagram};

#[derive(Parser)]
#[command(name = "udplogger", version, about = "In-memory UDP log collector")]
pub struct Cli {
    #[arg(long, global = true)]
    pub verbose: bool,
    /// Config file (defaults to ./udplogger.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Overlay a named section of the config file
    #[arg(long, global = true)]
    pub section: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect datagrams and serve the snapshot and live feeds
    Serve,
    /// Print the current buffer from the snapshot server
    Dump {
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print the live feed
    Follow {
        #[arg(long)]
        addr: Option<String>,
    },
    /// Send one log line to an ingestion port
    Send {
        message: String,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        host: Option<IpAddr>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the config and print the resolved settings
    Check,
    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

pub async fn execute(cli: Cli) -> Result<()> {
    let Cli {
        config, section, ..
    } = cli;
    let load = || -> Result<LoggerConfig> {
        let path = config_path(config.clone())?;
        load_config(&path, section.as_deref())
    };

    match cli.command {
        Commands::Serve => {
            crate::daemon::run_daemon(load()?).await?;
        }
        Commands::Dump { addr } => {
            let addr = match addr {
                Some(addr) => addr,
                None => local_addr(load()?.server_port),
            };
            for line in fetch_snapshot(&addr).await? {
                println!("{line}");
            }
        }
        Commands::Follow { addr } => {
            let addr = match addr {
                Some(addr) => addr,
                None => local_addr(load()?.live_port),
            };
            follow(&addr, |line| println!("{line}")).await?;
        }
        Commands::Send {
            message,
            tag,
            host,
            port,
        } => {
            let port = match port {
                Some(port) => port,
                None => first_source_port(&load()?)?,
            };
            let host = host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
            send_datagram(SocketAddr::new(host, port), tag.as_deref(), &message).await?;
        }
        Commands::Check => {
            let config = load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "udplogger",
                &mut std::io::stdout(),
            );
        }
    }
    Ok(())
}

fn local_addr(port: u16) -> String {
    format!("127.0.0.1:{port}")
}

fn first_source_port(config: &LoggerConfig) -> Result<u16> {
    config
        .sources
        .first()
        .map(|source| source.port)
        .ok_or_else(|| LoggerError::Usage("no ingestion port configured, use --port".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "udplogger",
            "dump",
            "--config",
            "/etc/udplogger.yaml",
            "--section",
            "staging",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/udplogger.yaml")));
        assert_eq!(cli.section.as_deref(), Some("staging"));
        assert!(matches!(cli.command, Commands::Dump { addr: None }));
    }

    #[test]
    fn parses_send() {
        let cli = Cli::try_parse_from([
            "udplogger", "send", "--tag", "web", "--port", "5000", "started",
        ])
        .unwrap();
        match cli.command {
            Commands::Send {
                message,
                tag,
                host,
                port,
            } => {
                assert_eq!(message, "started");
                assert_eq!(tag.as_deref(), Some("web"));
                assert_eq!(host, None);
                assert_eq!(port, Some(5000));
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
