use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::select_all;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

use crate::config::{LoggerConfig, SourceConfig};
use crate::daemon::ingest;
use crate::daemon::live::LiveBroadcaster;
use crate::error::{LoggerError, Result};
use crate::ipc::protocol::LineFormat;
use crate::ipc::server::serve_snapshots;
use crate::logs::{LogBuffer, LogEntry};

/// Shared state handed to every worker: the buffer, the live client slot and
/// the resolved configuration.
pub struct Daemon {
    config: LoggerConfig,
    log: LogBuffer,
    live: LiveBroadcaster,
    format: LineFormat,
}

impl Daemon {
    pub fn new(config: LoggerConfig) -> Self {
        let format = LineFormat::new(config.tag_width);
        Self {
            log: LogBuffer::new(config.max_entries),
            live: LiveBroadcaster::new(format),
            format,
            config,
        }
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn live(&self) -> &LiveBroadcaster {
        &self.live
    }

    pub fn format(&self) -> &LineFormat {
        &self.format
    }

    /// Stores one entry and forwards it to the live client, if any.
    pub async fn ingest(&self, tag: String, message: String) -> LogEntry {
        let entry = self.log.append(tag, message).await;
        tracing::trace!(seq = entry.seq, tag = %entry.tag, "daemon: entry stored");
        self.live.push(&entry).await;
        entry
    }

    /// Runs every worker until one of them stops. Workers never stop on their
    /// own, so any return is an error.
    pub async fn run(self: Arc<Self>, listeners: Listeners) -> Result<()> {
        let Listeners {
            sources,
            snapshot,
            live,
        } = listeners;
        let mut names = Vec::new();
        let mut workers: Vec<JoinHandle<Result<()>>> = Vec::new();

        for (source, socket) in sources {
            let daemon = self.clone();
            names.push("ingest");
            workers.push(tokio::spawn(async move {
                ingest::run_source(daemon, source, socket).await
            }));
        }

        names.push("snapshot");
        workers.push(tokio::spawn(serve_snapshots(snapshot, self.clone())));

        let daemon = self.clone();
        names.push("live");
        workers.push(tokio::spawn(async move {
            daemon.live().serve(live, daemon.log()).await
        }));

        tracing::info!(
            server_port = self.config.server_port,
            live_port = self.config.live_port,
            sources = self.config.sources.len(),
            max_entries = self.config.max_entries,
            "daemon: running"
        );

        let (finished, index, _rest) = select_all(workers).await;
        match finished {
            Ok(Ok(())) => Err(LoggerError::WorkerExited(names[index])),
            Ok(Err(err)) => Err(err),
            Err(join) => Err(LoggerError::WorkerPanicked(join.to_string())),
        }
    }
}

/// Every socket the daemon serves, bound before any worker starts.
pub struct Listeners {
    pub sources: Vec<(SourceConfig, UdpSocket)>,
    pub snapshot: TcpListener,
    pub live: TcpListener,
}

pub async fn bind_listeners(config: &LoggerConfig) -> Result<Listeners> {
    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let addr = SocketAddr::new(config.bind_address, source.port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|err| LoggerError::Bind {
                transport: "UDP",
                port: source.port,
                source: err,
            })?;
        tracing::info!(port = source.port, tag = ?source.tag, "daemon: listening for datagrams");
        sources.push((source.clone(), socket));
    }

    let snapshot = bind_tcp(config, config.server_port).await?;
    tracing::info!(port = config.server_port, "daemon: snapshot server listening");
    let live = bind_tcp(config, config.live_port).await?;
    tracing::info!(port = config.live_port, "daemon: live server listening");

    Ok(Listeners {
        sources,
        snapshot,
        live,
    })
}

async fn bind_tcp(config: &LoggerConfig, port: u16) -> Result<TcpListener> {
    TcpListener::bind(SocketAddr::new(config.bind_address, port))
        .await
        .map_err(|err| LoggerError::Bind {
            transport: "TCP",
            port,
            source: err,
        })
}

pub async fn run_daemon(config: LoggerConfig) -> Result<()> {
    let listeners = bind_listeners(&config).await?;
    let daemon = Arc::new(Daemon::new(config));
    daemon.run(listeners).await
}
