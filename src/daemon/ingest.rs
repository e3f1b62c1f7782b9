use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::config::SourceConfig;
use crate::daemon::server::Daemon;
use crate::error::Result;
use crate::ipc::protocol::{MAX_DATAGRAM_LEN, decode_datagram};

/// Receives datagrams on one port forever. Payloads are never rejected.
pub async fn run_source(
    daemon: Arc<Daemon>,
    source: SourceConfig,
    socket: UdpSocket,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                tracing::warn!(port = source.port, %err, "ingest: receive failed");
                continue;
            }
        };
        let (tag, message) = decode_datagram(&buf[..len], source.tag.as_deref());
        tracing::trace!(port = source.port, %peer, len, "ingest: datagram");
        daemon.ingest(tag, message).await;
    }
}
