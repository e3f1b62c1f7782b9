use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::daemon::server::Daemon;
use crate::error::Result;
use crate::ipc::protocol::{LineFormat, SENTINEL};
use crate::logs::{EntryVisitor, LogBuffer, LogEntry};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Writes each visited entry as one formatted line.
pub struct LineWriter<'a, W> {
    writer: &'a mut W,
    format: &'a LineFormat,
    lines: usize,
}

impl<'a, W: AsyncWrite + Unpin + Send> LineWriter<'a, W> {
    pub fn new(writer: &'a mut W, format: &'a LineFormat) -> Self {
        Self {
            writer,
            format,
            lines: 0,
        }
    }

    pub fn lines(&self) -> usize {
        self.lines
    }
}

impl<W: AsyncWrite + Unpin + Send> EntryVisitor for LineWriter<'_, W> {
    async fn visit(&mut self, entry: &LogEntry) -> io::Result<()> {
        self.writer
            .write_all(self.format.render(entry).as_bytes())
            .await?;
        self.lines += 1;
        Ok(())
    }
}

/// Serves one snapshot client at a time, forever. Client I/O errors only end
/// that client's dump.
pub async fn serve_snapshots(listener: TcpListener, daemon: Arc<Daemon>) -> Result<()> {
    loop {
        let (mut stream, peer) = accept_next(&listener, "snapshot").await;
        match write_snapshot(&mut stream, daemon.log(), daemon.format()).await {
            Ok(lines) => tracing::info!(%peer, lines, "snapshot: served"),
            Err(err) => tracing::warn!(%peer, %err, "snapshot: client failed"),
        }
        let _ = stream.shutdown().await;
    }
}

/// Waits for the next connection. Accept errors are logged and skipped; the
/// ones that mean the process is out of descriptors pause the loop briefly.
pub async fn accept_next(
    listener: &TcpListener,
    worker: &'static str,
) -> (TcpStream, SocketAddr) {
    loop {
        match listener.accept().await {
            Ok(accepted) => return accepted,
            Err(err) => {
                tracing::warn!(worker, %err, "accept failed");
                let pause = accept_backoff(&err);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

fn accept_backoff(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}

/// Dumps the whole buffer followed by the sentinel line.
pub async fn write_snapshot<W: AsyncWrite + Unpin + Send>(
    writer: &mut W,
    log: &LogBuffer,
    format: &LineFormat,
) -> io::Result<usize> {
    let mut lines = LineWriter::new(writer, format);
    log.snapshot_iterate(&mut lines).await?;
    let count = lines.lines();
    writer.write_all(SENTINEL.as_bytes()).await?;
    writer.flush().await?;
    Ok(count)
}
