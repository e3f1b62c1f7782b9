use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify};

use crate::error::Result;
use crate::ipc::protocol::LineFormat;
use crate::ipc::server::{LineWriter, accept_next};
use crate::logs::{LogBuffer, LogEntry};

enum ClientSlot {
    Waiting,
    /// Entries pushed while the snapshot replay is being written.
    Replaying { pending: Vec<LogEntry> },
    Streaming(LiveClient),
}

struct LiveClient {
    session: u64,
    writer: OwnedWriteHalf,
    next_seq: u64,
    /// Entries that overtook an older one still on its way from another source.
    held: BTreeMap<u64, LogEntry>,
    disconnected: Arc<Notify>,
}

impl LiveClient {
    fn new(
        session: u64,
        writer: OwnedWriteHalf,
        replayed_through: u64,
        disconnected: Arc<Notify>,
    ) -> Self {
        Self {
            session,
            writer,
            next_seq: replayed_through + 1,
            held: BTreeMap::new(),
            disconnected,
        }
    }

    /// Writes entries strictly in `seq` order. Every entry appended after the
    /// replay is pushed exactly once, so a gap is always filled by a later push.
    async fn deliver(&mut self, format: &LineFormat, entry: &LogEntry) -> io::Result<()> {
        if entry.seq < self.next_seq {
            return Ok(());
        }
        self.held.insert(entry.seq, entry.clone());
        while let Some(next) = self.held.remove(&self.next_seq) {
            self.writer.write_all(format.render(&next).as_bytes()).await?;
            self.next_seq += 1;
        }
        Ok(())
    }
}

/// Streams the buffer, then every new entry, to a single attached client.
///
/// The client slot has its own lock, separate from the buffer's. A new
/// client's replay records the newest sequence number it covered; entries
/// pushed during the replay are queued and handed to the client afterwards.
/// From then on lines go out in buffer order, whichever source wins the race
/// to the client lock.
pub struct LiveBroadcaster {
    slot: Mutex<ClientSlot>,
    format: LineFormat,
}

impl LiveBroadcaster {
    pub fn new(format: LineFormat) -> Self {
        Self {
            slot: Mutex::new(ClientSlot::Waiting),
            format,
        }
    }

    /// Forwards one freshly stored entry. A failed write drops the client.
    pub async fn push(&self, entry: &LogEntry) {
        let mut slot = self.slot.lock().await;
        let failed = match &mut *slot {
            ClientSlot::Waiting => None,
            ClientSlot::Replaying { pending } => {
                pending.push(entry.clone());
                None
            }
            ClientSlot::Streaming(client) => match client.deliver(&self.format, entry).await {
                Ok(()) => None,
                Err(err) => {
                    tracing::debug!(session = client.session, %err, "live: write failed");
                    Some(client.disconnected.clone())
                }
            },
        };
        if let Some(disconnected) = failed {
            *slot = ClientSlot::Waiting;
            disconnected.notify_one();
        }
    }

    /// Accepts one client at a time, forever. Further connections wait in the
    /// listener backlog until the current client goes away.
    pub async fn serve(&self, listener: TcpListener, log: &LogBuffer) -> Result<()> {
        let mut session = 0u64;
        loop {
            let (stream, peer) = accept_next(&listener, "live").await;
            session += 1;
            tracing::info!(session, %peer, "live: client attached");

            let (reader, writer) = stream.into_split();
            let disconnected = Arc::new(Notify::new());
            let detector = tokio::spawn(watch_disconnect(reader, disconnected.clone()));

            match self.attach(session, writer, log, disconnected.clone()).await {
                Ok(()) => disconnected.notified().await,
                Err(err) => tracing::debug!(session, %err, "live: replay failed"),
            }

            detector.abort();
            self.detach().await;
            tracing::info!(session, %peer, "live: client detached");
        }
    }

    async fn attach(
        &self,
        session: u64,
        mut writer: OwnedWriteHalf,
        log: &LogBuffer,
        disconnected: Arc<Notify>,
    ) -> io::Result<()> {
        self.begin_replay().await;

        let mut replay = LineWriter::new(&mut writer, &self.format);
        let replayed_through = log.snapshot_iterate(&mut replay).await?;
        tracing::debug!(session, lines = replay.lines(), "live: replay written");

        let client = LiveClient::new(session, writer, replayed_through, disconnected);
        self.finish_replay(client).await
    }

    async fn begin_replay(&self) {
        *self.slot.lock().await = ClientSlot::Replaying {
            pending: Vec::new(),
        };
    }

    /// Sends what was queued during the replay and starts streaming.
    async fn finish_replay(&self, mut client: LiveClient) -> io::Result<()> {
        let mut slot = self.slot.lock().await;
        let pending = match std::mem::replace(&mut *slot, ClientSlot::Waiting) {
            ClientSlot::Replaying { pending } => pending,
            _ => Vec::new(),
        };
        for entry in &pending {
            client.deliver(&self.format, entry).await?;
        }
        tracing::debug!(session = client.session, queued = pending.len(), "live: streaming");
        *slot = ClientSlot::Streaming(client);
        Ok(())
    }

    async fn detach(&self) {
        *self.slot.lock().await = ClientSlot::Waiting;
    }

    #[cfg(test)]
    pub(crate) async fn is_streaming(&self) -> bool {
        matches!(*self.slot.lock().await, ClientSlot::Streaming(_))
    }
}

/// The client never sends anything, so a read only ever completes when the
/// connection closes.
async fn watch_disconnect(mut reader: OwnedReadHalf, disconnected: Arc<Notify>) {
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(%err, "live: read failed");
                break;
            }
        }
    }
    disconnected.notify_one();
}
