//! Coordinator side of the messaging channel.

use std::{
    fmt,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use {
    serde::Serialize,
    switchboard_protocol::{Envelope, MAX_FRAME_BYTES},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
        sync::mpsc,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{error::Result, transport::Listener};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, gauge, ipc as ipc_metrics};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle used to push frames to one connected client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ConnId,
    /// Channel feeding this client's write loop.
    sender: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    /// A handle backed by a plain channel, for driving a coordinator without
    /// a socket.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnId::next(),
                sender,
            },
            rx,
        )
    }

    /// Send one encoded line. Returns `false` once the connection is gone.
    pub fn send(&self, line: String) -> bool {
        self.sender.send(line).is_ok()
    }

    pub fn emit_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(line) => self.send(line),
            Err(e) => {
                warn!(conn_id = %self.id, kind = %envelope.kind, error = %e, "dropping unencodable frame");
                false
            },
        }
    }

    pub fn emit<T: Serialize>(&self, kind: &str, payload: &T) -> bool {
        match Envelope::from_payload(kind, payload) {
            Ok(envelope) => self.emit_envelope(&envelope),
            Err(e) => {
                warn!(conn_id = %self.id, kind, error = %e, "failed to serialize payload");
                false
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug)]
pub enum ServerEvent {
    Connected(ClientHandle),
    Message { from: ConnId, envelope: Envelope },
    Disconnected(ConnId),
}

pub struct IpcServer {
    listener: Listener,
}

impl IpcServer {
    pub fn bind(path: &Path) -> Result<Self> {
        let listener = Listener::bind(path)?;
        info!(path = %path.display(), "messaging channel listening");
        Ok(Self { listener })
    }

    /// Accept connections until `cancel` fires. Every connection reports
    /// through `events`.
    pub async fn run(mut self, events: mpsc::UnboundedSender<ServerEvent>, cancel: CancellationToken) {
        loop {
            let stream = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    },
                },
            };
            tokio::spawn(serve_connection(stream, events.clone(), cancel.clone()));
        }
        debug!("messaging channel stopped accepting");
    }
}

/// Drive one connection: a write loop fed by the [`ClientHandle`] and a read
/// loop decoding newline-delimited frames.
pub async fn serve_connection<S>(
    stream: S,
    events: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let (sender, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = ClientHandle {
        id: ConnId::next(),
        sender,
    };
    let conn_id = handle.id;
    info!(conn_id = %conn_id, "client connected");
    #[cfg(feature = "metrics")]
    gauge!(ipc_metrics::CONNECTIONS_ACTIVE).increment(1.0);

    let write_handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                debug!(conn_id = %conn_id, "write loop closed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    if events.send(ServerEvent::Connected(handle)).is_err() {
        write_handle.abort();
        return;
    }

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            () = cancel.cancelled() => break,
            read = reader.read_line(&mut line) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {},
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "read error");
                break;
            },
        }
        if line.trim().is_empty() {
            continue;
        }
        if line.len() > MAX_FRAME_BYTES {
            warn!(conn_id = %conn_id, size = line.len(), "frame too large, closing connection");
            break;
        }
        #[cfg(feature = "metrics")]
        counter!(ipc_metrics::FRAMES_RECEIVED_TOTAL).increment(1);
        match Envelope::decode(&line) {
            Ok(envelope) => {
                if events
                    .send(ServerEvent::Message {
                        from: conn_id,
                        envelope,
                    })
                    .is_err()
                {
                    break;
                }
            },
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ignoring malformed frame");
                #[cfg(feature = "metrics")]
                counter!(ipc_metrics::MALFORMED_FRAMES_TOTAL).increment(1);
            },
        }
    }

    info!(conn_id = %conn_id, "client disconnected");
    #[cfg(feature = "metrics")]
    gauge!(ipc_metrics::CONNECTIONS_ACTIVE).decrement(1.0);
    let _ = events.send(ServerEvent::Disconnected(conn_id));
    write_handle.abort();
}
