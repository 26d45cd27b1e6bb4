//! Relay logic for one session's destination connection.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::observability::metrics::{self, Side};
use crate::tunnel::SessionKey;

/// Largest amount read back from the destination per exchange.
pub const READ_BUFFER_SIZE: usize = 1 << 17;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    #[error("no session for this key")]
    UnknownSession,

    #[error("destination connection is closed")]
    SessionDead,

    #[error("session registry is not running")]
    RegistryClosed,
}

/// An inbound relay request and the sink its result goes to.
#[derive(Debug)]
pub struct ProxyPacket {
    pub body: Bytes,
    done: oneshot::Sender<Result<Bytes, RelayError>>,
}

impl ProxyPacket {
    pub fn new(body: Bytes) -> (Self, oneshot::Receiver<Result<Bytes, RelayError>>) {
        let (done, rx) = oneshot::channel();
        (Self { body, done }, rx)
    }

    /// Signal completion. The waiting handler may already be gone.
    pub fn complete(self, result: Result<Bytes, RelayError>) {
        let _ = self.done.send(result);
    }
}

/// Destination connection owned by exactly one task.
pub struct Session {
    key: SessionKey,
    conn: TcpStream,
    received_packets: u64,
    dead: Arc<AtomicBool>,
    read_timeout: Duration,
    read_buf: Vec<u8>,
}

impl Session {
    pub fn new(key: SessionKey, conn: TcpStream, read_timeout: Duration) -> Self {
        Self {
            key,
            conn,
            received_packets: 0,
            dead: Arc::new(AtomicBool::new(false)),
            read_timeout,
            read_buf: vec![0u8; READ_BUFFER_SIZE],
        }
    }

    pub fn received_packets(&self) -> u64 {
        self.received_packets
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Shared view of the dead flag, for the registry's sweep.
    pub fn dead_flag(&self) -> Arc<AtomicBool> {
        self.dead.clone()
    }

    fn mark_dead(&self, reason: &str) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            tracing::info!(session = self.key.short(), reason, "Session dead");
        }
    }

    /// Write `body` to the destination, then read back what it produces
    /// within the read deadline.
    ///
    /// A timeout means "nothing yet" and yields an empty response.
    pub async fn handle(&mut self, body: &[u8]) -> Result<Bytes, RelayError> {
        if self.is_dead() {
            return Err(RelayError::SessionDead);
        }
        self.received_packets += 1;

        if !body.is_empty() {
            if let Err(e) = self.conn.write_all(body).await {
                tracing::debug!(session = self.key.short(), error = %e, "Destination write failed");
                self.mark_dead("write failed");
                return Err(RelayError::SessionDead);
            }
            metrics::record_bytes("upstream", body.len());
        }

        // The deadline is armed afresh on every call.
        match timeout(self.read_timeout, self.conn.read(&mut self.read_buf)).await {
            Err(_) => Ok(Bytes::new()),
            Ok(Ok(0)) => {
                self.mark_dead("destination closed");
                Ok(Bytes::new())
            }
            Ok(Ok(n)) => {
                metrics::record_bytes("downstream", n);
                Ok(Bytes::copy_from_slice(&self.read_buf[..n]))
            }
            Ok(Err(e)) => {
                tracing::debug!(session = self.key.short(), error = %e, "Destination read failed");
                self.mark_dead("read failed");
                Ok(Bytes::new())
            }
        }
    }

    /// Move the session into its own task and return its inbox.
    ///
    /// Packets are handled strictly in arrival order. The task, and with it
    /// the destination connection, ends when every sender is dropped.
    pub fn spawn(mut self) -> mpsc::UnboundedSender<ProxyPacket> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProxyPacket>();
        tokio::spawn(async move {
            metrics::session_opened(Side::Reverse);
            while let Some(packet) = rx.recv().await {
                let result = self.handle(&packet.body).await;
                packet.complete(result);
            }
            metrics::session_closed(Side::Reverse);
            tracing::debug!(
                session = self.key.short(),
                packets = self.received_packets,
                "Session task finished"
            );
        });
        tx
    }
}
