//! Tunnel session state machine for one accepted local connection.
//!
//! ```text
//! Creating ──create ok──▶ Active ──local closed / gone / shutdown──▶ Closing ──▶ Closed
//!     │
//!     └──create failed──▶ (connection dropped, no session)
//! ```

use bytes::Bytes;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::forward::reader;
use crate::forward::schedule::PollSchedule;
use crate::forward::transport::{Exchange, TunnelClient, TunnelError};
use crate::net::ConnectionId;
use crate::observability::metrics::{self, Side};
use crate::tunnel::{SessionKey, SyncBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Creating,
    Active,
    Closing,
    Closed,
}

/// Conditions that end an active session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("reverse proxy dropped the session ({0})")]
    Gone(StatusCode),

    #[error("writing to local connection failed: {0}")]
    LocalWrite(#[source] std::io::Error),
}

pub struct ForwardSession {
    id: ConnectionId,
    key: SessionKey,
    client: TunnelClient,
    state: SessionState,
    pending: SyncBuffer,
    /// Drained bytes whose request never reached the reverse proxy.
    retained: Vec<u8>,
    schedule: PollSchedule,
}

impl ForwardSession {
    /// Creating: ask the reverse proxy for a session.
    pub async fn open(
        id: ConnectionId,
        client: TunnelClient,
        base_interval: Duration,
    ) -> Result<Self, TunnelError> {
        tracing::debug!(
            connection_id = %id,
            state = ?SessionState::Creating,
            remote = %client.endpoint(),
            "Creating tunnel session"
        );

        let key = client.create().await?;

        tracing::info!(
            connection_id = %id,
            session = key.short(),
            remote = %client.endpoint(),
            "Tunnel session created"
        );

        Ok(Self {
            id,
            key,
            client,
            state: SessionState::Active,
            pending: SyncBuffer::new(),
            retained: Vec::new(),
            schedule: PollSchedule::new(base_interval, Instant::now()),
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Active until the local peer goes away, the session is gone or
    /// shutdown is requested; then Closing and Closed.
    pub async fn run<S>(mut self, stream: S, chunk_size: usize, mut shutdown: broadcast::Receiver<()>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut local = reader::spawn(read_half, chunk_size);

        let timer = tokio::time::sleep(self.schedule.base());
        tokio::pin!(timer);

        metrics::session_opened(Side::Forward);

        while self.state == SessionState::Active {
            let mut disconnect = false;

            // One event per iteration; the exchange below runs whichever fired.
            tokio::select! {
                biased;
                Some(chunk) = local.chunks.recv() => {
                    self.pending.append(&chunk);
                }
                _ = &mut local.closed => {
                    tracing::debug!(connection_id = %self.id, "Local peer closed");
                    disconnect = true;
                }
                Ok(()) = shutdown.recv() => {
                    tracing::debug!(connection_id = %self.id, "Shutdown requested");
                    disconnect = true;
                }
                () = &mut timer => {}
            }

            if let Err(e) = self.exchange(&mut write_half).await {
                tracing::warn!(
                    connection_id = %self.id,
                    session = self.key.short(),
                    error = %e,
                    "Ending tunnel session"
                );
                disconnect = true;
            }

            if disconnect {
                self.state = SessionState::Closing;
            } else {
                let next = self.schedule.next_interval(Instant::now());
                tracing::trace!(connection_id = %self.id, next_poll = ?next, "Poll scheduled");
                timer.as_mut().reset(tokio::time::Instant::now() + next);
            }
        }

        drop(local);
        drop(write_half);
        self.close().await;
        metrics::session_closed(Side::Forward);
    }

    /// One relay exchange: drain pending bytes, POST them, write back the answer.
    ///
    /// Only conditions that end the session are returned as errors; transport
    /// trouble is logged and the exchange skipped.
    async fn exchange<W>(&mut self, local: &mut W) -> Result<(), SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut body = std::mem::take(&mut self.retained);
        // Draining into a Vec cannot fail.
        let _ = self.pending.drain_to(&mut body);
        let body = Bytes::from(body);
        let sent = body.len();

        let start = Instant::now();
        let outcome = self.client.exchange(&self.key, body.clone()).await;
        metrics::record_exchange_latency(start);
        let now = Instant::now();

        match outcome {
            Ok(Exchange::Delivered(reply)) => {
                if sent > 0 {
                    self.schedule.record_send(now);
                    metrics::record_bytes("upstream", sent);
                }
                if !reply.is_empty() {
                    local.write_all(&reply).await.map_err(SessionError::LocalWrite)?;
                    self.schedule.record_recv(now);
                    metrics::record_bytes("downstream", reply.len());
                }
                metrics::record_exchange(Side::Forward, "ok");
                tracing::trace!(
                    connection_id = %self.id,
                    sent,
                    received = reply.len(),
                    "Exchange complete"
                );
            }
            Ok(Exchange::Foreign) => {
                if sent > 0 {
                    self.schedule.record_send(now);
                }
                metrics::record_exchange(Side::Forward, "foreign");
                tracing::warn!(
                    connection_id = %self.id,
                    session = self.key.short(),
                    "Wrong or missing X-Session-Id, response discarded"
                );
            }
            Ok(Exchange::Gone(status)) => {
                metrics::record_exchange(Side::Forward, "gone");
                return Err(SessionError::Gone(status));
            }
            Err(e) if e.is_connect() => {
                self.retained = body.to_vec();
                metrics::record_exchange(Side::Forward, "unreachable");
                tracing::warn!(
                    connection_id = %self.id,
                    retained = sent,
                    error = %e,
                    "Reverse proxy unreachable, exchange skipped"
                );
            }
            Err(e) => {
                metrics::record_exchange(Side::Forward, "error");
                tracing::warn!(
                    connection_id = %self.id,
                    dropped = sent,
                    error = %e,
                    "Exchange failed, skipped"
                );
            }
        }
        Ok(())
    }

    /// Closing: fire-and-forget close notification, then Closed.
    async fn close(&mut self) {
        if let Err(e) = self.client.close(&self.key).await {
            tracing::debug!(
                connection_id = %self.id,
                session = self.key.short(),
                error = %e,
                "Close notification failed"
            );
        }
        self.state = SessionState::Closed;
        tracing::info!(
            connection_id = %self.id,
            session = self.key.short(),
            "Tunnel session closed"
        );
    }
}
