//! Forward proxy accept loop.

use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::ForwardConfig;
use crate::forward::session::ForwardSession;
use crate::forward::transport::{RemoteEndpoint, TunnelClient, TunnelError};
use crate::net::{ConnectionTracker, Listener, ListenerError};

/// Pause after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts local TCP connections and tunnels each through its own session.
pub struct ForwardProxy {
    http: reqwest::Client,
    endpoints: Vec<RemoteEndpoint>,
    poll_interval: Duration,
    read_chunk_size: usize,
    tracker: ConnectionTracker,
}

impl ForwardProxy {
    /// Build the proxy with an HTTP client honoring the configured timeout.
    pub fn new(config: ForwardConfig) -> Result<Self, TunnelError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Self::with_client(config, http)
    }

    /// Build the proxy around an existing HTTP client.
    pub fn with_client(config: ForwardConfig, http: reqwest::Client) -> Result<Self, TunnelError> {
        let endpoints = config
            .remotes
            .iter()
            .map(RemoteEndpoint::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(TunnelError::NoRemotes);
        }

        Ok(Self {
            http,
            endpoints,
            poll_interval: config.poll_interval(),
            read_chunk_size: config.read_chunk_size,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Tracker of connections whose session has not closed yet.
    pub fn connections(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Each session sticks to one endpoint, chosen at random.
    fn pick_endpoint(&self) -> RemoteEndpoint {
        self.endpoints[fastrand::usize(..self.endpoints.len())].clone()
    }

    /// Accept until shutdown. Sessions already running get their own
    /// shutdown subscription and close themselves.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let address = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %address,
            remotes = self.endpoints.len(),
            poll_interval = ?self.poll_interval,
            "Forward proxy starting"
        );

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.recv() => {
                    tracing::info!("Forward proxy stopping");
                    break;
                }
            };

            let (stream, peer_addr, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Back off so a persistent error (e.g. EMFILE) does not spin.
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            let guard = self.tracker.track();
            let client = TunnelClient::new(self.http.clone(), self.pick_endpoint());
            let poll_interval = self.poll_interval;
            let chunk_size = self.read_chunk_size;
            let session_shutdown = shutdown.resubscribe();

            tokio::spawn(async move {
                let _permit = permit;
                let id = guard.id();
                tracing::debug!(connection_id = %id, peer_addr = %peer_addr, "Local connection accepted");

                match ForwardSession::open(id, client, poll_interval).await {
                    Ok(session) => session.run(stream, chunk_size, session_shutdown).await,
                    Err(e) => {
                        tracing::warn!(
                            connection_id = %id,
                            peer_addr = %peer_addr,
                            error = %e,
                            "Could not create tunnel session, dropping connection"
                        );
                    }
                }
                drop(guard);
            });
        }

        Ok(())
    }
}
