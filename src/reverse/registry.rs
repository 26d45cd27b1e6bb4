//! Session registry actor.
//!
//! # Responsibilities
//! - Own the key → session map; nothing else reads or mutates it
//! - Route relay packets to the owning session's inbox
//! - Evict dead and idle sessions
//!
//! # Design Decisions
//! - Commands are typed messages on one channel, handled one at a time
//! - The actor never awaits destination I/O; each session task does, so
//!   unrelated sessions relay concurrently while one key stays ordered

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::config::ReverseConfig;
use crate::reverse::session::{ProxyPacket, RelayError, Session};
use crate::tunnel::SessionKey;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session key already registered")]
    KeyInUse,

    #[error("no session for this key")]
    UnknownSession,

    #[error("session registry is not running")]
    Closed,
}

/// Tunables for the registry and the sessions it spawns.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    pub read_timeout: Duration,
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
}

impl From<&ReverseConfig> for RegistrySettings {
    fn from(config: &ReverseConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            idle_ttl: config.session_idle(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

enum Command {
    Create {
        key: SessionKey,
        conn: TcpStream,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Relay {
        key: SessionKey,
        packet: ProxyPacket,
    },
    Close {
        key: SessionKey,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the registry actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionRegistry {
    /// Start the actor on the current Tokio runtime.
    pub fn spawn(settings: RegistrySettings) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let actor = RegistryActor {
            sessions: HashMap::new(),
            settings,
        };
        tokio::spawn(actor.run(rx));
        Self { commands }
    }

    /// Register a freshly dialed destination connection under `key`.
    pub async fn create(&self, key: SessionKey, conn: TcpStream) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Create { key, conn, reply })
            .map_err(|_| RegistryError::Closed)?;
        rx.await.map_err(|_| RegistryError::Closed)?
    }

    /// Relay `body` to the session's destination and wait for the read-back.
    pub async fn relay(&self, key: SessionKey, body: Bytes) -> Result<Bytes, RelayError> {
        let (packet, rx) = ProxyPacket::new(body);
        self.commands
            .send(Command::Relay { key, packet })
            .map_err(|_| RelayError::RegistryClosed)?;
        rx.await.map_err(|_| RelayError::RegistryClosed)?
    }

    /// Drop the session; its destination connection closes once queued
    /// packets are done.
    pub async fn close(&self, key: SessionKey) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Close { key, reply })
            .map_err(|_| RegistryError::Closed)?;
        rx.await.map_err(|_| RegistryError::Closed)?
    }

    /// Number of registered sessions, dead ones included until swept.
    pub async fn len(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Len { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

struct SessionHandle {
    inbox: mpsc::UnboundedSender<ProxyPacket>,
    dead: Arc<AtomicBool>,
    last_seen: Instant,
}

struct RegistryActor {
    sessions: HashMap<SessionKey, SessionHandle>,
    settings: RegistrySettings,
}

impl RegistryActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.dispatch(command),
                    None => break,
                },
                _ = sweep.tick() => {
                    let evicted = self.sweep(Instant::now());
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.sessions.len(), "Sweep finished");
                    }
                }
            }
        }
        tracing::debug!(sessions = self.sessions.len(), "Session registry stopped");
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Create { key, conn, reply } => {
                let _ = reply.send(self.create(key, conn));
            }
            Command::Relay { key, packet } => self.route(key, packet),
            Command::Close { key, reply } => {
                let result = match self.sessions.remove(&key) {
                    Some(_) => {
                        tracing::info!(session = key.short(), "Session closed by peer");
                        Ok(())
                    }
                    None => Err(RegistryError::UnknownSession),
                };
                let _ = reply.send(result);
            }
            Command::Len { reply } => {
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    fn create(&mut self, key: SessionKey, conn: TcpStream) -> Result<(), RegistryError> {
        if self.sessions.contains_key(&key) {
            tracing::error!(session = key.short(), "Session key collision, refusing to register");
            return Err(RegistryError::KeyInUse);
        }

        let session = Session::new(key.clone(), conn, self.settings.read_timeout);
        let dead = session.dead_flag();
        let inbox = session.spawn();
        self.sessions.insert(
            key.clone(),
            SessionHandle {
                inbox,
                dead,
                last_seen: Instant::now(),
            },
        );
        tracing::debug!(session = key.short(), sessions = self.sessions.len(), "Session registered");
        Ok(())
    }

    fn route(&mut self, key: SessionKey, packet: ProxyPacket) {
        let Some(handle) = self.sessions.get_mut(&key) else {
            tracing::warn!(session = key.short(), "No session for key, packet dropped");
            packet.complete(Err(RelayError::UnknownSession));
            return;
        };

        handle.last_seen = Instant::now();
        if let Err(mpsc::error::SendError(packet)) = handle.inbox.send(packet) {
            self.sessions.remove(&key);
            packet.complete(Err(RelayError::SessionDead));
        }
    }

    /// Evict dead sessions and those idle past the TTL.
    fn sweep(&mut self, now: Instant) -> usize {
        let idle_ttl = self.settings.idle_ttl;
        let before = self.sessions.len();
        self.sessions.retain(|key, handle| {
            let dead = handle.dead.load(Ordering::Acquire);
            let idle = now.saturating_duration_since(handle.last_seen) >= idle_ttl;
            if dead || idle {
                tracing::info!(session = key.short(), dead, idle, "Session evicted");
            }
            !(dead || idle)
        });
        before - self.sessions.len()
    }
}
