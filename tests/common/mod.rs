//! Shared utilities for integration testing.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::State,
    http::{header::HOST, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use httptun::config::{ForwardConfig, RemoteConfig, ReverseConfig};
use httptun::net::{ConnectionTracker, Listener};
use httptun::reverse::SessionRegistry;
use httptun::tunnel::SessionKey;
use httptun::{ForwardProxy, ReverseProxy, Shutdown};

/// Destination that echoes every byte back.
pub async fn start_echo_destination() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Destination that answers `PING` with `PONG`.
pub async fn start_pong_destination() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                while socket.read_exact(&mut buf).await.is_ok() {
                    if &buf == b"PING" && socket.write_all(b"PONG").await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Destination that reads one message, says `BYE` and hangs up.
pub async fn start_hangup_destination() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                if socket.read(&mut buf).await.is_ok() {
                    let _ = socket.write_all(b"BYE").await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
}

pub struct ReverseHandle {
    pub addr: SocketAddr,
    pub registry: SessionRegistry,
    pub shutdown: Shutdown,
}

impl ReverseHandle {
    pub fn url(&self, prefix: &str) -> String {
        format!("http://{}{}", self.addr, prefix)
    }
}

/// Run a reverse proxy on an ephemeral port.
pub async fn start_reverse(destination: SocketAddr, prefix: &str) -> ReverseHandle {
    let config = ReverseConfig {
        destination: destination.to_string(),
        prefix: prefix.to_string(),
        read_timeout_ms: 100,
        ..ReverseConfig::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let proxy = ReverseProxy::new(config);
    let registry = proxy.registry();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move { proxy.run(listener, rx).await });

    ReverseHandle {
        addr,
        registry,
        shutdown,
    }
}

pub struct ForwardHandle {
    pub addr: SocketAddr,
    pub connections: ConnectionTracker,
    pub shutdown: Shutdown,
}

/// HTTP client that ignores proxy environment variables.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Run a forward proxy on an ephemeral port with a short poll interval.
pub async fn start_forward(remote: String) -> ForwardHandle {
    start_forward_with(vec![RemoteConfig {
        url: remote,
        fronting_domain: None,
    }])
    .await
}

pub async fn start_forward_with(remotes: Vec<RemoteConfig>) -> ForwardHandle {
    let config = ForwardConfig {
        remotes,
        poll_interval_ms: 20,
        ..ForwardConfig::default()
    };
    let listener = Listener::bind("127.0.0.1:0", 16).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let proxy = ForwardProxy::with_client(config, http_client()).unwrap();
    let connections = proxy.connections();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move { proxy.run(listener, rx).await });

    ForwardHandle {
        addr,
        connections,
        shutdown,
    }
}

/// Fake reverse proxy whose relay answers carry someone else's session key.
/// Returns its address and a counter of relay requests served.
pub async fn start_foreign_reverse() -> (SocketAddr, Arc<AtomicUsize>) {
    let relays = Arc::new(AtomicUsize::new(0));
    let counter = relays.clone();

    let app = Router::new()
        .route(
            "/create",
            post(|| async { SessionKey::generate().to_string() }),
        )
        .route(
            "/",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let other = SessionKey::generate().to_string();
                    (StatusCode::OK, [("x-session-id", other)], "LEAK").into_response()
                }
            }),
        )
        .route("/close", post(|| async { StatusCode::OK }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (addr, relays)
}

#[derive(Clone, Default)]
struct Recorder {
    upstream: Arc<Mutex<Vec<u8>>>,
    hosts: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn note_host(&self, headers: &HeaderMap) {
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.hosts.lock().unwrap().push(host);
    }
}

async fn record_create(State(rec): State<Recorder>, headers: HeaderMap) -> String {
    rec.note_host(&headers);
    SessionKey::generate().to_string()
}

async fn record_relay(
    State(rec): State<Recorder>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    rec.note_host(&headers);
    rec.upstream.lock().unwrap().extend_from_slice(&body);
    let key = headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (StatusCode::OK, [("x-session-id", key)], Bytes::new())
}

async fn record_close(State(rec): State<Recorder>, headers: HeaderMap) -> StatusCode {
    rec.note_host(&headers);
    StatusCode::OK
}

/// Fake reverse proxy that accepts any key, answers with no data and keeps
/// every relayed byte and every Host header it saw. Survives restarts on
/// the same port.
pub struct RecordingReverse {
    pub addr: SocketAddr,
    recorder: Recorder,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RecordingReverse {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut fake = Self {
            addr: listener.local_addr().unwrap(),
            recorder: Recorder::default(),
            stop: None,
            task: None,
        };
        fake.serve(listener);
        fake
    }

    fn serve(&mut self, listener: TcpListener) {
        let app = Router::new()
            .route("/create", post(record_create))
            .route("/", post(record_relay))
            .route("/close", post(record_close))
            .with_state(self.recorder.clone());
        let (stop, stopped) = oneshot::channel::<()>();
        self.stop = Some(stop);
        self.task = Some(tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                })
                .await;
        }));
    }

    /// Stop listening and close every connection.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("fake reverse proxy did not stop")
                .unwrap();
        }
    }

    /// Serve again on the same port.
    pub async fn restart(&mut self) {
        let listener = TcpListener::bind(self.addr).await.unwrap();
        self.serve(listener);
    }

    pub fn upstream(&self) -> Vec<u8> {
        self.recorder.upstream.lock().unwrap().clone()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.recorder.hosts.lock().unwrap().clone()
    }

    /// Poll until exactly `expected` has been relayed upstream.
    pub async fn wait_for_upstream(&self, expected: &[u8], wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.upstream() == expected {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

/// Read exactly `n` bytes or fail the test after `wait`.
pub async fn read_n(stream: &mut TcpStream, n: usize, wait: Duration) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(wait, stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for tunnel data")
        .expect("local connection failed");
    buf
}

/// Poll `check` until it holds or `wait` passes.
pub async fn eventually<F, Fut>(wait: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check().await
}
