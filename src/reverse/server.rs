//! Reverse proxy HTTP surface.
//!
//! # Responsibilities
//! - Create Axum Router for create/relay/close under the route prefix
//! - Wire up middleware (tracing, limits, request ID, timeout)
//! - Dial the destination on create and hand sessions to the registry
//! - Translate relay outcomes into status codes

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ReverseConfig;
use crate::http::TunnelRequestId;
use crate::net::tls::load_tls_config;
use crate::observability::metrics::{self, Side};
use crate::reverse::registry::{RegistryError, RegistrySettings, SessionRegistry};
use crate::reverse::session::RelayError;
use crate::tunnel::wire::{self, CLOSE_PATH, CREATE_PATH, LEGACY_RELAY_PATH, OCTET_STREAM, RELAY_PATH, SESSION_HEADER};
use crate::tunnel::SessionKey;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub destination: Arc<str>,
    pub connect_timeout: Duration,
    pub max_body_size: usize,
}

/// HTTP endpoint that owns the session registry.
pub struct ReverseProxy {
    router: Router,
    config: ReverseConfig,
    registry: SessionRegistry,
}

impl ReverseProxy {
    /// Build the router and start the registry actor. Needs a Tokio runtime.
    pub fn new(config: ReverseConfig) -> Self {
        let registry = SessionRegistry::spawn(RegistrySettings::from(&config));
        let state = AppState {
            registry: registry.clone(),
            destination: Arc::from(config.destination.as_str()),
            connect_timeout: config.connect_timeout(),
            max_body_size: config.max_body_size,
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            registry,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ReverseConfig, state: AppState) -> Router {
        let prefix = config.prefix.as_str();
        Router::new()
            .route(&wire::join_path(prefix, CREATE_PATH), post(create_session))
            .route(&wire::join_path(prefix, CLOSE_PATH), post(close_session))
            .route(&wire::join_path(prefix, RELAY_PATH), post(relay))
            .route(&wire::join_path(prefix, LEGACY_RELAY_PATH), post(relay))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(TunnelRequestId))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.max_body_size))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs))),
            )
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            destination = %self.config.destination,
            prefix = %self.config.prefix,
            tls = self.config.tls.is_some(),
            "Reverse proxy starting"
        );

        if let Some(tls) = &self.config.tls {
            let tls_config = load_tls_config(tls).await?;
            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                let _ = shutdown.recv().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
            });

            axum_server::from_tcp_rustls(listener.into_std()?, tls_config)
                .handle(handle)
                .serve(self.router.into_make_service())
                .await?;
        } else {
            axum::serve(listener, self.router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.recv().await;
                })
                .await?;
        }

        tracing::info!("Reverse proxy stopped");
        Ok(())
    }
}

fn octet_stream(key: &SessionKey, body: impl IntoResponse) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, OCTET_STREAM.to_string()),
            (SESSION_HEADER, key.to_string()),
        ],
        body,
    )
        .into_response()
}

/// `POST {prefix}/create`: dial the destination and register a session.
async fn create_session(State(state): State<AppState>, body: Body) -> Response {
    // The body once named the destination; it is now fixed by configuration.
    if let Err(e) = axum::body::to_bytes(body, state.max_body_size).await {
        tracing::warn!(error = %e, "Could not read create request body");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Could not read request body").into_response();
    }

    let dial = tokio::time::timeout(
        state.connect_timeout,
        TcpStream::connect(state.destination.as_ref()),
    )
    .await;
    let conn = match dial {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            tracing::error!(destination = %state.destination, error = %e, "Could not connect to destination");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Could not connect").into_response();
        }
        Err(_) => {
            tracing::error!(destination = %state.destination, "Timed out connecting to destination");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Could not connect").into_response();
        }
    };
    let _ = conn.set_nodelay(true);

    let key = SessionKey::generate();
    if let Err(e) = state.registry.create(key.clone(), conn).await {
        tracing::error!(session = key.short(), error = %e, "Could not register session");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Could not register session").into_response();
    }

    tracing::info!(session = key.short(), destination = %state.destination, "Session created");
    octet_stream(&key, key.to_string())
}

/// `POST {prefix}/`: relay one exchange for the session named in the header.
async fn relay(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    let key = match wire::session_key(&headers) {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(error = %e, "Relay request rejected");
            metrics::record_exchange(Side::Reverse, "bad_key");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(session = key.short(), error = %e, "Could not read relay body");
            metrics::record_exchange(Side::Reverse, "bad_body");
            return (StatusCode::BAD_REQUEST, "Could not read request body").into_response();
        }
    };

    match state.registry.relay(key.clone(), body).await {
        Ok(reply) => {
            metrics::record_exchange(Side::Reverse, "ok");
            octet_stream(&key, reply)
        }
        Err(e) => {
            let (status, outcome) = match e {
                RelayError::UnknownSession => (StatusCode::NOT_FOUND, "unknown"),
                RelayError::SessionDead => (StatusCode::GONE, "dead"),
                RelayError::RegistryClosed => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            };
            metrics::record_exchange(Side::Reverse, outcome);
            tracing::debug!(session = key.short(), error = %e, "Relay not delivered");
            (status, e.to_string()).into_response()
        }
    }
}

/// `POST {prefix}/close`: best-effort teardown.
async fn close_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let key = match wire::session_key(&headers) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!(error = %e, "Close request rejected");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match state.registry.close(key).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(RegistryError::UnknownSession) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    async fn echo_destination() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr.to_string()
    }

    fn proxy(destination: String, prefix: &str) -> ReverseProxy {
        ReverseProxy::new(ReverseConfig {
            destination,
            prefix: prefix.to_string(),
            read_timeout_ms: 300,
            ..ReverseConfig::default()
        })
    }

    fn post(uri: &str, key: Option<&str>, body: &'static [u8]) -> Request<Body> {
        let mut builder = Request::post(uri);
        if let Some(key) = key {
            builder = builder.header(SESSION_HEADER, key);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn body_of(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn create_then_relay() {
        let proxy = proxy(echo_destination().await, "/tun");
        let app = proxy.router();

        let response = app.clone().oneshot(post("/tun/create", None, b"ignored")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let key = String::from_utf8(body_of(response).await).unwrap();
        assert!(SessionKey::parse(&key).is_ok());
        assert_eq!(proxy.registry().len().await, 1);

        let response = app.clone().oneshot(post("/tun/", Some(&key), b"PING")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[&SESSION_HEADER], key.as_str());
        assert_eq!(response.headers()[header::CONTENT_TYPE], OCTET_STREAM);
        assert_eq!(body_of(response).await, b"PING");

        let response = app.clone().oneshot(post("/tun/ping", Some(&key), b"legacy")).await.unwrap();
        assert_eq!(body_of(response).await, b"legacy");

        let response = app.clone().oneshot(post("/tun/close", Some(&key), b"")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(proxy.registry().len().await, 0);

        let response = app.oneshot(post("/tun/", Some(&key), b"after")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_or_unknown_key() {
        let proxy = proxy(echo_destination().await, "");
        let app = proxy.router();

        let response = app.clone().oneshot(post("/", None, b"data")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_of(response).await.is_empty());

        let response = app.clone().oneshot(post("/", Some("bad key!"), b"data")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_of(response).await.is_empty());

        let response = app.clone().oneshot(post("/close", None, b"")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_of(response).await.is_empty());

        let unknown = SessionKey::generate();
        let response = app.oneshot(post("/", Some(unknown.as_str()), b"data")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(&SESSION_HEADER).is_none());

        assert_eq!(proxy.registry().len().await, 0);
    }

    #[tokio::test]
    async fn dial_failure_is_500() {
        // Bind then drop to get a port nobody listens on.
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let proxy = proxy(unused.to_string(), "");

        let response = proxy.router().oneshot(post("/create", None, b"")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(proxy.registry().len().await, 0);
    }
}
