//! WebSocket HTTP upgrade handling.
//!
//! This module turns an HTTP upgrade request into a running [`Worker`]
//! according to RFC 6455. [`upgrade_request`] is the one-call entry point
//! for hyper services: it validates the request, returns the response to
//! send, and once hyper hands over the connection it starts a worker and
//! passes it to a [`WorkerHandler`]. A failed upgrade never builds a
//! worker.

use std::future::Future;

use base64::Engine;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::header::{self, HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, instrument, warn};

use crate::config::WorkerConfig;
use crate::error::{CloseCode, WsError, WsResult};
use crate::hub::Hub;
use crate::worker::Worker;

/// The WebSocket magic GUID used in the handshake.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Attribute under which the negotiated subprotocol is stored on a worker.
pub const PROTOCOL_ATTRIBUTE: &str = "protocol";

/// Options applied to every upgrade response.
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Subprotocols the server accepts, in preference order of the client.
    pub allowed_protocols: Vec<String>,
    /// Extra headers copied onto the 101 response.
    pub headers: Vec<(String, String)>,
    /// Add `Access-Control-Allow-*` headers to the 101 response.
    pub cors: bool,
}

impl UpgradeOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the given subprotocols.
    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Add a header to the 101 response.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Enable or disable CORS headers.
    pub fn cors(mut self, enabled: bool) -> Self {
        self.cors = enabled;
        self
    }
}

/// Check if a request is a WebSocket upgrade request.
///
/// A valid WebSocket upgrade request must have:
/// - `Connection: Upgrade` header
/// - `Upgrade: websocket` header
/// - `Sec-WebSocket-Key` header
/// - `Sec-WebSocket-Version: 13` header
pub fn is_websocket_request<B>(request: &Request<B>) -> bool {
    validate_upgrade_request(request).is_ok()
}

fn header_str<'a, B>(request: &'a Request<B>, name: impl header::AsHeaderName) -> Option<&'a str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Get the requested subprotocols from the request.
pub fn get_websocket_protocols<B>(request: &Request<B>) -> Vec<String> {
    request
        .headers()
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(',').map(str::trim))
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Compute the Sec-WebSocket-Accept value from the key.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Validate a WebSocket upgrade request.
///
/// Returns the accept key if valid, or an error describing why it's invalid.
#[instrument(skip(request))]
pub fn validate_upgrade_request<B>(request: &Request<B>) -> WsResult<String> {
    let has_upgrade = header_str(request, header::CONNECTION)
        .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")));
    if !has_upgrade {
        return Err(WsError::not_websocket("missing Connection: Upgrade header"));
    }

    let is_websocket =
        header_str(request, header::UPGRADE).is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if !is_websocket {
        return Err(WsError::not_websocket("missing Upgrade: websocket header"));
    }

    let key = header_str(request, header::SEC_WEBSOCKET_KEY)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| WsError::not_websocket("missing Sec-WebSocket-Key header"))?;

    if header_str(request, header::SEC_WEBSOCKET_VERSION) != Some("13") {
        return Err(WsError::not_websocket(
            "missing or invalid Sec-WebSocket-Version header (must be 13)",
        ));
    }

    Ok(compute_accept_key(key))
}

fn cors_origin<B>(request: &Request<B>) -> String {
    let origins: Vec<&str> = request
        .headers()
        .get_all(header::ORIGIN)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if origins.is_empty() {
        "*".to_string()
    } else {
        origins.join(";")
    }
}

fn insert_header(response: &mut Response<Full<Bytes>>, name: &str, value: &str) -> WsResult<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| WsError::handshake_failed(format!("invalid header name {name:?}: {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| WsError::handshake_failed(format!("invalid value for header {name}: {e}")))?;
    response.headers_mut().append(name, value);
    Ok(())
}

fn create_upgrade_response<B>(
    request: &Request<B>,
    accept_key: &str,
    protocol: Option<&str>,
    options: &UpgradeOptions,
) -> WsResult<Response<Full<Bytes>>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    insert_header(&mut response, header::CONNECTION.as_str(), "Upgrade")?;
    insert_header(&mut response, header::UPGRADE.as_str(), "websocket")?;
    insert_header(&mut response, header::SEC_WEBSOCKET_ACCEPT.as_str(), accept_key)?;
    if let Some(protocol) = protocol {
        insert_header(&mut response, header::SEC_WEBSOCKET_PROTOCOL.as_str(), protocol)?;
    }

    if options.cors {
        insert_header(
            &mut response,
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS.as_str(),
            "true",
        )?;
        insert_header(
            &mut response,
            header::ACCESS_CONTROL_ALLOW_ORIGIN.as_str(),
            &cors_origin(request),
        )?;
    }

    for (name, value) in &options.headers {
        insert_header(&mut response, name, value)?;
    }

    Ok(response)
}

fn error_response(status: StatusCode, reason: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(reason.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    response
}

/// A WebSocket upgrade result.
///
/// Contains the response to send and, on success, the negotiated
/// subprotocol.
#[derive(Debug)]
pub struct WebSocketUpgrade {
    /// The response to send to the client.
    pub response: Response<Full<Bytes>>,
    /// The selected subprotocol, if any.
    pub protocol: Option<String>,
    /// Whether the upgrade was successful.
    pub success: bool,
}

impl WebSocketUpgrade {
    fn success(response: Response<Full<Bytes>>, protocol: Option<String>) -> Self {
        Self {
            response,
            protocol,
            success: true,
        }
    }

    fn failure(response: Response<Full<Bytes>>) -> Self {
        Self {
            response,
            protocol: None,
            success: false,
        }
    }
}

/// Prepare a WebSocket upgrade.
///
/// Validates the request and builds a `101 Switching Protocols` response,
/// or a `400 Bad Request` when the request is not a valid upgrade. The
/// selected subprotocol is the first requested one that appears in
/// `options.allowed_protocols`.
#[instrument(skip(request, options))]
pub fn prepare_upgrade<B>(request: &Request<B>, options: &UpgradeOptions) -> WebSocketUpgrade {
    let accept_key = match validate_upgrade_request(request) {
        Ok(key) => key,
        Err(e) => {
            debug!(error = %e, "websocket upgrade validation failed");
            return WebSocketUpgrade::failure(error_response(StatusCode::BAD_REQUEST, &e.to_string()));
        }
    };

    let selected_protocol = get_websocket_protocols(request).into_iter().find(|p| {
        options
            .allowed_protocols
            .iter()
            .any(|a| a.eq_ignore_ascii_case(p))
    });

    match create_upgrade_response(request, &accept_key, selected_protocol.as_deref(), options) {
        Ok(response) => WebSocketUpgrade::success(response, selected_protocol),
        Err(e) => {
            warn!(error = %e, "failed to build websocket upgrade response");
            WebSocketUpgrade::failure(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "invalid upgrade response headers",
            ))
        }
    }
}

/// Complete a WebSocket upgrade on an already-switched stream.
///
/// Call this after the 101 response has been sent. The stream is wrapped in
/// the WebSocket protocol configured from `config` and handed to a new
/// worker.
pub async fn complete_upgrade<S>(stream: S, config: WorkerConfig) -> Worker
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let protocol = config.protocol_config();
    let ws_stream = WebSocketStream::from_raw_socket(
        stream,
        tungstenite::protocol::Role::Server,
        Some(protocol),
    )
    .await;

    Worker::new(ws_stream, config)
}

/// Receives every worker produced by [`upgrade_request`].
///
/// Implemented for every `Fn(Worker) -> impl Future<Output = ()>`, and for
/// [`Hub`], which registers the worker.
pub trait WorkerHandler: Send + Sync + 'static {
    /// Take ownership of a freshly upgraded worker.
    fn handle(&self, worker: Worker) -> BoxFuture<'static, ()>;
}

impl<F, Fut> WorkerHandler for F
where
    F: Fn(Worker) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, worker: Worker) -> BoxFuture<'static, ()> {
        self(worker).boxed()
    }
}

impl WorkerHandler for Hub {
    fn handle(&self, worker: Worker) -> BoxFuture<'static, ()> {
        let hub = self.clone();
        async move {
            if let Err(e) = hub.add_connection(&worker) {
                warn!(hub = %hub.name(), connection_id = %worker.id(), error = %e, "hub refused worker");
                let _ = worker
                    .close_with(CloseCode::TryAgainLater, e.to_string())
                    .await;
            }
        }
        .boxed()
    }
}

/// Upgrade a hyper request and hand the resulting worker to `handler`.
///
/// Returns the response to send for this request. When the request is a
/// valid upgrade, a task waits for hyper to release the connection, wraps
/// it in a worker and calls `handler`. If the request is invalid or the
/// connection is never released, no worker is built and `handler` is not
/// called.
///
/// The connection must be served with upgrades enabled
/// (`hyper::server::conn::http1::Builder::serve_connection(..).with_upgrades()`).
pub fn upgrade_request<B, H>(
    request: &mut Request<B>,
    options: &UpgradeOptions,
    config: WorkerConfig,
    handler: H,
) -> Response<Full<Bytes>>
where
    H: WorkerHandler,
{
    let upgrade = prepare_upgrade(request, options);
    if !upgrade.success {
        return upgrade.response;
    }

    let on_upgrade = hyper::upgrade::on(request);
    let protocol = upgrade.protocol;
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let worker = complete_upgrade(TokioIo::new(upgraded), config).await;
                if let Some(protocol) = protocol {
                    worker.set_attribute(PROTOCOL_ATTRIBUTE, protocol);
                }
                debug!(connection_id = %worker.id(), "websocket upgrade complete");
                handler.handle(worker).await;
            }
            Err(e) => warn!(error = %e, "websocket upgrade failed"),
        }
    });

    upgrade.response
}
