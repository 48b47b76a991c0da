//! End-to-end upgrade tests.
//!
//! A hyper HTTP/1 connection is served over an in-process pipe; a
//! tungstenite client performs the opening handshake and then talks to the
//! hub through the upgraded connection.

use std::convert::Infallible;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use bytes::Bytes;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use relay_test::wait_for;
use relay_ws::{
    upgrade_request, Envelope, Hub, UpgradeOptions, Worker, WorkerConfig, PROTOCOL_ATTRIBUTE,
};
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

const WAIT: Duration = Duration::from_secs(2);

fn options() -> UpgradeOptions {
    UpgradeOptions::new()
        .protocols(["chat.v1", "chat.v2"])
        .header("X-Relay-Node", "test")
}

/// Serve one HTTP connection, upgrading every request into `hub`.
fn serve(hub: Hub, options: UpgradeOptions) -> DuplexStream {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let service = service_fn(move |mut request: Request<Incoming>| {
        let hub = hub.clone();
        let options = options.clone();
        async move {
            let response: Response<Full<Bytes>> =
                upgrade_request(&mut request, &options, WorkerConfig::default(), hub);
            Ok::<_, Infallible>(response)
        }
    });
    tokio::spawn(async move {
        let _ = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(server_io), service)
            .with_upgrades()
            .await;
    });
    client_io
}

fn echo_hub() -> Hub {
    Hub::new(|_hub: Hub, envelope: Envelope| async move {
        let _ = envelope.reply(envelope.payload().clone()).await;
    })
}

#[tokio::test]
async fn test_handshake_then_echo() {
    let hub = echo_hub();
    let io = serve(hub.clone(), options());

    let mut request = "ws://localhost/ws".into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("chat.v3, chat.v1"));
    let (mut client, response) = tokio_tungstenite::client_async(request, io).await.unwrap();

    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(response.headers()["sec-websocket-protocol"], "chat.v1");
    assert_eq!(response.headers()["x-relay-node"], "test");

    wait_for("worker registered", WAIT, || hub.len() == 1).await.unwrap();
    let worker: Worker = hub.workers().remove(0);
    assert_eq!(worker.attribute(PROTOCOL_ATTRIBUTE).as_deref(), Some("chat.v1"));

    client.send(tungstenite::Message::text("ping?")).await.unwrap();
    let echoed = tokio::time::timeout(WAIT, client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(echoed, tungstenite::Message::text("ping?"));

    client.close(None).await.unwrap();
    wait_for("worker deregistered", WAIT, || hub.is_empty()).await.unwrap();
    assert!(worker.is_closed());
}

#[tokio::test]
async fn test_plain_http_request_is_rejected() {
    let hub = echo_hub();
    let io = serve(hub.clone(), options());

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .unwrap();
    tokio::spawn(connection);

    let request = Request::builder()
        .uri("/ws")
        .header("host", "localhost")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = sender.send_request(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(hub.is_empty());
}

#[tokio::test]
async fn test_closed_hub_closes_upgraded_socket() {
    let hub = echo_hub();
    hub.close();
    let io = serve(hub.clone(), UpgradeOptions::default());

    let (mut client, _response) = tokio_tungstenite::client_async("ws://localhost/ws", io)
        .await
        .unwrap();

    // The hub refuses the worker, which closes with "try again later".
    let frame = tokio::time::timeout(WAIT, client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        tungstenite::Message::Close(Some(close)) => {
            assert_eq!(u16::from(close.code), 1013);
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}
