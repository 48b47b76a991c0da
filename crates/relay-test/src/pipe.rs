//! Real WebSocket connections over in-process pipes.

use relay_ws::{complete_upgrade, Worker, WorkerConfig};
use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;
use tungstenite::protocol::Role;

/// Buffer size of each direction of the pipe.
pub const PIPE_BUFFER: usize = 64 * 1024;

/// The client end of a [`ws_pipe`].
pub type PipeClient = WebSocketStream<DuplexStream>;

/// Connect a worker to a WebSocket client through `tokio::io::duplex`.
///
/// The worker speaks the server role with the protocol limits from
/// `config`; the returned client speaks the client role and masks its
/// frames like a browser would.
pub async fn ws_pipe(config: WorkerConfig) -> (Worker, PipeClient) {
    let (client_io, server_io) = tokio::io::duplex(PIPE_BUFFER);
    let worker = complete_upgrade(server_io, config).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    (worker, client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    #[tokio::test]
    async fn test_pipe_carries_frames_both_ways() {
        let (worker, mut client) = ws_pipe(WorkerConfig::default()).await;
        let mut messages = worker.messages().unwrap();

        client.send(tungstenite::Message::text("hi")).await.unwrap();
        let envelope = messages.next().await.unwrap();
        assert_eq!(envelope.as_text(), Some("hi"));

        worker.write_text("there").await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, tungstenite::Message::text("there"));
    }
}
