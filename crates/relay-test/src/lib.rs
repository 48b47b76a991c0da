//! # Relay Test
//!
//! Test utilities for Relay workers and hubs, without real network
//! connections or port binding.
//!
//! ## Key Features
//!
//! - **Memory sockets**: script the frames a worker reads, inspect the
//!   frames it writes and count how often it closes the socket
//! - **Fault injection**: failing reads, failing writes, peer hang-up
//! - **WebSocket pipes**: a real tungstenite client connected to a worker
//!   through `tokio::io::duplex`
//! - **Polling assertions** for effects that happen on other tasks
//!
//! ## Example
//!
//! ```ignore
//! use relay_test::{eventually, memory_socket};
//! use relay_ws::{Worker, WorkerConfig};
//! use std::time::Duration;
//!
//! #[tokio::test]
//! async fn test_read_error_closes_worker() {
//!     let (socket, handle) = memory_socket();
//!     let worker = Worker::new(socket, WorkerConfig::default());
//!
//!     handle.fail_read("connection reset");
//!
//!     assert!(eventually(Duration::from_secs(1), || worker.is_closed()).await);
//!     assert_eq!(handle.close_count(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod pipe;
mod socket;
mod wait;

pub use error::TestError;
pub use pipe::{ws_pipe, PipeClient, PIPE_BUFFER};
pub use socket::{memory_socket, MemorySocket, SocketHandle};
pub use wait::{eventually, wait_for, POLL_INTERVAL};
