//! Gremlin Runtime - connections, correlation, and pooling
//!
//! This crate provides the machinery underneath the session manager:
//!
//! - **Transport**: persistent duplex frame streams (WebSocket, or in-memory for tests)
//! - **Connection**: one authenticated stream with its reader, writer, and keepalive tasks
//! - **Registry**: correlation of response chunks with the callers waiting for them
//! - **Pool**: bounded set of shared connections with idle eviction
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  gremlin-rs  │  SessionManager (execute / execute_async / stop)
//! └──────┬───────┘
//!        │ register + lease
//! ┌──────▼───────┐
//! │   Registry   │  request id -> waiter
//! │   Pool       │  bounded set of shared connections
//! │   Conn x n   │  reader / writer / keepalive tasks
//! │   Transport  │  WebSocket or in-memory frames
//! └──────────────┘
//! ```

pub mod chunk;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod registry;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// Re-export key types at crate root
pub use chunk::ResponseChunk;
pub use config::{Credentials, SessionConfig, SessionConfigBuilder};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{Error, Result};
pub use pool::{Pool, PoolStats};
pub use registry::{ChunkSender, CollectReceiver, DeliveryMode, Registry, Resolution, ResultSink};
pub use transport::{
	DialSettings, Frame, TransportFactory, TransportFuture, TransportParts, TransportReceiver, TransportSender,
	WebSocketTransportFactory,
};
