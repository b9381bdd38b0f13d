//! gremlin: pooled Gremlin client over WebSocket
//!
//! This crate provides the public API for querying a Gremlin Server, or a
//! Gremlin-compatible managed graph database, from async Rust. A
//! [`SessionManager`] hides connection lifecycle, authentication, keepalive,
//! and multiplexing: callers issue traversals and receive their response
//! chunks.
//!
//! # Examples
//!
//! ## Collecting a response
//!
//! ```ignore
//! use gremlin::{SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder().build()?;
//!     let session = SessionManager::new("ws://localhost:8182/gremlin", config)?;
//!
//!     let chunks = session.execute("g.V().hasLabel('person').values('name')").await?;
//!     for chunk in &chunks {
//!         println!("{}", chunk.payload);
//!     }
//!
//!     session.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming a large result
//!
//! ```ignore
//! use gremlin::{SessionConfig, SessionManager};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = SessionManager::new("ws://localhost:8182/gremlin", SessionConfig::default())?;
//!
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     session.execute_async("g.V()", tx).await?;
//!
//!     // The channel closes after the final chunk or the first error.
//!     while let Some(chunk) = rx.recv().await {
//!         let chunk = chunk?;
//!         println!("{} (final: {})", chunk.payload, chunk.is_final);
//!     }
//!
//!     session.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Parameter bindings
//!
//! ```ignore
//! use serde_json::{Map, json};
//!
//! let mut bindings = Map::new();
//! bindings.insert("name".to_string(), json!("marko"));
//! let chunks = session
//!     .execute_with_bindings("g.V().has('person', 'name', name)", bindings)
//!     .await?;
//! ```

mod session;

pub use gremlin_protocol as protocol;
pub use gremlin_protocol::{RequestId, StatusCode};
pub use gremlin_runtime as runtime;
pub use gremlin_runtime::{
	ChunkSender, Credentials, Error, PoolStats, ResponseChunk, Result, SessionConfig, SessionConfigBuilder,
	TransportFactory,
};
pub use session::{SessionManager, SessionStats};
