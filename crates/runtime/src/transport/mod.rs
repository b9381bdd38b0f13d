//! Transport abstraction over a persistent duplex frame stream.
//!
//! A [`TransportFactory`] dials the server and returns the two halves of a
//! connection: a [`TransportSender`] owned by the connection's writer task and
//! a [`TransportReceiver`] owned by its read loop. The default factory speaks
//! WebSocket; [`memory`] provides an in-process pair used for tests and
//! embedding.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

pub mod memory;
mod websocket;

pub use websocket::{WebSocketReceiver, WebSocketSender, WebSocketTransportFactory};

/// Boxed future returned by transport trait methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
	Binary(Vec<u8>),
	Text(String),
	Ping(Vec<u8>),
	Pong(Vec<u8>),
	Close,
}

impl Frame {
	/// Returns the payload of a data frame (binary or text).
	pub fn data(&self) -> Option<&[u8]> {
		match self {
			Frame::Binary(bytes) => Some(bytes),
			Frame::Text(text) => Some(text.as_bytes()),
			_ => None,
		}
	}
}

/// Settings handed to a [`TransportFactory`] when dialing.
#[derive(Debug, Clone)]
pub struct DialSettings {
	/// Server endpoint, e.g. `ws://localhost:8182/gremlin`.
	pub url: String,
	pub read_buffer_size: usize,
	pub write_buffer_size: usize,
}

/// Write half of a transport.
pub trait TransportSender: Send {
	/// Writes and flushes one frame.
	fn send(&mut self, frame: Frame) -> TransportFuture<'_, Result<()>>;

	/// Performs the closing handshake.
	fn close(&mut self) -> TransportFuture<'_, Result<()>>;
}

/// Read half of a transport.
pub trait TransportReceiver: Send {
	/// Receives the next frame; `None` once the stream has ended.
	fn recv(&mut self) -> TransportFuture<'_, Option<Result<Frame>>>;
}

/// Both halves of a freshly opened transport.
pub struct TransportParts {
	pub sender: Box<dyn TransportSender>,
	pub receiver: Box<dyn TransportReceiver>,
}

/// Opens transports. Replaced in tests to substitute the network.
pub trait TransportFactory: Send + Sync + fmt::Debug {
	fn open<'a>(&'a self, settings: &'a DialSettings) -> TransportFuture<'a, Result<TransportParts>>;
}

#[cfg(test)]
mod tests;
