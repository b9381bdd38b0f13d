//! Error types for the Gremlin runtime.

use gremlin_protocol::{CodecError, RequestId, StatusCode};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the session layer.
#[derive(Debug, Error)]
pub enum Error {
	/// Dialing or authenticating a connection did not finish within the handshake timeout.
	#[error("Handshake timed out after {0:?}")]
	HandshakeTimeout(std::time::Duration),

	/// The server rejected the configured credentials, or demanded credentials none were configured for.
	#[error("Authentication rejected: {0}")]
	AuthenticationRejected(String),

	/// A queued write was not flushed within the write deadline.
	#[error("Write timed out after {0:?}")]
	WriteTimeout(std::time::Duration),

	/// No traffic arrived within the read deadline.
	#[error("Read timed out after {0:?}")]
	ReadTimeout(std::time::Duration),

	/// The connection carrying the request failed before the response completed.
	#[error("Connection lost: {0}")]
	ConnectionLost(String),

	/// The connection is not accepting writes.
	#[error("Connection closed")]
	ConnectionClosed,

	/// A single response frame could not be decoded.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// No healthy connection exists and a new one could not be opened.
	#[error("Connection pool exhausted: {0}")]
	PoolExhausted(String),

	/// A request with the same id is already in flight.
	#[error("Duplicate request id: {0}")]
	DuplicateRequestId(RequestId),

	/// The caller's deadline elapsed before the response completed.
	#[error("Timeout: no complete response after {0:?}")]
	Timeout(std::time::Duration),

	/// The session manager has been stopped.
	#[error("Session manager stopped")]
	ManagerStopped,

	/// The request was abandoned before it resolved.
	#[error("Request cancelled")]
	Cancelled,

	/// The server answered with an error status.
	#[error("Server error {code}: {message}")]
	Server { code: StatusCode, message: String },

	/// Transport-level failure while dialing, reading, or writing.
	#[error("Transport error: {0}")]
	Transport(String),

	/// Request encoding failed.
	#[error("Codec error: {0}")]
	Codec(#[from] CodecError),

	/// The configuration failed validation.
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

impl Error {
	/// Returns true if this error was caused by a deadline elapsing.
	pub fn is_timeout(&self) -> bool {
		matches!(
			self,
			Error::HandshakeTimeout(_) | Error::WriteTimeout(_) | Error::ReadTimeout(_) | Error::Timeout(_)
		) || matches!(self, Error::Server { code, .. } if *code == StatusCode::SERVER_TIMEOUT)
	}

	/// Returns true if the request failed because its connection went away.
	///
	/// Such requests may be retried by the caller; the pool replaces the
	/// connection on the next lease.
	pub fn is_connection_error(&self) -> bool {
		matches!(
			self,
			Error::ConnectionLost(_) | Error::ConnectionClosed | Error::ReadTimeout(_) | Error::Transport(_)
		)
	}

	/// Returns the server status code if this is a server error.
	pub fn status_code(&self) -> Option<StatusCode> {
		match self {
			Error::Server { code, .. } => Some(*code),
			_ => None,
		}
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		Error::Transport(err.to_string())
	}
}
