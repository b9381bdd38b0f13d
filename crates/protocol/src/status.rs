//! Gremlin Server response status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status code attached to every response message.
///
/// Modelled as a transparent wrapper so codes unknown to this crate survive a
/// round trip through the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u16);

impl StatusCode {
	pub const SUCCESS: StatusCode = StatusCode(200);
	pub const NO_CONTENT: StatusCode = StatusCode(204);
	pub const PARTIAL_CONTENT: StatusCode = StatusCode(206);
	pub const UNAUTHORIZED: StatusCode = StatusCode(401);
	pub const AUTHENTICATE: StatusCode = StatusCode(407);
	pub const MALFORMED_REQUEST: StatusCode = StatusCode(498);
	pub const INVALID_REQUEST_ARGUMENTS: StatusCode = StatusCode(499);
	pub const SERVER_ERROR: StatusCode = StatusCode(500);
	pub const SCRIPT_EVALUATION_ERROR: StatusCode = StatusCode(597);
	pub const SERVER_TIMEOUT: StatusCode = StatusCode(598);
	pub const SERVER_SERIALIZATION_ERROR: StatusCode = StatusCode(599);

	/// Returns the numeric code.
	pub fn as_u16(self) -> u16 {
		self.0
	}

	/// Returns `true` for codes that carry result data (200, 204, 206).
	pub fn is_success(self) -> bool {
		matches!(self, Self::SUCCESS | Self::NO_CONTENT | Self::PARTIAL_CONTENT)
	}

	/// Returns `true` unless more chunks follow for the same request.
	pub fn is_final(self) -> bool {
		self != Self::PARTIAL_CONTENT
	}

	/// Returns `true` when the server is challenging the client for SASL credentials.
	pub fn is_auth_challenge(self) -> bool {
		self == Self::AUTHENTICATE
	}

	/// Short human-readable description of well-known codes.
	pub fn description(self) -> &'static str {
		match self {
			Self::SUCCESS => "success",
			Self::NO_CONTENT => "no content",
			Self::PARTIAL_CONTENT => "partial content",
			Self::UNAUTHORIZED => "unauthorized",
			Self::AUTHENTICATE => "authenticate",
			Self::MALFORMED_REQUEST => "malformed request",
			Self::INVALID_REQUEST_ARGUMENTS => "invalid request arguments",
			Self::SERVER_ERROR => "server error",
			Self::SCRIPT_EVALUATION_ERROR => "script evaluation error",
			Self::SERVER_TIMEOUT => "server timeout",
			Self::SERVER_SERIALIZATION_ERROR => "server serialization error",
			_ => "unknown status",
		}
	}
}

impl From<u16> for StatusCode {
	fn from(code: u16) -> Self {
		StatusCode(code)
	}
}

impl fmt::Display for StatusCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({})", self.0, self.description())
	}
}
