//! Codec boundary between protocol messages and transport frames.
//!
//! The session layer treats encoding as opaque: it hands a [`RequestMessage`]
//! to a [`Codec`] and gets bytes back, and turns inbound bytes into a
//! [`ResponseMessage`]. [`GraphSonCodec`] is the default implementation.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::request::{RequestId, RequestMessage};
use crate::response::ResponseMessage;

/// Mime type announced on every binary request frame.
pub const GRAPHSON_V2_MIME: &str = "application/vnd.gremlin-v2.0+json";

/// Errors produced while encoding requests or decoding responses.
#[derive(Debug, Error)]
pub enum CodecError {
	/// The request could not be serialized.
	#[error("failed to encode request: {0}")]
	Encode(#[from] serde_json::Error),

	/// The mime type does not fit the one-byte length prefix.
	#[error("mime type is {0} bytes, the frame header allows at most 255")]
	MimeTooLong(usize),

	/// An inbound frame could not be decoded.
	///
	/// `request_id` is recovered from the raw frame when possible so the
	/// failure can be attributed to a single request.
	#[error("malformed response frame: {reason}")]
	Malformed { request_id: Option<RequestId>, reason: String },
}

impl CodecError {
	/// Request id a decode failure belongs to, if it could be recovered.
	pub fn request_id(&self) -> Option<RequestId> {
		match self {
			CodecError::Malformed { request_id, .. } => *request_id,
			_ => None,
		}
	}
}

/// Encodes requests into frame payloads and decodes response frames.
pub trait Codec: Send + Sync + fmt::Debug {
	/// Mime type of the serialization format.
	fn mime_type(&self) -> &str;

	/// Encodes a request into the bytes of one binary frame.
	fn encode(&self, request: &RequestMessage) -> Result<Vec<u8>, CodecError>;

	/// Decodes the payload of one inbound frame.
	fn decode(&self, frame: &[u8]) -> Result<ResponseMessage, CodecError>;
}

/// GraphSON (JSON) codec.
///
/// Binary request frames are laid out as `[mime length: u8][mime][json]`;
/// responses are plain JSON.
#[derive(Debug, Clone)]
pub struct GraphSonCodec {
	mime_type: String,
}

impl Default for GraphSonCodec {
	fn default() -> Self {
		Self {
			mime_type: GRAPHSON_V2_MIME.to_string(),
		}
	}
}

impl GraphSonCodec {
	/// Creates a codec announcing a custom mime type (e.g. GraphSON v3).
	pub fn with_mime_type(mime_type: impl Into<String>) -> Self {
		Self {
			mime_type: mime_type.into(),
		}
	}
}

impl Codec for GraphSonCodec {
	fn mime_type(&self) -> &str {
		&self.mime_type
	}

	fn encode(&self, request: &RequestMessage) -> Result<Vec<u8>, CodecError> {
		let mime = self.mime_type.as_bytes();
		let mime_len = u8::try_from(mime.len()).map_err(|_| CodecError::MimeTooLong(mime.len()))?;
		let body = serde_json::to_vec(request)?;

		let mut frame = Vec::with_capacity(1 + mime.len() + body.len());
		frame.push(mime_len);
		frame.extend_from_slice(mime);
		frame.extend_from_slice(&body);
		Ok(frame)
	}

	fn decode(&self, frame: &[u8]) -> Result<ResponseMessage, CodecError> {
		serde_json::from_slice::<ResponseMessage>(frame).map_err(|e| CodecError::Malformed {
			request_id: recover_request_id(frame),
			reason: e.to_string(),
		})
	}
}

/// Best-effort extraction of `requestId` from a frame that failed to decode.
fn recover_request_id(frame: &[u8]) -> Option<RequestId> {
	let value: Value = serde_json::from_slice(frame).ok()?;
	value.get("requestId")?.as_str()?.parse().ok()
}

/// Splits a binary request frame into its mime type and JSON body.
///
/// Used by servers and test doubles that need to read what a client sent.
pub fn split_request_frame(frame: &[u8]) -> Option<(&str, &[u8])> {
	let (&len, rest) = frame.split_first()?;
	let len = len as usize;
	if rest.len() < len {
		return None;
	}
	let mime = std::str::from_utf8(&rest[..len]).ok()?;
	Some((mime, &rest[len..]))
}

#[cfg(test)]
mod tests {
	use serde_json::{Map, json};
	use uuid::Uuid;

	use super::*;
	use crate::status::StatusCode;

	#[test]
	fn test_encode_prefixes_mime_type() {
		let codec = GraphSonCodec::default();
		let request = RequestMessage::eval(Uuid::new_v4(), "g.V().count()", Map::new());

		let frame = codec.encode(&request).unwrap();

		assert_eq!(frame[0] as usize, GRAPHSON_V2_MIME.len());
		let (mime, body) = split_request_frame(&frame).unwrap();
		assert_eq!(mime, GRAPHSON_V2_MIME);
		let decoded: RequestMessage = serde_json::from_slice(body).unwrap();
		assert_eq!(decoded, request);
	}

	#[test]
	fn test_encode_rejects_oversized_mime() {
		let codec = GraphSonCodec::with_mime_type("x".repeat(300));
		let request = RequestMessage::eval(Uuid::new_v4(), "g.V()", Map::new());

		let err = codec.encode(&request).unwrap_err();
		assert!(matches!(err, CodecError::MimeTooLong(300)));
	}

	#[test]
	fn test_decode_response() {
		let id = Uuid::new_v4();
		let frame = serde_json::to_vec(&json!({
			"requestId": id,
			"status": {"code": 200, "message": "", "attributes": {}},
			"result": {"data": [1, 2, 3], "meta": {}}
		}))
		.unwrap();

		let response = GraphSonCodec::default().decode(&frame).unwrap();
		assert_eq!(response.request_id, Some(id));
		assert_eq!(response.code(), StatusCode::SUCCESS);
		assert_eq!(response.result.data, json!([1, 2, 3]));
	}

	#[test]
	fn test_decode_malformed_recovers_request_id() {
		let id = Uuid::new_v4();
		// `status` has the wrong shape but the frame is still valid JSON.
		let frame = serde_json::to_vec(&json!({"requestId": id, "status": "oops"})).unwrap();

		let err = GraphSonCodec::default().decode(&frame).unwrap_err();
		assert_eq!(err.request_id(), Some(id));
	}

	#[test]
	fn test_decode_garbage_has_no_request_id() {
		let err = GraphSonCodec::default().decode(b"\x00\x01not json").unwrap_err();
		assert!(matches!(err, CodecError::Malformed { request_id: None, .. }));
	}

	#[test]
	fn test_split_request_frame_truncated() {
		assert!(split_request_frame(&[]).is_none());
		assert!(split_request_frame(&[10, b'a']).is_none());
	}
}
