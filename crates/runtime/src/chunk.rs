//! Response chunks delivered to callers.

use gremlin_protocol::{RequestId, ResponseMessage, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of a possibly multi-part response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseChunk {
	pub request_id: RequestId,
	pub status_code: StatusCode,
	pub status_message: String,
	/// Result data of this chunk, left in its wire (GraphSON) form.
	pub payload: Value,
	pub meta: Map<String, Value>,
	/// Set on the last chunk of a response.
	pub is_final: bool,
}

impl ResponseChunk {
	/// Converts a decoded response frame addressed to `request_id`.
	pub fn from_message(request_id: RequestId, message: ResponseMessage) -> Self {
		let is_final = message.is_final();
		Self {
			request_id,
			status_code: message.status.code,
			status_message: message.status.message,
			payload: message.result.data,
			meta: message.result.meta,
			is_final,
		}
	}

	/// Returns `true` if this chunk terminates a response that carried no data.
	pub fn is_no_content(&self) -> bool {
		self.status_code == StatusCode::NO_CONTENT
	}
}
