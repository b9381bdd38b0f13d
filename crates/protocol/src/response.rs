//! Response messages received from the server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::request::RequestId;
use crate::status::StatusCode;

/// A single response frame. Large results arrive as several frames sharing a
/// request id, all but the last carrying [`StatusCode::PARTIAL_CONTENT`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
	/// Id of the request this frame answers. Some server-side failures omit it.
	#[serde(default)]
	pub request_id: Option<RequestId>,
	pub status: ResponseStatus,
	#[serde(default)]
	pub result: ResponseResult,
}

/// Status block of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseStatus {
	pub code: StatusCode,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub attributes: Map<String, Value>,
}

/// Result block of a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseResult {
	/// Result payload, left undecoded (GraphSON).
	#[serde(default)]
	pub data: Value,
	#[serde(default)]
	pub meta: Map<String, Value>,
}

impl ResponseMessage {
	/// Builds a response with the given status and payload.
	pub fn new(request_id: RequestId, code: StatusCode, data: Value) -> Self {
		Self {
			request_id: Some(request_id),
			status: ResponseStatus {
				code,
				message: String::new(),
				attributes: Map::new(),
			},
			result: ResponseResult { data, meta: Map::new() },
		}
	}

	/// Sets the status message.
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.status.message = message.into();
		self
	}

	pub fn code(&self) -> StatusCode {
		self.status.code
	}

	/// Returns `true` if no further chunks follow for this request.
	pub fn is_final(&self) -> bool {
		self.status.code.is_final()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_deserialize_server_response() {
		let json = r#"{
			"requestId": "1d6d02bd-8e56-421d-9438-3bd6d0079ff1",
			"status": {"message": "", "code": 206, "attributes": {}},
			"result": {"data": [{"id": 1, "label": "Phil"}], "meta": {}}
		}"#;
		let response: ResponseMessage = serde_json::from_str(json).unwrap();

		assert_eq!(
			response.request_id.map(|id| id.to_string()).as_deref(),
			Some("1d6d02bd-8e56-421d-9438-3bd6d0079ff1")
		);
		assert_eq!(response.code(), StatusCode::PARTIAL_CONTENT);
		assert!(!response.is_final());
		assert_eq!(response.result.data[0]["label"], "Phil");
	}

	#[test]
	fn test_deserialize_without_request_id_or_result() {
		let json = r#"{"requestId": null, "status": {"code": 500, "message": "boom"}}"#;
		let response: ResponseMessage = serde_json::from_str(json).unwrap();

		assert!(response.request_id.is_none());
		assert_eq!(response.status.message, "boom");
		assert_eq!(response.result.data, Value::Null);
		assert!(response.is_final());
	}
}
