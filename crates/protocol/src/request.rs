//! Request messages sent to the server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth::{SASL_MECHANISM_PLAIN, sasl_plain};

/// Identity correlating a request with its response chunks.
///
/// Gremlin Server requires a UUID; random v4 ids make collisions within the
/// in-flight set negligible.
pub type RequestId = Uuid;

/// Operation names understood by the server.
pub mod ops {
	/// Evaluate a script.
	pub const EVAL: &str = "eval";
	/// Answer a SASL challenge.
	pub const AUTHENTICATION: &str = "authentication";
}

/// Script language used for `eval` requests.
pub const GREMLIN_LANGUAGE: &str = "gremlin-groovy";

/// A single request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
	/// Unique id echoed back on every response chunk.
	pub request_id: RequestId,
	/// Operation to perform (see [`ops`]).
	pub op: String,
	/// Server-side op processor; empty selects the default sessionless processor.
	pub processor: String,
	/// Operation arguments.
	pub args: Map<String, Value>,
}

impl RequestMessage {
	/// Builds an `eval` request for a script with optional parameter bindings.
	pub fn eval(request_id: RequestId, script: &str, bindings: Map<String, Value>) -> Self {
		let mut args = Map::new();
		args.insert("gremlin".to_string(), Value::String(script.to_string()));
		args.insert("language".to_string(), Value::String(GREMLIN_LANGUAGE.to_string()));
		args.insert("bindings".to_string(), Value::Object(bindings));

		Self {
			request_id,
			op: ops::EVAL.to_string(),
			processor: String::new(),
			args,
		}
	}

	/// Builds an `authentication` request carrying a SASL PLAIN payload.
	///
	/// When answering a challenge, `request_id` must be the id of the challenged request.
	pub fn authentication(request_id: RequestId, username: &str, password: &str) -> Self {
		let mut args = Map::new();
		args.insert("sasl".to_string(), Value::String(sasl_plain(username, password)));
		args.insert("saslMechanism".to_string(), Value::String(SASL_MECHANISM_PLAIN.to_string()));

		Self {
			request_id,
			op: ops::AUTHENTICATION.to_string(),
			processor: String::new(),
			args,
		}
	}

	/// Returns the script of an `eval` request.
	pub fn script(&self) -> Option<&str> {
		self.args.get("gremlin").and_then(Value::as_str)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_eval_request_shape() {
		let id = Uuid::new_v4();
		let mut bindings = Map::new();
		bindings.insert("name".to_string(), Value::from("Phil"));

		let request = RequestMessage::eval(id, "g.addV(name)", bindings);
		let json = serde_json::to_value(&request).unwrap();

		assert_eq!(json["requestId"], id.to_string());
		assert_eq!(json["op"], "eval");
		assert_eq!(json["processor"], "");
		assert_eq!(json["args"]["gremlin"], "g.addV(name)");
		assert_eq!(json["args"]["language"], "gremlin-groovy");
		assert_eq!(json["args"]["bindings"]["name"], "Phil");
		assert_eq!(request.script(), Some("g.addV(name)"));
	}

	#[test]
	fn test_authentication_request_shape() {
		let id = Uuid::new_v4();
		let request = RequestMessage::authentication(id, "user", "secret");

		assert_eq!(request.op, ops::AUTHENTICATION);
		assert_eq!(request.args["saslMechanism"], "PLAIN");
		assert_eq!(request.args["sasl"], sasl_plain("user", "secret"));
		assert_eq!(request.script(), None);
	}
}
