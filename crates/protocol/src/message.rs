//! Frame-level message shapes for flat-mode CDP.
//!
//! Every frame carries an optional `sessionId`; frames without one belong to
//! the root (browser or page) session the socket was opened against.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command sent to the CDP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
	/// Unique command id for correlating the response
	pub id: u64,
	/// Domain-qualified method, e.g. `Runtime.evaluate`
	pub method: String,
	/// Method parameters as a JSON object
	#[serde(default)]
	pub params: Value,
	/// Target session for flat-mode multiplexing
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Command response from the CDP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
	/// Command id this response correlates to
	pub id: u64,
	/// Success result (mutually exclusive with error)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// CDP error details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// JSON-RPC style error code (e.g. `-32000` for server errors)
	pub code: i64,
	/// Human-readable error message
	pub message: String,
	/// Optional extra detail
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
}

/// Event pushed by the CDP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	/// Domain-qualified event name, e.g. `Runtime.executionContextCreated`
	pub method: String,
	/// Event parameters
	#[serde(default)]
	pub params: Value,
	/// Session the event was raised in, absent for the root session
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Discriminated union of inbound frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response frame (has `id` field)
	Response(Response),
	/// Event frame (has `method`, no `id`)
	Event(Event),
	/// Unknown frame type (forward-compatible catch-all)
	Unknown(Value),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_omits_absent_session() {
		let request = Request {
			id: 7,
			method: "Runtime.enable".to_string(),
			params: serde_json::json!({}),
			session_id: None,
		};
		let json = serde_json::to_value(&request).unwrap();
		assert_eq!(json["id"], 7);
		assert!(json.get("sessionId").is_none());
	}

	#[test]
	fn response_with_error_parses() {
		let json = r#"{"id": 3, "error": {"code": -32000, "message": "Target closed"}, "sessionId": "S1"}"#;
		match serde_json::from_str::<Message>(json).unwrap() {
			Message::Response(response) => {
				assert_eq!(response.id, 3);
				assert_eq!(response.session_id.as_deref(), Some("S1"));
				let error = response.error.unwrap();
				assert_eq!(error.code, -32000);
				assert_eq!(error.message, "Target closed");
			}
			other => panic!("Expected Response, got {other:?}"),
		}
	}

	#[test]
	fn event_without_params_parses() {
		let json = r#"{"method": "Runtime.executionContextsCleared"}"#;
		match serde_json::from_str::<Message>(json).unwrap() {
			Message::Event(event) => {
				assert_eq!(event.method, "Runtime.executionContextsCleared");
				assert!(event.params.is_null());
				assert!(event.session_id.is_none());
			}
			other => panic!("Expected Event, got {other:?}"),
		}
	}

	#[test]
	fn unknown_frame_is_preserved() {
		let message: Message = serde_json::from_str(r#"{"hello": "world"}"#).unwrap();
		assert!(matches!(message, Message::Unknown(_)));
	}
}
