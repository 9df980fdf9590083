//! `Runtime` and `Page` domain payloads.
//!
//! See <https://chromedevtools.github.io/devtools-protocol/tot/Runtime/>

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique id of an execution context within a session.
pub type ExecutionContextId = i64;

/// Parameters of `Runtime.evaluate`.
///
/// Unlisted CDP parameters travel through `extra`, which is flattened into
/// the request object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
	pub expression: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context_id: Option<ExecutionContextId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub return_by_value: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub generate_preview: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub await_promise: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_gesture: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub throw_on_side_effect: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub silent: Option<bool>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Result of `Runtime.evaluate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateReturn {
	pub result: RemoteObject,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub exception_details: Option<ExceptionDetails>,
}

/// Mirror object referencing the original JavaScript object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
	/// Object type (`object`, `function`, `undefined`, `string`, `number`, ...)
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub subtype: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub class_name: Option<String>,
	/// Primitive value (always present for strings, numbers and booleans)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub value: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub unserializable_value: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub object_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub preview: Option<ObjectPreview>,
}

/// Shallow preview of an object's own properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPreview {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub subtype: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default)]
	pub overflow: bool,
	#[serde(default)]
	pub properties: Vec<PropertyPreview>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPreview {
	pub name: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub value: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub subtype: Option<String>,
}

/// Detailed information about an exception thrown during evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExceptionDetails {
	pub exception_id: i64,
	pub text: String,
	pub line_number: i64,
	pub column_number: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub exception: Option<RemoteObject>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub execution_context_id: Option<ExecutionContextId>,
}

/// Description of an isolated world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
	pub id: ExecutionContextId,
	#[serde(default)]
	pub origin: String,
	#[serde(default)]
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub unique_id: Option<String>,
	/// Embedder data, typically `{ isDefault, type, frameId }`
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub aux_data: Value,
}

impl ExecutionContextDescription {
	/// Frame the context belongs to, if the embedder reported one.
	pub fn frame_id(&self) -> Option<&str> {
		self.aux_data.get("frameId").and_then(Value::as_str)
	}

	/// Whether this is the frame's main world (as opposed to an isolated world).
	pub fn is_default(&self) -> bool {
		self.aux_data
			.get("isDefault")
			.and_then(Value::as_bool)
			.unwrap_or(false)
	}
}

/// `Runtime.executionContextCreated`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContextCreated {
	pub context: ExecutionContextDescription,
}

/// `Runtime.executionContextDestroyed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyed {
	pub execution_context_id: ExecutionContextId,
}

/// `Runtime.bindingCalled`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingCalled {
	pub name: String,
	pub payload: String,
	pub execution_context_id: ExecutionContextId,
}

/// `Runtime.consoleAPICalled`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalled {
	/// Console method (`log`, `debug`, `warning`, ...)
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub args: Vec<RemoteObject>,
	pub execution_context_id: ExecutionContextId,
	#[serde(default)]
	pub timestamp: f64,
}

impl ConsoleApiCalled {
	/// First argument when it is a string primitive.
	pub fn first_string(&self) -> Option<&str> {
		self.args
			.first()
			.filter(|arg| arg.kind == "string")
			.and_then(|arg| arg.value.as_ref())
			.and_then(Value::as_str)
	}
}

/// Parameters of `Runtime.addBinding`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBindingParams {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub execution_context_name: Option<String>,
}

/// Parameters of `Page.addScriptToEvaluateOnNewDocument`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddScriptToEvaluateOnNewDocumentParams {
	pub source: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub run_immediately: Option<bool>,
}

/// Result of `Page.addScriptToEvaluateOnNewDocument`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddScriptToEvaluateOnNewDocumentReturn {
	pub identifier: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn evaluate_params_flatten_extra() {
		let mut extra = Map::new();
		extra.insert("replMode".to_string(), Value::Bool(true));
		let params = EvaluateParams {
			expression: "1".to_string(),
			context_id: Some(4),
			await_promise: Some(true),
			extra,
			..Default::default()
		};
		let json = serde_json::to_value(&params).unwrap();
		assert_eq!(json["contextId"], 4);
		assert_eq!(json["awaitPromise"], true);
		assert_eq!(json["replMode"], true);
		assert!(json.get("userGesture").is_none());
	}

	#[test]
	fn context_description_aux_data() {
		let json = serde_json::json!({
			"id": 3,
			"origin": "https://example.com",
			"name": "",
			"auxData": {"isDefault": true, "type": "default", "frameId": "F1"}
		});
		let description: ExecutionContextDescription = serde_json::from_value(json).unwrap();
		assert_eq!(description.frame_id(), Some("F1"));
		assert!(description.is_default());
	}

	#[test]
	fn exception_details_with_preview() {
		let json = serde_json::json!({
			"exceptionId": 1,
			"text": "Uncaught",
			"lineNumber": 0,
			"columnNumber": 7,
			"exception": {
				"type": "object",
				"subtype": "error",
				"className": "TypeError",
				"description": "TypeError: x is not a function",
				"preview": {
					"type": "object",
					"subtype": "error",
					"overflow": false,
					"properties": [{"name": "message", "type": "string", "value": "x is not a function"}]
				}
			}
		});
		let details: ExceptionDetails = serde_json::from_value(json).unwrap();
		let exception = details.exception.unwrap();
		assert_eq!(exception.class_name.as_deref(), Some("TypeError"));
		assert_eq!(exception.preview.unwrap().properties[0].name, "message");
	}
}
