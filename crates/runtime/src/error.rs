//! Error types for the bridge runtime.

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// CDP error messages that mean the addressed target or realm no longer exists.
const TARGET_GONE_MESSAGES: &[&str] = &[
	"target closed",
	"cannot find context with specified id",
	"no target with given id",
	"session with given id not found",
	"execution context was destroyed",
	"cannot find default execution context",
	"inspected target navigated or closed",
];

/// Errors that can occur while talking to a debugger session.
#[derive(Debug, Error)]
pub enum Error {
	/// Command issued on a session whose transport is not attached.
	#[error("Debugger is not attached{}", session.as_ref().map(|s| format!(" (session {s})")).unwrap_or_default())]
	NotAttached { session: Option<String> },

	/// Remote code threw, reconstructed host-side from the exception description.
	#[error("{name}: {message}")]
	Evaluation {
		/// Error class name (e.g., "TypeError", "Error")
		name: String,
		/// Human-readable error message
		message: String,
		/// JavaScript stack trace from the realm (if available)
		stack: Option<String>,
	},

	/// Malformed or unexpected-shape wire content.
	#[error("Serialization error: {0}")]
	Serialization(String),

	/// The target or execution context went away while the operation was in flight.
	#[error("Target gone: {0}")]
	TargetGone(String),

	/// A bounded wait expired.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// A realm never obtained a working codec instance.
	#[error("Codec unavailable while evaluating function '{function}' in execution context {context}")]
	CodecUnavailable { function: String, context: String },

	/// Source text submitted as a remote function is not a pure function expression.
	#[error("Invalid function: {0}")]
	InvalidFunction(String),

	/// A function with this name is already exposed on the session.
	#[error("Function '{0}' is already exposed; remove it before exposing it again")]
	AlreadyExposed(String),

	/// Any other error response from the protocol endpoint.
	#[error("Protocol error {code}: {message}")]
	Protocol { code: i64, message: String },

	/// Failed to establish a connection with the debugging endpoint.
	#[error("Failed to connect to {url}: {reason}")]
	ConnectionFailed { url: String, reason: String },

	/// Transport-level error (socket read/write).
	#[error("Transport error: {0}")]
	Transport(String),

	/// The operation is not supported by this transport.
	#[error("Unsupported operation: {0}")]
	Unsupported(String),

	/// Invalid argument provided to method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// Response channel closed before a reply arrived.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Classifies a CDP error response.
	///
	/// Messages describing a vanished target or context become
	/// [`Error::TargetGone`]; everything else is [`Error::Protocol`].
	pub fn from_protocol(code: i64, message: impl Into<String>) -> Self {
		let message = message.into();
		let lowered = message.to_ascii_lowercase();
		if TARGET_GONE_MESSAGES.iter().any(|m| lowered.contains(m)) {
			Error::TargetGone(message)
		} else {
			Error::Protocol { code, message }
		}
	}

	/// Returns the error name if this is a remote evaluation error.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Evaluation { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Returns the stack trace if this is a remote evaluation error with a stack.
	pub fn stack_trace(&self) -> Option<&str> {
		match self {
			Error::Evaluation { stack, .. } => stack.as_deref(),
			_ => None,
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		match self {
			Error::Timeout(_) => true,
			Error::Evaluation { name, .. } => name == "TimeoutError",
			_ => false,
		}
	}

	/// Returns true if the target or execution context has gone away.
	pub fn is_target_gone(&self) -> bool {
		matches!(self, Error::TargetGone(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn target_gone_messages_are_classified() {
		let err = Error::from_protocol(-32000, "Cannot find context with specified id");
		assert!(err.is_target_gone());

		let err = Error::from_protocol(-32001, "Session with given id not found.");
		assert!(err.is_target_gone());

		let err = Error::from_protocol(-32000, "Target closed while handling command");
		assert!(err.is_target_gone());
	}

	#[test]
	fn other_protocol_errors_keep_code() {
		match Error::from_protocol(-32601, "'Foo.bar' wasn't found") {
			Error::Protocol { code, message } => {
				assert_eq!(code, -32601);
				assert!(message.contains("Foo.bar"));
			}
			other => panic!("Expected Protocol error, got {other:?}"),
		}
	}

	#[test]
	fn evaluation_error_accessors() {
		let err = Error::Evaluation {
			name: "TypeError".to_string(),
			message: "boom".to_string(),
			stack: Some("TypeError: boom\n    at <anonymous>".to_string()),
		};
		assert_eq!(err.error_name(), Some("TypeError"));
		assert!(err.stack_trace().unwrap().contains("<anonymous>"));
		assert_eq!(err.to_string(), "TypeError: boom");
		assert!(!err.is_timeout());
	}

	#[test]
	fn not_attached_mentions_session() {
		let err = Error::NotAttached {
			session: Some("S1".to_string()),
		};
		assert_eq!(err.to_string(), "Debugger is not attached (session S1)");
		let err = Error::NotAttached { session: None };
		assert_eq!(err.to_string(), "Debugger is not attached");
	}
}
