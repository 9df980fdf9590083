//! Closed, tagged view over inbound CDP events.
//!
//! Events the bridge reacts to get their own variant with a typed payload;
//! everything else is preserved verbatim in [`CdpEvent::Other`] so callers
//! still see every raw protocol event.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::runtime::{BindingCalled, ConsoleApiCalled, ExecutionContextCreated, ExecutionContextDestroyed};
use crate::target::{AttachedToTarget, DetachedFromTarget, TargetCreated, TargetDestroyed};

#[derive(Debug, Clone)]
pub enum CdpEvent {
	ExecutionContextCreated(ExecutionContextCreated),
	ExecutionContextDestroyed(ExecutionContextDestroyed),
	ExecutionContextsCleared,
	BindingCalled(BindingCalled),
	ConsoleApiCalled(ConsoleApiCalled),
	AttachedToTarget(AttachedToTarget),
	DetachedFromTarget(DetachedFromTarget),
	TargetCreated(TargetCreated),
	TargetDestroyed(TargetDestroyed),
	/// Any event without a dedicated variant.
	Other { method: String, params: Value },
}

impl CdpEvent {
	pub const EXECUTION_CONTEXT_CREATED: &'static str = "Runtime.executionContextCreated";
	pub const EXECUTION_CONTEXT_DESTROYED: &'static str = "Runtime.executionContextDestroyed";
	pub const EXECUTION_CONTEXTS_CLEARED: &'static str = "Runtime.executionContextsCleared";
	pub const BINDING_CALLED: &'static str = "Runtime.bindingCalled";
	pub const CONSOLE_API_CALLED: &'static str = "Runtime.consoleAPICalled";
	pub const ATTACHED_TO_TARGET: &'static str = "Target.attachedToTarget";
	pub const DETACHED_FROM_TARGET: &'static str = "Target.detachedFromTarget";
	pub const TARGET_CREATED: &'static str = "Target.targetCreated";
	pub const TARGET_DESTROYED: &'static str = "Target.targetDestroyed";

	/// Parses an event frame into its typed variant.
	///
	/// # Errors
	///
	/// Returns the serde error when a known method carries a payload of the
	/// wrong shape. Unknown methods never fail.
	pub fn parse(method: &str, params: Value) -> Result<Self, serde_json::Error> {
		Ok(match method {
			Self::EXECUTION_CONTEXT_CREATED => Self::ExecutionContextCreated(typed(params)?),
			Self::EXECUTION_CONTEXT_DESTROYED => Self::ExecutionContextDestroyed(typed(params)?),
			Self::EXECUTION_CONTEXTS_CLEARED => Self::ExecutionContextsCleared,
			Self::BINDING_CALLED => Self::BindingCalled(typed(params)?),
			Self::CONSOLE_API_CALLED => Self::ConsoleApiCalled(typed(params)?),
			Self::ATTACHED_TO_TARGET => Self::AttachedToTarget(typed(params)?),
			Self::DETACHED_FROM_TARGET => Self::DetachedFromTarget(typed(params)?),
			Self::TARGET_CREATED => Self::TargetCreated(typed(params)?),
			Self::TARGET_DESTROYED => Self::TargetDestroyed(typed(params)?),
			_ => Self::Other {
				method: method.to_string(),
				params,
			},
		})
	}

	/// Protocol method name of this event.
	pub fn method(&self) -> &str {
		match self {
			Self::ExecutionContextCreated(_) => Self::EXECUTION_CONTEXT_CREATED,
			Self::ExecutionContextDestroyed(_) => Self::EXECUTION_CONTEXT_DESTROYED,
			Self::ExecutionContextsCleared => Self::EXECUTION_CONTEXTS_CLEARED,
			Self::BindingCalled(_) => Self::BINDING_CALLED,
			Self::ConsoleApiCalled(_) => Self::CONSOLE_API_CALLED,
			Self::AttachedToTarget(_) => Self::ATTACHED_TO_TARGET,
			Self::DetachedFromTarget(_) => Self::DETACHED_FROM_TARGET,
			Self::TargetCreated(_) => Self::TARGET_CREATED,
			Self::TargetDestroyed(_) => Self::TARGET_DESTROYED,
			Self::Other { method, .. } => method,
		}
	}
}

fn typed<T: DeserializeOwned>(params: Value) -> Result<T, serde_json::Error> {
	serde_json::from_value(params)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn parses_context_created() {
		let event = CdpEvent::parse(
			"Runtime.executionContextCreated",
			json!({"context": {"id": 7, "origin": "https://a.test", "name": "", "auxData": {"frameId": "F"}}}),
		)
		.unwrap();
		match event {
			CdpEvent::ExecutionContextCreated(created) => {
				assert_eq!(created.context.id, 7);
				assert_eq!(created.context.frame_id(), Some("F"));
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn cleared_ignores_params() {
		let event = CdpEvent::parse("Runtime.executionContextsCleared", Value::Null).unwrap();
		assert!(matches!(event, CdpEvent::ExecutionContextsCleared));
		assert_eq!(event.method(), "Runtime.executionContextsCleared");
	}

	#[test]
	fn unknown_method_passes_through() {
		let event = CdpEvent::parse("Page.loadEventFired", json!({"timestamp": 1.5})).unwrap();
		match &event {
			CdpEvent::Other { method, params } => {
				assert_eq!(method, "Page.loadEventFired");
				assert_eq!(params["timestamp"], 1.5);
			}
			other => panic!("unexpected {other:?}"),
		}
		assert_eq!(event.method(), "Page.loadEventFired");
	}

	#[test]
	fn malformed_known_event_is_an_error() {
		assert!(CdpEvent::parse("Runtime.bindingCalled", json!({"name": 1})).is_err());
	}
}
