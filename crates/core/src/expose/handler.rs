//! Host side of an exposed-function call.
//!
//! Call records arrive as `Runtime.bindingCalled` payloads, as tagged
//! `Runtime.consoleAPICalled` debug lines, or as tagged embedder console
//! messages. Each is routed to its registration and run on its own task so
//! the session's dispatch loop never waits on a callback.

use std::sync::Arc;

use bridge_protocol::{BindingCalled, ConsoleApiCalled};
use bridge_runtime::{ConsoleLevel, ConsoleMessage};
use serde::Deserialize;

use super::stub::{self, BINDING, CONSOLE_PREFIX};
use super::{ExposedCall, Registration};
use crate::codec::{Codec, ErrorValue, Value};
use crate::context::ExecutionContext;
use crate::session::SessionInner;

/// What the stub transmits for one call.
#[derive(Debug, Deserialize)]
struct CallPayload {
	sequence: String,
	name: String,
	/// Codec-encoded argument array
	args: String,
}

/// Console-mode wrapper around a [`CallPayload`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
	#[serde(rename = "type")]
	kind: String,
	#[serde(default)]
	realm: Option<String>,
	#[serde(default)]
	session_id: Option<String>,
	/// Set when the host tagged the realm with its frame on install
	#[serde(default)]
	frame_id: Option<String>,
	payload: CallPayload,
}

/// What the host writes back into the calling realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
	/// Received; stops retransmission
	Ack,
	Value,
	Error,
}

impl Outcome {
	fn as_str(self) -> &'static str {
		match self {
			Self::Ack => "ack",
			Self::Value => "value",
			Self::Error => "error",
		}
	}
}

pub(crate) fn handle_binding(inner: &Arc<SessionInner>, event: &BindingCalled) {
	if event.name != BINDING {
		return;
	}
	let payload = match serde_json::from_str::<CallPayload>(&event.payload) {
		Ok(payload) => payload,
		Err(e) => {
			tracing::warn!(context_id = event.execution_context_id, error = %e, "Malformed binding payload");
			return;
		}
	};
	let context = inner.resolve_context(event.execution_context_id);
	dispatch(inner, payload, context);
}

pub(crate) fn handle_console_api(inner: &Arc<SessionInner>, event: &ConsoleApiCalled) {
	if event.kind != "debug" {
		return;
	}
	let Some(envelope) = event.first_string().and_then(parse_envelope) else {
		return;
	};
	if envelope.session_id != inner.session_id {
		return;
	}
	let context = inner.resolve_context(event.execution_context_id);
	dispatch(inner, envelope.payload, context);
}

pub(crate) fn handle_console(inner: &Arc<SessionInner>, message: &ConsoleMessage) {
	if message.level != ConsoleLevel::Verbose {
		return;
	}
	let Some(envelope) = parse_envelope(&message.text) else {
		return;
	};
	if envelope.session_id != inner.session_id {
		return;
	}
	let context = match message.frame_id.as_deref().or(envelope.frame_id.as_deref()) {
		Some(frame_id) => frame_context(inner, frame_id),
		None => ExecutionContext::default_realm(inner),
	};
	tracing::trace!(realm = ?envelope.realm, context = %context.label(), "Console call");
	dispatch(inner, envelope.payload, context);
}

fn parse_envelope(text: &str) -> Option<Envelope> {
	let body = text.strip_prefix(CONSOLE_PREFIX)?;
	match serde_json::from_str::<Envelope>(body) {
		Ok(envelope) if envelope.kind == "call" => Some(envelope),
		Ok(envelope) => {
			tracing::debug!(kind = %envelope.kind, "Ignoring console envelope");
			None
		}
		Err(e) => {
			tracing::warn!(error = %e, "Malformed console call envelope");
			None
		}
	}
}

/// Prefers the frame's tracked main-world context over frame-scoped execution.
fn frame_context(inner: &Arc<SessionInner>, frame_id: &str) -> ExecutionContext {
	inner
		.live_contexts()
		.into_iter()
		.find(|context| {
			context.frame_id() == Some(frame_id) && context.description().is_some_and(|d| d.is_default())
		})
		.unwrap_or_else(|| ExecutionContext::for_frame(inner, frame_id))
}

fn dispatch(inner: &Arc<SessionInner>, payload: CallPayload, context: ExecutionContext) {
	let Some(registration) = inner.exposed.lock().get(&payload.name).cloned() else {
		tracing::debug!(name = %payload.name, "Call for a function that is not exposed");
		return;
	};
	let codec = inner.config.codec.clone();
	tokio::spawn(run_call(registration, codec, payload, context));
}

async fn run_call(registration: Arc<Registration>, codec: Codec, payload: CallPayload, context: ExecutionContext) {
	let CallPayload { sequence, name, args } = payload;
	let first = registration.mark_seen(&sequence);
	let wants_value = registration.options.with_return_value.is_some();

	if registration.options.retry.is_some() {
		write_back(&context, &sequence, &name, Outcome::Ack, Value::Undefined).await;
	}
	if !first {
		tracing::debug!(name = %name, sequence = %sequence, "Duplicate call acknowledged, not re-executed");
		return;
	}

	let args = match codec.decode(&args) {
		Ok(Value::Array(items)) => items,
		Ok(other) => vec![other],
		Err(e) => {
			tracing::warn!(name = %name, error = %e, "Undecodable call arguments");
			if wants_value {
				write_back(&context, &sequence, &name, Outcome::Error, ErrorValue::from(&e).into()).await;
			}
			return;
		}
	};

	let call = ExposedCall {
		name: name.clone(),
		args,
		context: context.clone(),
		sequence: sequence.clone(),
	};
	let result = (registration.callback)(call).await;

	match result {
		Ok(value) if wants_value => write_back(&context, &sequence, &name, Outcome::Value, value).await,
		Ok(_) => {}
		Err(e) if e.is_target_gone() => {
			tracing::debug!(name = %name, error = %e, "Realm went away during exposed call");
		}
		Err(e) if wants_value => write_back(&context, &sequence, &name, Outcome::Error, ErrorValue::from(&e).into()).await,
		Err(e) => tracing::warn!(name = %name, error = %e, "Exposed function failed"),
	}
}

/// Stores `value` in the calling realm's pending-call table.
async fn write_back(context: &ExecutionContext, sequence: &str, name: &str, outcome: Outcome, value: Value) {
	let args = vec![
		Value::from(sequence),
		Value::from(name),
		Value::from(outcome.as_str()),
		value,
	];
	match context.evaluate(&stub::write_back(), args).await {
		Ok(_) => {}
		Err(e) if e.is_target_gone() => {
			tracing::debug!(name, sequence, outcome = outcome.as_str(), "Realm gone before write-back");
		}
		Err(e) => {
			tracing::warn!(name, sequence, outcome = outcome.as_str(), error = %e, "Write-back failed");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn console_envelopes_need_the_prefix_and_call_type() {
		let line = format!(
			r#"{CONSOLE_PREFIX}{{"type":"call","realm":"https://a.test","sessionId":"S1","payload":{{"sequence":"1-x","name":"ping","args":"[]"}}}}"#
		);
		let envelope = parse_envelope(&line).unwrap();
		assert_eq!(envelope.session_id.as_deref(), Some("S1"));
		assert_eq!(envelope.payload.sequence, "1-x");
		assert_eq!(envelope.payload.name, "ping");
		assert!(envelope.frame_id.is_none());

		assert!(parse_envelope(r#"{"type":"call"}"#).is_none());
		assert!(parse_envelope(&format!("{CONSOLE_PREFIX}not json")).is_none());
		let other = format!(r#"{CONSOLE_PREFIX}{{"type":"log","payload":{{"sequence":"1","name":"p","args":"[]"}}}}"#);
		assert!(parse_envelope(&other).is_none());
	}

	#[test]
	fn root_envelopes_carry_a_null_session() {
		let line = format!(
			r#"{CONSOLE_PREFIX}{{"type":"call","realm":null,"sessionId":null,"payload":{{"sequence":"2-y","name":"ping","args":"[1.0]"}}}}"#
		);
		assert!(parse_envelope(&line).unwrap().session_id.is_none());
	}

	#[test]
	fn envelopes_carry_the_tagged_frame() {
		let line = format!(
			r#"{CONSOLE_PREFIX}{{"type":"call","realm":null,"sessionId":null,"frameId":"F7","payload":{{"sequence":"3-z","name":"ping","args":"[]"}}}}"#
		);
		assert_eq!(parse_envelope(&line).unwrap().frame_id.as_deref(), Some("F7"));
	}
}
