//! Execution contexts: addressable JavaScript realms.
//!
//! An [`ExecutionContext`] holds a weak reference back to its session; the
//! session owns the live context table. Once a context is destroyed every
//! handle to it turns stale and further evaluations fail with
//! [`Error::TargetGone`]; re-acquire a fresh handle from the session.

use std::fmt;
use std::sync::{Arc, Weak};

use bridge_protocol::{EvaluateParams, EvaluateReturn, ExceptionDetails, ExecutionContextDescription, ExecutionContextId, RemoteObject};
use bridge_runtime::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use tokio::sync::watch;

use crate::codec::{Codec, Value};
use crate::function::JsFunction;
use crate::script::{self, CODEC_UNAVAILABLE, ScriptOptions};
use crate::session::{EvaluateOptions, Session, SessionInner};

/// One JavaScript realm reachable through a session.
#[derive(Clone)]
pub struct ExecutionContext {
	session: Weak<SessionInner>,
	/// Absent for the session's default realm and for frame-addressed realms
	id: Option<ExecutionContextId>,
	frame_id: Option<String>,
	description: Option<Arc<ExecutionContextDescription>>,
	/// Flips to `false` when the realm is destroyed
	alive: Option<watch::Receiver<bool>>,
}

impl fmt::Debug for ExecutionContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExecutionContext")
			.field("id", &self.id)
			.field("frame_id", &self.frame_id)
			.field("origin", &self.description.as_ref().map(|d| d.origin.as_str()))
			.field("alive", &self.is_alive())
			.finish()
	}
}

impl ExecutionContext {
	/// The session's default realm; CDP picks the context at evaluation time.
	pub(crate) fn default_realm(session: &Arc<SessionInner>) -> Self {
		Self {
			session: Arc::downgrade(session),
			id: None,
			frame_id: None,
			description: None,
			alive: None,
		}
	}

	/// A realm reported by `Runtime.executionContextCreated`.
	pub(crate) fn tracked(
		session: &Arc<SessionInner>,
		description: Arc<ExecutionContextDescription>,
		alive: watch::Receiver<bool>,
	) -> Self {
		Self {
			session: Arc::downgrade(session),
			id: Some(description.id),
			frame_id: description.frame_id().map(str::to_string),
			description: Some(description),
			alive: Some(alive),
		}
	}

	/// A realm known only by id, before its creation event was seen.
	pub(crate) fn placeholder(session: &Arc<SessionInner>, id: ExecutionContextId) -> Self {
		Self {
			session: Arc::downgrade(session),
			id: Some(id),
			frame_id: None,
			description: None,
			alive: None,
		}
	}

	/// A frame's realm, addressed through the transport's frame execution.
	pub(crate) fn for_frame(session: &Arc<SessionInner>, frame_id: impl Into<String>) -> Self {
		Self {
			session: Arc::downgrade(session),
			id: None,
			frame_id: Some(frame_id.into()),
			description: None,
			alive: None,
		}
	}

	/// Protocol id of the realm, or `None` for the default realm.
	pub fn id(&self) -> Option<ExecutionContextId> {
		self.id
	}

	pub fn frame_id(&self) -> Option<&str> {
		self.frame_id.as_deref()
	}

	pub fn description(&self) -> Option<&ExecutionContextDescription> {
		self.description.as_deref()
	}

	/// `false` once the realm was destroyed or cleared.
	pub fn is_alive(&self) -> bool {
		self.alive.as_ref().is_none_or(|alive| *alive.borrow())
	}

	/// The owning session, if it still exists.
	pub fn session(&self) -> Option<Session> {
		self.session.upgrade().map(Session::from_inner)
	}

	/// Calls `function` with `args` in this realm and decodes the result.
	///
	/// # Errors
	///
	/// - [`Error::Evaluation`] when the function throws
	/// - [`Error::TargetGone`] when the realm is destroyed before it answers
	/// - [`Error::NotAttached`] when the session's debugger is detached
	/// - [`Error::CodecUnavailable`] when a preloaded codec never shows up
	pub async fn evaluate(&self, function: &JsFunction, args: Vec<Value>) -> Result<Value> {
		self.evaluate_with(EvaluateOptions::default(), function, args).await
	}

	/// [`evaluate`](Self::evaluate) with a timeout, user gesture or extra CDP parameters.
	///
	/// # Errors
	///
	/// Also [`Error::InvalidArgument`] when a pass-through parameter names one
	/// the bridge sets itself (`expression`, `contextId`, `awaitPromise`,
	/// `returnByValue`, `throwOnSideEffect`, ...).
	pub async fn evaluate_with(&self, options: EvaluateOptions, function: &JsFunction, args: Vec<Value>) -> Result<Value> {
		options.check_params()?;
		let session = self.upgrade()?;
		let codec = &session.config.codec;
		let script_options = ScriptOptions {
			timeout: session.config.codec_wait(),
			preload: session.codec_preloaded(),
			context_label: self.label(),
		};
		let source = script::build(function, &args, codec, &script_options)?;

		let call = self.run_script(&session, &source, &options, function);
		match options.time_limit() {
			Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
				Error::Timeout(format!(
					"evaluating '{}' in execution context {} exceeded {}ms",
					function.name(),
					self.label(),
					limit.as_millis()
				))
			})?,
			None => call.await,
		}
	}

	/// Evaluates and deserializes the result into `T`.
	pub async fn evaluate_typed<T: DeserializeOwned>(&self, function: &JsFunction, args: Vec<Value>) -> Result<T> {
		self.evaluate(function, args).await?.deserialize_into()
	}

	/// Runs a bridge-internal script (stub install, cleanup, codec preload)
	/// without the codec envelope.
	pub(crate) async fn inject(&self, source: &str) -> Result<()> {
		let session = self.upgrade()?;
		if !self.is_alive() {
			return Err(self.gone());
		}
		if let (None, Some(frame_id)) = (self.id, &self.frame_id) {
			return session.transport.execute_in_frame(frame_id, source, false).await.map(|_| ());
		}

		let params = EvaluateParams {
			expression: source.to_string(),
			context_id: self.id,
			silent: Some(true),
			..Default::default()
		};
		let raw = session.send("Runtime.evaluate", serde_json::to_value(&params)?).await?;
		if let Some(details) = raw.get("exceptionDetails") {
			let text = details.get("text").and_then(Json::as_str).unwrap_or("script threw");
			return Err(evaluation_error("Error", format!("{text} in execution context {}", self.label()), None));
		}
		Ok(())
	}

	fn upgrade(&self) -> Result<Arc<SessionInner>> {
		self.session
			.upgrade()
			.ok_or_else(|| Error::TargetGone(format!("session of execution context {} was dropped", self.label())))
	}

	pub(crate) fn label(&self) -> String {
		match (self.id, &self.frame_id) {
			(Some(id), _) => id.to_string(),
			(None, Some(frame)) => format!("frame {frame}"),
			(None, None) => "default".to_string(),
		}
	}

	async fn run_script(
		&self,
		session: &SessionInner,
		source: &str,
		options: &EvaluateOptions,
		function: &JsFunction,
	) -> Result<Value> {
		if !self.is_alive() {
			return Err(self.gone());
		}

		let request = async {
			match (self.id, &self.frame_id) {
				(None, Some(frame_id)) => self.run_in_frame(session, frame_id, source, options).await,
				_ => self.run_evaluate(session, source, options, function).await,
			}
		};

		match self.alive.clone() {
			Some(mut alive) => tokio::select! {
				result = request => result,
				_ = alive.wait_for(|alive| !*alive) => Err(self.gone()),
			},
			None => request.await,
		}
	}

	async fn run_evaluate(
		&self,
		session: &SessionInner,
		source: &str,
		options: &EvaluateOptions,
		function: &JsFunction,
	) -> Result<Value> {
		let params = EvaluateParams {
			expression: source.to_string(),
			context_id: self.id,
			return_by_value: Some(false),
			generate_preview: Some(false),
			await_promise: Some(true),
			user_gesture: options.user_gesture,
			throw_on_side_effect: Some(false),
			silent: None,
			extra: options.extra.clone(),
		};

		let raw = session.send("Runtime.evaluate", serde_json::to_value(&params)?).await?;
		let response: EvaluateReturn = serde_json::from_value(raw)
			.map_err(|e| Error::Serialization(format!("unexpected Runtime.evaluate response: {e}")))?;

		if let Some(details) = response.exception_details {
			return Err(self.exception_error(&session.config.codec, details, function));
		}
		decode_result(&session.config.codec, &response.result)
	}

	async fn run_in_frame(
		&self,
		session: &SessionInner,
		frame_id: &str,
		source: &str,
		options: &EvaluateOptions,
	) -> Result<Value> {
		let codec = &session.config.codec;
		let result = session
			.transport
			.execute_in_frame(frame_id, source, options.user_gesture.unwrap_or(false))
			.await;

		match result {
			Ok(Json::String(encoded)) => codec.decode(&encoded),
			Ok(Json::Null) => Ok(Value::Undefined),
			Ok(other) => Err(Error::Serialization(format!(
				"expected an encoded string from frame {frame_id}, got {other}"
			))),
			// The frame primitive reports the thrown value's text as the message.
			Err(Error::Evaluation { message, .. }) if codec.decode(&message).is_ok() => Err(thrown(codec, &message)),
			Err(e) => Err(e),
		}
	}

	fn gone(&self) -> Error {
		Error::TargetGone(format!("execution context {} was destroyed", self.label()))
	}

	/// Rebuilds the remote exception as a host error.
	///
	/// Tries, in order: the codec-encoded value thrown by the generated
	/// script, preview properties, the class name and description, and
	/// finally the exception text.
	fn exception_error(&self, codec: &Codec, details: ExceptionDetails, function: &JsFunction) -> Error {
		let Some(exception) = details.exception else {
			return evaluation_error("Error", details.text, None);
		};

		if exception.kind == "string" {
			if let Some(Json::String(text)) = &exception.value {
				return thrown(codec, text);
			}
		}

		let reconstructed = exception
			.preview
			.as_ref()
			.and_then(|preview| {
				let field = |name: &str| {
					preview
						.properties
						.iter()
						.find(|p| p.name == name)
						.and_then(|p| p.value.clone())
				};
				let message = field("message")?;
				let name = field("name").or_else(|| exception.class_name.clone()).unwrap_or_else(|| "Error".to_string());
				Some((name, message, field("stack")))
			})
			.or_else(|| {
				let description = exception.description.as_deref()?;
				let first_line = description.lines().next().unwrap_or_default();
				let (name, message) = match first_line.split_once(": ") {
					Some((name, message)) if is_error_name(name) => (name.to_string(), message.to_string()),
					_ => (
						exception.class_name.clone().unwrap_or_else(|| "Error".to_string()),
						first_line.to_string(),
					),
				};
				Some((name, message, Some(description.to_string())))
			});

		match reconstructed {
			Some((name, _, _)) if name == CODEC_UNAVAILABLE => Error::CodecUnavailable {
				function: function.name().to_string(),
				context: self.label(),
			},
			Some((name, message, stack)) => evaluation_error(name, message, stack),
			None => evaluation_error(
				exception.class_name.unwrap_or_else(|| "Error".to_string()),
				details.text,
				None,
			),
		}
	}
}

/// Decodes the `Runtime.evaluate` result object.
fn decode_result(codec: &Codec, result: &RemoteObject) -> Result<Value> {
	match (result.kind.as_str(), &result.value) {
		("undefined", _) => Ok(Value::Undefined),
		("string", Some(Json::String(encoded))) => codec.decode(encoded),
		(kind, _) => Err(Error::Serialization(format!(
			"expected a codec-encoded string result, got {kind}{}",
			result.description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default()
		))),
	}
}

/// Turns a codec-encoded thrown value into an error.
fn thrown(codec: &Codec, encoded: &str) -> Error {
	match codec.decode(encoded) {
		Ok(Value::Error(error)) => error.into_error(),
		Ok(Value::String(message)) => evaluation_error("Error", message, None),
		Ok(other) => evaluation_error("Error", format!("uncaught {}: {}", other.type_name(), other.to_json()), None),
		Err(_) => evaluation_error("Error", encoded.to_string(), None),
	}
}

fn evaluation_error(name: impl Into<String>, message: impl Into<String>, stack: Option<String>) -> Error {
	Error::Evaluation {
		name: name.into(),
		message: message.into(),
		stack,
	}
}

fn is_error_name(candidate: &str) -> bool {
	!candidate.is_empty() && candidate.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
