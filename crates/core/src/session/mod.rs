//! Sessions: one CDP debugging connection, optionally scoped to a sub-target.
//!
//! A [`Session`] is a cheap, cloneable handle. Each session runs a dispatch
//! task that reads the shared transport's event broadcast, keeps only the
//! events carrying its own `sessionId` and applies them to the session's
//! tables before anything else observes them.
//!
//! # Lifecycle
//!
//! ```text
//! unattached ──attach──▶ attached ──detach / target gone──▶ detached
//!                           │
//!                           ├─ enable_track_execution_contexts (once)
//!                           └─ enable_auto_attach (once)
//! ```

mod config;
mod dispatch;
mod targets;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bridge_protocol::{
	AddScriptToEvaluateOnNewDocumentParams, AddScriptToEvaluateOnNewDocumentReturn, ExecutionContextDescription,
	ExecutionContextId, TargetInfo,
};
use bridge_runtime::{DebuggerTransport, DetachReason, Error, Result};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value as Json, json};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub use config::{DEFAULT_CODEC_TIMEOUT_MS, DEFAULT_PROTOCOL_VERSION, EvaluateOptions, SessionConfig};

use crate::codec::{Codec, Value};
use crate::context::ExecutionContext;
use crate::events::{EventBus, EventStream, EventSubscription, EventWaiter, SessionEvent};
use crate::expose::Registration;
use crate::function::JsFunction;
use crate::script;

/// Live realm tracked by a session.
struct ContextEntry {
	description: Arc<ExecutionContextDescription>,
	alive: watch::Sender<bool>,
}

pub(crate) struct SessionInner {
	pub(crate) transport: Arc<dyn DebuggerTransport>,
	/// Absent for the root session
	pub(crate) session_id: Option<String>,
	/// Session the `Target.detachFromTarget` for this one is sent on
	parent_session_id: Option<String>,
	target_info: Option<TargetInfo>,
	pub(crate) config: SessionConfig,
	detached: AtomicBool,
	contexts: Mutex<HashMap<ExecutionContextId, ContextEntry>>,
	tracking: AtomicBool,
	/// `Some(recursive)` once auto-attach is enabled
	auto_attach: Mutex<Option<bool>>,
	children: Mutex<IndexMap<String, Session>>,
	/// Identifier of the codec's run-on-new-document script
	codec_script: Mutex<Option<String>>,
	pub(crate) exposed: Mutex<IndexMap<String, Arc<Registration>>>,
	pub(crate) binding_added: AtomicBool,
	/// Install stubs on context/frame creation because the new-document script was refused
	pub(crate) install_on_events: AtomicBool,
	pub(crate) events: EventBus<SessionEvent>,
	dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
	fn drop(&mut self) {
		if let Some(task) = self.dispatch.get_mut().take() {
			task.abort();
		}
	}
}

impl SessionInner {
	pub(crate) fn is_attached(&self) -> bool {
		!self.detached.load(Ordering::SeqCst) && self.transport.is_attached()
	}

	pub(crate) fn is_detached(&self) -> bool {
		self.detached.load(Ordering::SeqCst)
	}

	/// The guarded command primitive every component funnels through.
	pub(crate) async fn send(&self, method: &str, params: Json) -> Result<Json> {
		if !self.is_attached() {
			return Err(Error::NotAttached {
				session: self.session_id.clone(),
			});
		}
		let call = self.transport.send_command(method, params, self.session_id.as_deref());
		match self.config.command_wait() {
			Some(limit) => tokio::time::timeout(limit, call)
				.await
				.map_err(|_| Error::Timeout(format!("{method} did not complete within {}ms", limit.as_millis())))?,
			None => call.await,
		}
	}

	pub(crate) fn codec_preloaded(&self) -> bool {
		self.codec_script.lock().is_some()
	}

	/// Context for a realm id, synthesizing a placeholder for realms whose
	/// creation event has not been seen.
	pub(crate) fn resolve_context(self: &Arc<Self>, id: ExecutionContextId) -> ExecutionContext {
		if let Some(context) = self.tracked_context(id) {
			return context;
		}
		tracing::debug!(
			context_id = id,
			session_id = ?self.session_id,
			"Execution context not tracked, using placeholder"
		);
		ExecutionContext::placeholder(self, id)
	}

	fn tracked_context(self: &Arc<Self>, id: ExecutionContextId) -> Option<ExecutionContext> {
		let contexts = self.contexts.lock();
		contexts
			.get(&id)
			.map(|entry| ExecutionContext::tracked(self, Arc::clone(&entry.description), entry.alive.subscribe()))
	}

	pub(crate) fn live_contexts(self: &Arc<Self>) -> Vec<ExecutionContext> {
		let contexts = self.contexts.lock();
		let mut live: Vec<_> = contexts
			.values()
			.map(|entry| ExecutionContext::tracked(self, Arc::clone(&entry.description), entry.alive.subscribe()))
			.collect();
		live.sort_by_key(|context| context.id());
		live
	}

	/// Records a new realm. Returns its context when tracking is enabled.
	fn insert_context(self: &Arc<Self>, description: ExecutionContextDescription) -> Option<ExecutionContext> {
		let description = Arc::new(description);
		let (alive, alive_rx) = watch::channel(true);
		let id = description.id;
		if let Some(previous) = self.contexts.lock().insert(
			id,
			ContextEntry {
				description: Arc::clone(&description),
				alive,
			},
		) {
			previous.alive.send_replace(false);
		}
		self.tracking
			.load(Ordering::SeqCst)
			.then(|| ExecutionContext::tracked(self, description, alive_rx))
	}

	fn remove_context(&self, id: ExecutionContextId) -> bool {
		match self.contexts.lock().remove(&id) {
			Some(entry) => {
				entry.alive.send_replace(false);
				true
			}
			None => false,
		}
	}

	fn clear_contexts(&self) {
		for (_, entry) in self.contexts.lock().drain() {
			entry.alive.send_replace(false);
		}
	}

	/// Moves this session and its children to the terminal detached state.
	pub(crate) fn mark_detached(&self, reason: DetachReason) {
		if self.detached.swap(true, Ordering::SeqCst) {
			return;
		}
		tracing::debug!(session_id = ?self.session_id, %reason, "Session detached");
		self.clear_contexts();

		let children: Vec<Session> = self.children.lock().drain(..).map(|(_, child)| child).collect();
		for child in children {
			child.inner.mark_detached(reason);
		}

		self.events.emit(SessionEvent::SessionDetached {
			session_id: self.session_id.clone(),
			reason,
		});
	}
}

/// One CDP debugging session.
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("session_id", &self.inner.session_id)
			.field("target", &self.inner.target_info.as_ref().map(|t| t.kind.as_str()))
			.field("attached", &self.inner.is_attached())
			.finish()
	}
}

impl Session {
	/// Creates the root session over `transport` without attaching it.
	///
	/// Must be called inside a Tokio runtime.
	pub fn new(transport: Arc<dyn DebuggerTransport>, config: SessionConfig) -> Self {
		Self::spawn(transport, None, None, None, config)
	}

	/// Attaches `transport` if needed and creates the root session.
	///
	/// Preloads the codec when [`SessionConfig::preload_codec`] is set.
	pub async fn attach(transport: Arc<dyn DebuggerTransport>, config: SessionConfig) -> Result<Self> {
		if !transport.is_attached() {
			transport.attach(config.protocol_version.as_deref())?;
		}
		let session = Self::new(transport, config);
		if session.inner.config.preload_codec {
			session.preload_codec().await?;
		}
		Ok(session)
	}

	pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
		Self { inner }
	}

	pub(crate) fn inner(&self) -> &Arc<SessionInner> {
		&self.inner
	}

	fn spawn(
		transport: Arc<dyn DebuggerTransport>,
		session_id: Option<String>,
		parent_session_id: Option<String>,
		target_info: Option<TargetInfo>,
		config: SessionConfig,
	) -> Self {
		let events_rx = transport.subscribe();
		let inner = Arc::new(SessionInner {
			transport,
			session_id,
			parent_session_id,
			target_info,
			config,
			detached: AtomicBool::new(false),
			contexts: Mutex::new(HashMap::new()),
			tracking: AtomicBool::new(false),
			auto_attach: Mutex::new(None),
			children: Mutex::new(IndexMap::new()),
			codec_script: Mutex::new(None),
			exposed: Mutex::new(IndexMap::new()),
			binding_added: AtomicBool::new(false),
			install_on_events: AtomicBool::new(false),
			events: EventBus::default(),
			dispatch: Mutex::new(None),
		});
		let task = tokio::spawn(dispatch::run(Arc::downgrade(&inner), events_rx));
		*inner.dispatch.lock() = Some(task);
		Self { inner }
	}

	/// Protocol session id, `None` for the root session.
	pub fn session_id(&self) -> Option<&str> {
		self.inner.session_id.as_deref()
	}

	/// Target this session is attached to, `None` for the root session.
	pub fn target_info(&self) -> Option<&TargetInfo> {
		self.inner.target_info.as_ref()
	}

	pub fn is_attached(&self) -> bool {
		self.inner.is_attached()
	}

	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}

	pub fn codec(&self) -> &Codec {
		&self.inner.config.codec
	}

	/// Sends a raw protocol command scoped to this session.
	///
	/// # Errors
	///
	/// [`Error::NotAttached`] when detached, [`Error::Timeout`] when
	/// [`SessionConfig::command_timeout`] expires, otherwise the protocol's error.
	pub async fn send(&self, method: &str, params: Json) -> Result<Json> {
		self.inner.send(method, params).await
	}

	/// Sends a command, failing with [`Error::Timeout`] after `timeout`.
	///
	/// A late response for a timed-out command is discarded.
	pub async fn send_with_timeout(&self, method: &str, params: Json, timeout: Duration) -> Result<Json> {
		tokio::time::timeout(timeout, self.inner.send(method, params))
			.await
			.map_err(|_| Error::Timeout(format!("{method} did not complete within {}ms", timeout.as_millis())))?
	}

	/// Context addressing whatever realm CDP considers the session's default.
	pub fn default_context(&self) -> ExecutionContext {
		ExecutionContext::default_realm(&self.inner)
	}

	/// Evaluates `function` in the default realm.
	pub async fn evaluate(&self, function: &JsFunction, args: Vec<Value>) -> Result<Value> {
		self.default_context().evaluate(function, args).await
	}

	pub async fn evaluate_with(&self, options: EvaluateOptions, function: &JsFunction, args: Vec<Value>) -> Result<Value> {
		self.default_context().evaluate_with(options, function, args).await
	}

	pub async fn evaluate_typed<T: DeserializeOwned>(&self, function: &JsFunction, args: Vec<Value>) -> Result<T> {
		self.default_context().evaluate_typed(function, args).await
	}

	/// Starts tracking execution contexts via `Runtime.enable`.
	///
	/// Returns `true` the first time and `false` on every later call. Note
	/// that pages can detect an enabled `Runtime` domain.
	pub async fn enable_track_execution_contexts(&self) -> Result<bool> {
		if self
			.inner
			.tracking
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			return Ok(false);
		}
		if let Err(e) = self.inner.send("Runtime.enable", json!({})).await {
			self.inner.tracking.store(false, Ordering::SeqCst);
			return Err(e);
		}
		Ok(true)
	}

	pub fn is_tracking_execution_contexts(&self) -> bool {
		self.inner.tracking.load(Ordering::SeqCst)
	}

	/// Every live tracked realm, ordered by id.
	pub fn execution_contexts(&self) -> Vec<ExecutionContext> {
		self.inner.live_contexts()
	}

	pub fn execution_context(&self, id: ExecutionContextId) -> Option<ExecutionContext> {
		self.inner.tracked_context(id)
	}

	/// Waits until the realm `id` is tracked.
	pub async fn wait_for_execution_context(&self, id: ExecutionContextId, timeout: Duration) -> Result<ExecutionContext> {
		let waiter = self
			.inner
			.events
			.register_waiter(move |event| matches!(event, SessionEvent::ExecutionContextCreated(c) if c.id() == Some(id)));
		if let Some(context) = self.execution_context(id) {
			return Ok(context);
		}
		let event = EventWaiter::new(waiter, timeout)
			.wait()
			.await
			.map_err(|e| match e {
				Error::Timeout(_) => Error::Timeout(format!("execution context {id} not created within {}ms", timeout.as_millis())),
				other => other,
			})?;
		match event {
			SessionEvent::ExecutionContextCreated(context) => Ok(context),
			_ => Err(Error::ChannelClosed),
		}
	}

	/// Registers the codec as a run-on-new-document script and installs it
	/// into the current default realm.
	///
	/// Later evaluations wait for this preloaded codec instead of shipping
	/// the codec with every script.
	pub async fn preload_codec(&self) -> Result<()> {
		if self.inner.codec_preloaded() {
			return Ok(());
		}
		let source = script::preload_source(&self.inner.config.codec);
		let params = AddScriptToEvaluateOnNewDocumentParams {
			source: source.clone(),
			run_immediately: Some(true),
		};
		let response = self
			.inner
			.send("Page.addScriptToEvaluateOnNewDocument", serde_json::to_value(&params)?)
			.await?;
		let AddScriptToEvaluateOnNewDocumentReturn { identifier } = serde_json::from_value(response)?;
		*self.inner.codec_script.lock() = Some(identifier);

		if let Err(e) = self.default_context().inject(&source).await {
			tracing::debug!(error = %e, "Codec preload into current realm failed");
		}
		Ok(())
	}

	/// Detaches this session.
	///
	/// The root session detaches the transport; a child session detaches
	/// from its target. Emits [`SessionEvent::SessionDetached`].
	pub async fn detach(&self) -> Result<()> {
		if self.inner.is_detached() {
			return Ok(());
		}
		match &self.inner.session_id {
			None => {
				self.inner.mark_detached(DetachReason::Detached);
				self.inner.transport.detach()
			}
			Some(session_id) => {
				let result = self
					.inner
					.transport
					.send_command(
						"Target.detachFromTarget",
						json!({ "sessionId": session_id }),
						self.inner.parent_session_id.as_deref(),
					)
					.await;
				self.inner.mark_detached(DetachReason::Detached);
				match result {
					Err(e) if e.is_target_gone() => Ok(()),
					other => other.map(|_| ()),
				}
			}
		}
	}

	/// Streams every event observed by this session from now on.
	pub fn subscribe(&self) -> EventStream<SessionEvent> {
		EventStream::new(self.inner.events.subscribe())
	}

	/// Calls `handler` for every event until the returned subscription is dropped.
	pub fn on_event<F>(&self, handler: F) -> EventSubscription
	where
		F: Fn(SessionEvent) + Send + Sync + 'static,
	{
		let mut stream = self.subscribe();
		let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

		tokio::spawn(async move {
			loop {
				tokio::select! {
					event = stream.recv() => match event {
						Some(event) => handler(event),
						None => break,
					},
					_ = &mut cancel_rx => break,
				}
			}
		});

		EventSubscription::new(cancel_tx)
	}

	/// Captures the first event matching `predicate` emitted after this call.
	///
	/// Register the waiter before triggering the event, then
	/// [`wait`](EventWaiter::wait) on it.
	pub fn wait_for_event<F>(&self, predicate: F, timeout: Duration) -> EventWaiter<SessionEvent>
	where
		F: Fn(&SessionEvent) -> bool + Send + Sync + 'static,
	{
		EventWaiter::new(self.inner.events.register_waiter(predicate), timeout)
	}
}
