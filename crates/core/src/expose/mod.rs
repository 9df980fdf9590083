//! Exposing host callbacks as global functions inside remote realms.
//!
//! [`Session::expose_function`] installs a stub under the given global name
//! into every current realm and, through a run-on-new-document script, into
//! every future one. Calling the stub transmits a call record to the host,
//! either through a CDP binding ([`ExposeMode::Cdp`]) or as a tagged
//! `console.debug` line ([`ExposeMode::Electron`]). The host runs the
//! callback and, with [`ExposeOptions::with_return_value`], writes the result
//! back into the calling realm under the call's sequence id.
//!
//! Each call sequence executes at most once on the host: retransmissions
//! caused by [`RetryOptions`] are acknowledged again but not re-run.
//!
//! # Example
//!
//! ```ignore
//! session
//! 	.expose_function("ping", |_call| async { Ok(Value::from("pong")) }, ExposeOptions::new().with_return_value())
//! 	.await?;
//! // In the page: `await ping()` resolves to "pong".
//! ```

mod handler;
mod options;
mod stub;

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bridge_protocol::{AddBindingParams, AddScriptToEvaluateOnNewDocumentParams, AddScriptToEvaluateOnNewDocumentReturn};
use bridge_runtime::{Error, Result};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::json;

pub(crate) use handler::{handle_binding, handle_console, handle_console_api};
pub use options::{ExposeMode, ExposeOptions, ReturnValueOptions, RetryOptions};
pub use stub::{BINDING, CONSOLE_PREFIX};

use crate::codec::Value;
use crate::context::ExecutionContext;
use crate::session::{Session, SessionInner};

/// Remembered call sequences per exposed function.
const SEEN_CAPACITY: usize = 1024;

/// One invocation of an exposed function.
#[derive(Debug, Clone)]
pub struct ExposedCall {
	/// Name the function is exposed under
	pub name: String,
	/// Decoded arguments
	pub args: Vec<Value>,
	/// Realm the call came from
	pub context: ExecutionContext,
	/// Stub-assigned call id, unique per realm
	pub sequence: String,
}

/// Boxed future returned by an exposed callback.
pub type ExposedFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Host callback behind an exposed function.
pub type ExposedFn = Arc<dyn Fn(ExposedCall) -> ExposedFuture + Send + Sync>;

pub(crate) struct Registration {
	pub(crate) name: String,
	pub(crate) callback: ExposedFn,
	pub(crate) options: ExposeOptions,
	/// Stub install script
	pub(crate) source: String,
	script_id: Mutex<Option<String>>,
	seen: Mutex<SeenSequences>,
}

impl fmt::Debug for Registration {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Registration")
			.field("name", &self.name)
			.field("options", &self.options)
			.field("script_id", &*self.script_id.lock())
			.finish()
	}
}

impl Registration {
	/// Records `sequence`, returning `false` if it was already seen.
	pub(crate) fn mark_seen(&self, sequence: &str) -> bool {
		self.seen.lock().insert(sequence)
	}
}

/// Bounded insertion-ordered set of call sequences.
#[derive(Default)]
struct SeenSequences {
	order: VecDeque<String>,
	members: HashSet<String>,
}

impl SeenSequences {
	fn insert(&mut self, sequence: &str) -> bool {
		if self.members.contains(sequence) {
			return false;
		}
		if self.order.len() == SEEN_CAPACITY {
			if let Some(oldest) = self.order.pop_front() {
				self.members.remove(&oldest);
			}
		}
		self.order.push_back(sequence.to_string());
		self.members.insert(sequence.to_string());
		true
	}
}

impl Session {
	/// Exposes `callback` as `globalThis[name]` in every realm of this session.
	///
	/// Resolves once the stub is registered for new documents and pushed,
	/// best-effort, into the default realm, every tracked execution context
	/// and every frame the transport knows about.
	///
	/// # Errors
	///
	/// - [`Error::InvalidArgument`] if `name` is not a JavaScript identifier
	/// - [`Error::AlreadyExposed`] if `name` is already exposed on this session
	/// - [`Error::NotAttached`] if the session is detached
	pub async fn expose_function<F, Fut>(&self, name: &str, callback: F, options: ExposeOptions) -> Result<()>
	where
		F: Fn(ExposedCall) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		let callback: ExposedFn = Arc::new(move |call| -> ExposedFuture { Box::pin(callback(call)) });
		self.expose_boxed(name, callback, options).await
	}

	/// [`expose_function`](Self::expose_function) for an already boxed callback.
	pub async fn expose_boxed(&self, name: &str, callback: ExposedFn, options: ExposeOptions) -> Result<()> {
		if !is_identifier(name) {
			return Err(Error::InvalidArgument(format!("'{name}' is not a valid global function name")));
		}
		if self.is_function_exposed(name) {
			return Err(Error::AlreadyExposed(name.to_string()));
		}
		let inner = self.inner();
		if !inner.is_attached() {
			return Err(Error::NotAttached {
				session: inner.session_id.clone(),
			});
		}

		if options.mode == ExposeMode::Cdp {
			self.enable_track_execution_contexts().await?;
			if !inner.binding_added.swap(true, Ordering::SeqCst) {
				let params = AddBindingParams {
					name: BINDING.to_string(),
					execution_context_name: None,
				};
				if let Err(e) = inner.send("Runtime.addBinding", serde_json::to_value(&params)?).await {
					inner.binding_added.store(false, Ordering::SeqCst);
					return Err(e);
				}
			}
		}

		let registration = Arc::new(Registration {
			name: name.to_string(),
			callback,
			source: stub::install_source(name, &options, inner.session_id.as_deref(), &inner.config.codec)?,
			options,
			script_id: Mutex::new(None),
			seen: Mutex::new(SeenSequences::default()),
		});
		{
			let mut exposed = inner.exposed.lock();
			if exposed.contains_key(name) {
				return Err(Error::AlreadyExposed(name.to_string()));
			}
			exposed.insert(name.to_string(), Arc::clone(&registration));
		}

		let params = AddScriptToEvaluateOnNewDocumentParams {
			source: registration.source.clone(),
			run_immediately: Some(true),
		};
		let added = match inner
			.send("Page.addScriptToEvaluateOnNewDocument", serde_json::to_value(&params)?)
			.await
		{
			Ok(response) => serde_json::from_value::<AddScriptToEvaluateOnNewDocumentReturn>(response).map_err(Error::from),
			Err(e) => Err(e),
		};
		match added {
			Ok(AddScriptToEvaluateOnNewDocumentReturn { identifier }) => {
				*registration.script_id.lock() = Some(identifier);
			}
			Err(e @ (Error::NotAttached { .. } | Error::TargetGone(_))) => {
				inner.exposed.lock().shift_remove(name);
				return Err(e);
			}
			Err(e) => {
				tracing::debug!(
					name,
					error = %e,
					"New-document script unavailable, installing on context and frame events"
				);
				inner.install_on_events.store(true, Ordering::SeqCst);
			}
		}

		let installed = broadcast(inner, |context| stub::tag_frame(&registration.source, context.frame_id())).await;
		tracing::debug!(name, mode = ?registration.options.mode, realms = installed, "Exposed function");
		Ok(())
	}

	/// Removes an exposed function from this session and its live realms.
	///
	/// Returns `false` if `name` was not exposed.
	pub async fn remove_exposed_function(&self, name: &str) -> Result<bool> {
		let inner = self.inner();
		let Some(registration) = inner.exposed.lock().shift_remove(name) else {
			return Ok(false);
		};

		let script_id = registration.script_id.lock().take();
		if let Some(identifier) = script_id {
			if let Err(e) = inner
				.send("Page.removeScriptToEvaluateOnNewDocument", json!({ "identifier": identifier }))
				.await
			{
				tracing::debug!(name, error = %e, "Failed to remove new-document script");
			}
		}

		let binding_in_use = inner
			.exposed
			.lock()
			.values()
			.any(|r| r.options.mode == ExposeMode::Cdp);
		if registration.options.mode == ExposeMode::Cdp
			&& !binding_in_use
			&& inner.binding_added.swap(false, Ordering::SeqCst)
		{
			if let Err(e) = inner.send("Runtime.removeBinding", json!({ "name": BINDING })).await {
				tracing::debug!(error = %e, "Failed to remove binding");
			}
		}

		let last = inner.exposed.lock().is_empty();
		if last {
			inner.install_on_events.store(false, Ordering::SeqCst);
		}

		let cleanup = stub::cleanup_source(name, last);
		broadcast(inner, |_| cleanup.clone()).await;
		Ok(true)
	}

	pub fn is_function_exposed(&self, name: &str) -> bool {
		self.inner().exposed.lock().contains_key(name)
	}

	/// Names of every exposed function, in exposure order.
	pub fn exposed_functions(&self) -> Vec<String> {
		self.inner().exposed.lock().keys().cloned().collect()
	}
}

/// Runs the script `script` builds for each reachable realm, returning how
/// many realms accepted it.
async fn broadcast<F>(inner: &Arc<SessionInner>, script: F) -> usize
where
	F: Fn(&ExecutionContext) -> String,
{
	let mut targets = vec![ExecutionContext::default_realm(inner)];
	targets.extend(inner.live_contexts());
	if inner.session_id.is_none() {
		targets.extend(
			inner
				.transport
				.frame_ids()
				.into_iter()
				.map(|frame_id| ExecutionContext::for_frame(inner, frame_id)),
		);
	}

	let scripts: Vec<String> = targets.iter().map(&script).collect();
	let results = join_all(targets.iter().zip(&scripts).map(|(context, source)| context.inject(source))).await;
	let mut accepted = 0;
	for (context, result) in targets.iter().zip(results) {
		match result {
			Ok(()) => accepted += 1,
			Err(e) => tracing::debug!(context = %context.label(), error = %e, "Skipped realm"),
		}
	}
	accepted
}

/// Installs every exposed stub into a newly reported realm or frame.
pub(crate) fn install_into(inner: &Arc<SessionInner>, context: ExecutionContext) {
	let sources: Vec<String> = inner
		.exposed
		.lock()
		.values()
		.map(|r| stub::tag_frame(&r.source, context.frame_id()))
		.collect();
	if sources.is_empty() {
		return;
	}
	tokio::spawn(async move {
		for source in sources {
			if let Err(e) = context.inject(&source).await {
				tracing::debug!(context = %context.label(), error = %e, "Stub install failed");
				return;
			}
		}
	});
}

fn is_identifier(name: &str) -> bool {
	let mut chars = name.chars();
	chars
		.next()
		.is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
		&& chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn seen_sequences_dedup_and_evict_oldest() {
		let mut seen = SeenSequences::default();
		assert!(seen.insert("1-a"));
		assert!(!seen.insert("1-a"));

		for i in 0..SEEN_CAPACITY {
			seen.insert(&format!("fill-{i}"));
		}
		assert_eq!(seen.order.len(), SEEN_CAPACITY);
		assert!(seen.insert("1-a"), "oldest entry should have been evicted");
	}

	#[test]
	fn exposed_names_must_be_identifiers() {
		assert!(is_identifier("ping"));
		assert!(is_identifier("$bridge_2"));
		assert!(!is_identifier(""));
		assert!(!is_identifier("2fast"));
		assert!(!is_identifier("a.b"));
		assert!(!is_identifier("x\"]; alert(1); //"));
	}
}
