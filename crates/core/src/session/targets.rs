//! Related targets: auto-attach, explicit attach and child session bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use bridge_protocol::{AttachToTargetParams, AttachToTargetReturn, AttachedToTarget, SetAutoAttachParams, TargetInfo};
use bridge_runtime::{DetachReason, Error, Result};
use serde_json::json;

use super::{Session, SessionInner};
use crate::events::{EventWaiter, SessionEvent};

/// How long `attach_to_target` waits for the matching `attachedToTarget`
/// when no command timeout is configured.
const ATTACH_EVENT_WAIT: Duration = Duration::from_secs(5);

impl Session {
	/// Starts auto-attaching to related targets (iframes, workers).
	///
	/// Each newly attached target becomes a child session, announced with
	/// [`SessionEvent::SessionAttached`]. With `recursive`, every child
	/// auto-attaches to its own related targets. Shared workers are not
	/// auto-attached by CDP and are attached explicitly when discovered.
	///
	/// Returns `true` the first time and `false` afterwards.
	pub async fn enable_auto_attach(&self, recursive: bool) -> Result<bool> {
		{
			let mut auto_attach = self.inner.auto_attach.lock();
			if auto_attach.is_some() {
				return Ok(false);
			}
			*auto_attach = Some(recursive);
		}

		let params = SetAutoAttachParams {
			auto_attach: true,
			wait_for_debugger_on_start: false,
			flatten: true,
		};
		if let Err(e) = self.inner.send("Target.setAutoAttach", serde_json::to_value(&params)?).await {
			*self.inner.auto_attach.lock() = None;
			return Err(e);
		}

		// Target discovery is browser-scoped; sub-target sessions may refuse it.
		if let Err(e) = self.inner.send("Target.setDiscoverTargets", json!({ "discover": true })).await {
			tracing::debug!(session_id = ?self.inner.session_id, error = %e, "Target discovery unavailable");
		}
		Ok(true)
	}

	pub fn is_auto_attaching(&self) -> bool {
		self.inner.auto_attach.lock().is_some()
	}

	/// Attaches to `target_id` and returns its child session.
	///
	/// Attaching to an already attached target returns the existing child.
	pub async fn attach_to_target(&self, target_id: &str) -> Result<Session> {
		if let Some(existing) = self.child_for_target(target_id) {
			return Ok(existing);
		}

		let wanted = target_id.to_string();
		let waiter = self.inner.events.register_waiter(move |event| {
			matches!(event, SessionEvent::SessionAttached(child) if child.target_info().is_some_and(|t| t.target_id == wanted))
		});

		let params = AttachToTargetParams {
			target_id: target_id.to_string(),
			flatten: true,
		};
		let response = self
			.inner
			.send("Target.attachToTarget", serde_json::to_value(&params)?)
			.await?;
		let AttachToTargetReturn { session_id } = serde_json::from_value(response)?;

		if let Some(child) = self.inner.children.lock().get(&session_id).cloned() {
			return Ok(child);
		}
		let limit = self.inner.config.command_wait().unwrap_or(ATTACH_EVENT_WAIT);
		match EventWaiter::new(waiter, limit).wait().await? {
			SessionEvent::SessionAttached(child) => Ok(child),
			_ => Err(Error::ChannelClosed),
		}
	}

	/// Child sessions currently attached, in attach order.
	pub fn child_sessions(&self) -> Vec<Session> {
		self.inner.children.lock().values().cloned().collect()
	}

	fn child_for_target(&self, target_id: &str) -> Option<Session> {
		self.inner
			.children
			.lock()
			.values()
			.find(|child| child.target_info().is_some_and(|t| t.target_id == target_id))
			.cloned()
	}
}

/// `Target.attachedToTarget`: creates the child session exactly once.
pub(super) fn on_attached(parent: &Arc<SessionInner>, event: AttachedToTarget) {
	let AttachedToTarget {
		session_id,
		target_info,
		waiting_for_debugger,
	} = event;

	let child = {
		let mut children = parent.children.lock();
		if children.contains_key(&session_id) {
			return;
		}
		let child = Session::spawn(
			Arc::clone(&parent.transport),
			Some(session_id.clone()),
			parent.session_id.clone(),
			Some(target_info),
			parent.config.clone(),
		);
		children.insert(session_id.clone(), child.clone());
		child
	};

	tracing::debug!(
		parent = ?parent.session_id,
		session_id = %session_id,
		target = ?child.target_info().map(|t| t.kind.as_str()),
		"Attached to target"
	);
	parent.events.emit(SessionEvent::SessionAttached(child.clone()));

	let recursive = *parent.auto_attach.lock() == Some(true);
	let preload = parent.config.preload_codec;
	if !(waiting_for_debugger || recursive || preload) {
		return;
	}

	tokio::spawn(async move {
		if recursive {
			if let Err(e) = child.enable_auto_attach(true).await {
				tracing::debug!(session_id = ?child.session_id(), error = %e, "Recursive auto-attach failed");
			}
		}
		if preload {
			if let Err(e) = child.preload_codec().await {
				tracing::debug!(session_id = ?child.session_id(), error = %e, "Codec preload failed");
			}
		}
		if waiting_for_debugger {
			if let Err(e) = child.send("Runtime.runIfWaitingForDebugger", json!({})).await {
				tracing::debug!(session_id = ?child.session_id(), error = %e, "Failed to resume target");
			}
		}
	});
}

/// `Target.targetCreated`: shared workers never arrive through auto-attach.
pub(super) fn on_target_created(parent: &Arc<SessionInner>, target_info: TargetInfo) {
	if !target_info.is_shared_worker() || target_info.attached || parent.auto_attach.lock().is_none() {
		return;
	}
	let session = Session::from_inner(Arc::clone(parent));
	tokio::spawn(async move {
		if let Err(e) = session.attach_to_target(&target_info.target_id).await {
			tracing::debug!(target_id = %target_info.target_id, error = %e, "Failed to attach shared worker");
		}
	});
}

/// `Target.detachedFromTarget`
pub(super) fn on_detached(parent: &SessionInner, session_id: &str) {
	let child = parent.children.lock().shift_remove(session_id);
	if let Some(child) = child {
		release(parent, child, DetachReason::Detached);
	}
}

/// `Target.targetDestroyed`
pub(super) fn on_destroyed(parent: &SessionInner, target_id: &str) {
	let child = {
		let mut children = parent.children.lock();
		let key = children
			.iter()
			.find(|(_, child)| child.target_info().is_some_and(|t| t.target_id == target_id))
			.map(|(key, _)| key.clone());
		key.and_then(|key| children.shift_remove(&key))
	};
	if let Some(child) = child {
		release(parent, child, DetachReason::Destroyed);
	}
}

fn release(parent: &SessionInner, child: Session, reason: DetachReason) {
	let session_id = child.session_id().map(str::to_string);
	child.inner().mark_detached(reason);
	parent.events.emit(SessionEvent::SessionDetached { session_id, reason });
}
