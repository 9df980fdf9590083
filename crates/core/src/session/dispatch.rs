//! Per-session event loop.
//!
//! Every session of a transport sees every transport event. The loop keeps
//! the protocol events addressed to its own session id, applies them to the
//! session's tables synchronously, then re-emits them on the session bus.

use std::sync::{Arc, Weak};
use std::sync::atomic::Ordering;

use bridge_protocol::CdpEvent;
use bridge_runtime::{ProtocolEvent, TransportEvent};
use tokio::sync::broadcast;

use super::{SessionInner, targets};
use crate::context::ExecutionContext;
use crate::events::SessionEvent;
use crate::expose;

pub(super) async fn run(session: Weak<SessionInner>, mut rx: broadcast::Receiver<TransportEvent>) {
	loop {
		let event = match rx.recv().await {
			Ok(event) => event,
			Err(broadcast::error::RecvError::Lagged(n)) => {
				tracing::warn!(dropped = n, "Session dispatch lagged, transport events dropped");
				continue;
			}
			Err(broadcast::error::RecvError::Closed) => break,
		};

		let Some(inner) = session.upgrade() else {
			break;
		};
		handle(&inner, event);
		if inner.is_detached() {
			break;
		}
	}
	tracing::trace!("Session dispatch loop exited");
}

fn handle(inner: &Arc<SessionInner>, event: TransportEvent) {
	match event {
		TransportEvent::Protocol(event) => handle_protocol(inner, event),
		TransportEvent::Console(message) => expose::handle_console(inner, &message),
		TransportEvent::FrameCreated { frame_id } | TransportEvent::FrameNavigated { frame_id } => {
			if inner.session_id.is_none() && inner.install_on_events.load(Ordering::SeqCst) {
				expose::install_into(inner, ExecutionContext::for_frame(inner, frame_id));
			}
		}
		TransportEvent::WillFrameNavigate { frame_id } => {
			tracing::debug!(frame_id = %frame_id, "Frame navigating");
		}
		TransportEvent::Detached(reason) => inner.mark_detached(reason),
	}
}

fn handle_protocol(inner: &Arc<SessionInner>, event: ProtocolEvent) {
	let ProtocolEvent {
		method,
		params,
		session_id,
	} = event;
	if session_id != inner.session_id {
		return;
	}

	let event = match CdpEvent::parse(&method, params) {
		Ok(event) => event,
		Err(e) => {
			tracing::warn!(method = %method, error = %e, "Malformed protocol event");
			return;
		}
	};

	match &event {
		CdpEvent::ExecutionContextCreated(created) => {
			let context = inner.insert_context(created.context.clone());
			if inner.install_on_events.load(Ordering::SeqCst) {
				expose::install_into(inner, inner.resolve_context(created.context.id));
			}
			if let Some(context) = context {
				inner.events.emit(SessionEvent::ExecutionContextCreated(context));
			}
		}
		CdpEvent::ExecutionContextDestroyed(destroyed) => {
			let id = destroyed.execution_context_id;
			if inner.remove_context(id) {
				tracing::trace!(context_id = id, "Execution context destroyed");
			}
			inner.events.emit(SessionEvent::ExecutionContextDestroyed { id });
		}
		CdpEvent::ExecutionContextsCleared => {
			inner.clear_contexts();
			inner.events.emit(SessionEvent::ExecutionContextsCleared);
		}
		CdpEvent::BindingCalled(called) => expose::handle_binding(inner, called),
		CdpEvent::ConsoleApiCalled(called) => expose::handle_console_api(inner, called),
		CdpEvent::AttachedToTarget(attached) => targets::on_attached(inner, attached.clone()),
		CdpEvent::DetachedFromTarget(detached) => targets::on_detached(inner, &detached.session_id),
		CdpEvent::TargetCreated(created) => targets::on_target_created(inner, created.target_info.clone()),
		CdpEvent::TargetDestroyed(destroyed) => targets::on_destroyed(inner, &destroyed.target_id),
		CdpEvent::Other { .. } => {}
	}

	inner.events.emit(SessionEvent::Protocol(event));
}
