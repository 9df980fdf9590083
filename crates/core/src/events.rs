//! Session event surface.
//!
//! Provides abstractions for consuming what a [`Session`] observes:
//!
//! - [`SessionEvent`] - Closed set of lifecycle events plus every raw protocol event
//! - [`EventBus`] - Internal dispatcher combining a broadcast channel with predicate-based waiters
//! - [`EventStream`] - Wrapper around [`broadcast::Receiver`] with lag handling
//! - [`EventWaiter`] - One-shot event capture with timeout support
//! - [`EventSubscription`] - RAII handle for callback-style handlers
//!
//! Both consumption patterns (streams and `on_event` callbacks) stop when
//! their handle is dropped.
//!
//! [`Session`]: crate::Session
//! [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bridge_protocol::{CdpEvent, ExecutionContextId};
use bridge_runtime::{DetachReason, Error, Result};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::context::ExecutionContext;
use crate::session::Session;

/// Something a session observed.
#[derive(Debug, Clone)]
pub enum SessionEvent {
	/// A realm appeared. Only emitted while execution-context tracking is enabled.
	ExecutionContextCreated(ExecutionContext),
	ExecutionContextDestroyed { id: ExecutionContextId },
	ExecutionContextsCleared,
	/// A child session was auto-attached or explicitly attached.
	SessionAttached(Session),
	/// This session (or, with `session_id` of a child, one of its children) detached.
	SessionDetached {
		session_id: Option<String>,
		reason: DetachReason,
	},
	/// Every protocol event addressed to this session.
	Protocol(CdpEvent),
}

/// RAII handle that cancels an [`on_event`](crate::Session::on_event) callback when dropped.
pub struct EventSubscription {
	cancel_tx: Option<oneshot::Sender<()>>,
}

impl EventSubscription {
	pub(crate) fn new(cancel_tx: oneshot::Sender<()>) -> Self {
		Self {
			cancel_tx: Some(cancel_tx),
		}
	}

	/// Explicitly cancels the subscription, equivalent to dropping it.
	pub fn unsubscribe(mut self) {
		if let Some(tx) = self.cancel_tx.take() {
			let _ = tx.send(());
		}
	}
}

impl Drop for EventSubscription {
	fn drop(&mut self) {
		if let Some(tx) = self.cancel_tx.take() {
			let _ = tx.send(());
		}
	}
}

impl std::fmt::Debug for EventSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventSubscription")
			.field("active", &self.cancel_tx.is_some())
			.finish()
	}
}

struct WaiterEntry<E> {
	predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
	complete_tx: oneshot::Sender<E>,
}

/// Broadcast channel plus predicate-based waiters.
///
/// Waiters are checked first during [`emit`](Self::emit) so `wait_for_*`
/// calls see their event even when stream subscribers are lagging.
pub(crate) struct EventBus<E: Clone + Send + 'static> {
	tx: broadcast::Sender<E>,
	waiters: Mutex<Vec<WaiterEntry<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		Self {
			tx,
			waiters: Mutex::new(Vec::new()),
		}
	}

	/// Emits an event to matching waiters, then to all subscribers.
	pub fn emit(&self, event: E) {
		{
			let mut waiters = self.waiters.lock();
			let mut i = 0;
			while i < waiters.len() {
				if waiters[i].complete_tx.is_closed() {
					waiters.swap_remove(i);
				} else if (waiters[i].predicate)(&event) {
					let entry = waiters.swap_remove(i);
					let _ = entry.complete_tx.send(event.clone());
				} else {
					i += 1;
				}
			}
		}
		let _ = self.tx.send(event);
	}

	/// Events emitted before subscribing are not received.
	pub fn subscribe(&self) -> broadcast::Receiver<E> {
		self.tx.subscribe()
	}

	/// Registers a waiter for the first event matching `predicate`.
	pub fn register_waiter<F>(&self, predicate: F) -> oneshot::Receiver<E>
	where
		F: Fn(&E) -> bool + Send + Sync + 'static,
	{
		let (complete_tx, complete_rx) = oneshot::channel();
		self.waiters.lock().push(WaiterEntry {
			predicate: Box::new(predicate),
			complete_tx,
		});
		complete_rx
	}

	#[cfg(test)]
	pub fn waiter_count(&self) -> usize {
		self.waiters.lock().len()
	}
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
	fn default() -> Self {
		Self::new(256)
	}
}

/// [`broadcast::Receiver`] wrapper that logs and skips over lag.
///
/// [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver
pub struct EventStream<E: Clone + Send + 'static> {
	rx: broadcast::Receiver<E>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
	pub(crate) fn new(rx: broadcast::Receiver<E>) -> Self {
		Self { rx }
	}

	/// Receives the next event, or `None` once the session is gone.
	pub async fn recv(&mut self) -> Option<E> {
		loop {
			match self.rx.recv().await {
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "Event stream lagged, dropped events");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}

	/// Returns an event if one is immediately available.
	pub fn try_recv(&mut self) -> Option<E> {
		loop {
			match self.rx.try_recv() {
				Ok(event) => return Some(event),
				Err(broadcast::error::TryRecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "Event stream lagged, dropped events");
				}
				Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => return None,
			}
		}
	}
}

/// One-shot event waiter.
///
/// [`wait`](Self::wait) applies the configured timeout; awaiting the waiter
/// directly waits indefinitely.
pub struct EventWaiter<E> {
	rx: oneshot::Receiver<E>,
	timeout: Duration,
}

impl<E: Send + 'static> EventWaiter<E> {
	pub(crate) fn new(rx: oneshot::Receiver<E>, timeout: Duration) -> Self {
		Self { rx, timeout }
	}

	/// # Errors
	///
	/// - [`Error::Timeout`] if no matching event arrives in time
	/// - [`Error::ChannelClosed`] if the session is dropped first
	pub async fn wait(self) -> Result<E> {
		tokio::time::timeout(self.timeout, self.rx)
			.await
			.map_err(|_| Error::Timeout(format!("no matching event within {:?}", self.timeout)))?
			.map_err(|_| Error::ChannelClosed)
	}
}

impl<E: Send + 'static> Future for EventWaiter<E> {
	type Output = Result<E>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(Ok(event)) => Poll::Ready(Ok(event)),
			Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ChannelClosed)),
			Poll::Pending => Poll::Pending,
		}
	}
}
