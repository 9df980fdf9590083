//! Command/response correlation for flat-mode CDP.
//!
//! This module implements the request/response correlation layer on top of a
//! raw frame pipe. It handles:
//! - Generating unique command ids
//! - Correlating responses with pending commands
//! - Distinguishing events from responses
//! - Fanning events out to transport subscribers
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send_message`] with method, params and session
//! 2. Connection allocates an id and registers a oneshot channel
//! 3. The serialized command is queued on the outbound channel
//! 4. Caller awaits the oneshot receiver
//! 5. The reader feeds inbound frames to [`Connection::dispatch_text`]
//! 6. Responses are matched by id; events are broadcast as [`TransportEvent`]s

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bridge_protocol::{Event, Message, Request, Response};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{Error, Result};
use crate::transport::{ProtocolEvent, TransportEvent};

/// Pending command callbacks keyed by command id.
type CallbackMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// RAII guard ensuring callback cleanup when a command future is dropped.
struct CancelGuard {
	id: u64,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u64, callbacks: CallbackMap) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.callbacks.lock().remove(&self.id).is_some() {
			tracing::debug!(id = self.id, "CancelGuard: removed orphaned callback");
		}
	}
}

/// Future returned by [`Connection::send_message`] with automatic cancellation cleanup.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// CDP connection state shared between the writer, the reader and callers.
///
/// Uses sequential command ids and oneshot channels for correlation. A
/// command whose future is dropped (e.g. by a caller-side timeout) has its
/// callback removed; a late response for it is discarded harmlessly.
pub struct Connection {
	/// Sequential command id counter
	last_id: AtomicU64,
	/// Pending command callbacks keyed by command id
	callbacks: CallbackMap,
	/// Serialized frames waiting for the writer task
	outbound_tx: mpsc::UnboundedSender<String>,
	/// Inbound event fan-out
	events_tx: broadcast::Sender<TransportEvent>,
}

impl Connection {
	pub fn new(outbound_tx: mpsc::UnboundedSender<String>, events_tx: broadcast::Sender<TransportEvent>) -> Self {
		Self {
			last_id: AtomicU64::new(1),
			callbacks: Arc::new(Mutex::new(HashMap::new())),
			outbound_tx,
			events_tx,
		}
	}

	/// Sends a command and awaits its response.
	pub async fn send_message(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
		let id = self.last_id.fetch_add(1, Ordering::SeqCst);

		tracing::debug!(id, method, session_id, "Sending command");

		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(id, tx);

		let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

		let request = Request {
			id,
			method: method.to_string(),
			params,
			session_id: session_id.map(str::to_string),
		};

		let frame = serde_json::to_string(&request)?;

		if self.outbound_tx.send(frame).is_err() {
			tracing::error!("Failed to queue command: outbound channel closed");
			return Err(Error::ChannelClosed);
		}

		ResponseFuture { rx, guard }.await
	}

	/// Parses and dispatches one inbound text frame, logging malformed input.
	pub fn dispatch_text(&self, text: &str) {
		match serde_json::from_str::<Message>(text) {
			Ok(message) => {
				if let Err(e) = self.dispatch(message) {
					tracing::error!("Error dispatching message: {}", e);
				}
			}
			Err(e) => tracing::error!("Failed to parse message: {}", e),
		}
	}

	/// Dispatches an inbound message.
	pub fn dispatch(&self, message: Message) -> Result<()> {
		match message {
			Message::Response(response) => self.handle_response(response),
			Message::Event(event) => {
				self.handle_event(event);
				Ok(())
			}
			Message::Unknown(value) => {
				tracing::debug!(
					"Unknown message type (forward-compatible, ignored): {}",
					serde_json::to_string(&value).unwrap_or_else(|_| "<serialization failed>".to_string())
				);
				Ok(())
			}
		}
	}

	/// Fails every pending command, e.g. after the socket closed.
	pub fn fail_pending(&self, reason: &str) {
		let pending: Vec<_> = self.callbacks.lock().drain().collect();
		for (id, callback) in pending {
			tracing::debug!(id, "Failing pending command: {}", reason);
			let _ = callback.send(Err(Error::TargetGone(reason.to_string())));
		}
	}

	/// Number of commands still waiting for a response.
	pub fn pending_count(&self) -> usize {
		self.callbacks.lock().len()
	}

	fn handle_response(&self, response: Response) -> Result<()> {
		let callback = self.callbacks.lock().remove(&response.id);
		let Some(callback) = callback else {
			// Late reply for a command whose caller already gave up.
			tracing::debug!(id = response.id, "Discarding response for abandoned command");
			return Ok(());
		};

		let result = match response.error {
			Some(error) => Err(Error::from_protocol(error.code, error.message)),
			None => Ok(response.result.unwrap_or(Value::Null)),
		};

		let _ = callback.send(result);
		Ok(())
	}

	fn handle_event(&self, event: Event) {
		let Event {
			method,
			params,
			session_id,
		} = event;
		// No subscribers is not an error: nobody has attached a session yet.
		let _ = self.events_tx.send(TransportEvent::Protocol(ProtocolEvent {
			method,
			params,
			session_id,
		}));
	}
}

#[cfg(test)]
mod tests;
