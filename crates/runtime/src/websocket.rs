//! WebSocket implementation of [`DebuggerTransport`].
//!
//! Speaks flat-mode CDP to a DevTools endpoint such as
//! `ws://127.0.0.1:9222/devtools/page/<id>`. Child sessions share the socket
//! and are told apart by the `sessionId` on each frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport::{CommandFuture, DebuggerTransport, DetachReason, TransportEvent};

const EVENT_CAPACITY: usize = 1024;

/// CDP over a single WebSocket.
pub struct WebSocketTransport {
	url: String,
	connection: Arc<Connection>,
	events_tx: broadcast::Sender<TransportEvent>,
	attached: Arc<AtomicBool>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketTransport {
	/// Connects to a DevTools WebSocket endpoint.
	///
	/// The returned transport is already attached.
	pub async fn connect(url: &str) -> Result<Arc<Self>> {
		tracing::info!(url, "Connecting to DevTools WebSocket");

		let (stream, _) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|e| Error::ConnectionFailed {
				url: url.to_string(),
				reason: e.to_string(),
			})?;
		let (mut sink, mut source) = stream.split();

		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
		let connection = Arc::new(Connection::new(outbound_tx, events_tx.clone()));
		let attached = Arc::new(AtomicBool::new(true));

		let writer = tokio::spawn(async move {
			while let Some(frame) = outbound_rx.recv().await {
				if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
					tracing::error!("Transport write error: {}", e);
					break;
				}
			}
		});

		let reader = {
			let connection = Arc::clone(&connection);
			let events_tx = events_tx.clone();
			let attached = Arc::clone(&attached);
			tokio::spawn(async move {
				while let Some(frame) = source.next().await {
					match frame {
						Ok(WsMessage::Text(text)) => connection.dispatch_text(&text),
						Ok(WsMessage::Close(_)) => break,
						Ok(_) => {}
						Err(e) => {
							tracing::error!("Transport read error: {}", e);
							break;
						}
					}
				}
				if attached.swap(false, Ordering::SeqCst) {
					connection.fail_pending("WebSocket closed");
					let _ = events_tx.send(TransportEvent::Detached(DetachReason::WebContentsDestroyed));
				}
			})
		};

		tracing::info!(url, "DevTools WebSocket connection established");

		Ok(Arc::new(Self {
			url: url.to_string(),
			connection,
			events_tx,
			attached,
			tasks: Mutex::new(vec![writer, reader]),
		}))
	}

	pub fn url(&self) -> &str {
		&self.url
	}
}

impl DebuggerTransport for WebSocketTransport {
	fn attach(&self, protocol_version: Option<&str>) -> Result<()> {
		if self.is_attached() {
			tracing::debug!(url = %self.url, protocol_version, "WebSocket transport already attached");
			return Ok(());
		}
		Err(Error::Unsupported(format!(
			"reattaching closed WebSocket {}; connect again",
			self.url
		)))
	}

	fn detach(&self) -> Result<()> {
		if !self.attached.swap(false, Ordering::SeqCst) {
			return Ok(());
		}
		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
		self.connection.fail_pending("Debugger detached");
		let _ = self
			.events_tx
			.send(TransportEvent::Detached(DetachReason::WebContentsDetached));
		Ok(())
	}

	fn is_attached(&self) -> bool {
		self.attached.load(Ordering::SeqCst)
	}

	fn send_command<'a>(&'a self, method: &'a str, params: Value, session_id: Option<&'a str>) -> CommandFuture<'a> {
		Box::pin(async move {
			if !self.is_attached() {
				return Err(Error::NotAttached {
					session: session_id.map(str::to_string),
				});
			}
			self.connection.send_message(method, params, session_id).await
		})
	}

	fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
		self.events_tx.subscribe()
	}
}

impl Drop for WebSocketTransport {
	fn drop(&mut self) {
		for task in self.tasks.get_mut().drain(..) {
			task.abort();
		}
	}
}
