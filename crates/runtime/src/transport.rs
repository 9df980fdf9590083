//! The seam between the bridge and the embedding runtime's debugger.
//!
//! A [`DebuggerTransport`] is whatever owns the raw CDP pipe: an embedder's
//! debugger object, or the [`WebSocketTransport`](crate::WebSocketTransport)
//! shipped with this crate. Sessions hold it as a shared, non-owning
//! `Arc<dyn DebuggerTransport>` and funnel every command through
//! [`send_command`](DebuggerTransport::send_command).
//!
//! Inbound traffic is delivered as [`TransportEvent`]s on a broadcast
//! channel. Every subscriber sees every event; demultiplexing by session id
//! is the subscriber's job.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{Error, Result};

/// Boxed future returned by transport commands.
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Raw debugger connection supplied by the embedding runtime.
pub trait DebuggerTransport: Send + Sync {
	/// Attaches the debugger, optionally pinning a protocol version.
	fn attach(&self, protocol_version: Option<&str>) -> Result<()>;

	/// Detaches the debugger. Pending commands fail with [`Error::TargetGone`].
	fn detach(&self) -> Result<()>;

	fn is_attached(&self) -> bool;

	/// Sends a CDP command, scoped to `session_id` when given.
	fn send_command<'a>(&'a self, method: &'a str, params: Value, session_id: Option<&'a str>) -> CommandFuture<'a>;

	/// Subscribes to inbound events. Events sent before subscribing are not seen.
	fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

	/// Runs `source` in the frame identified by `frame_id` and resolves with
	/// the script's completion value.
	///
	/// Used when a realm is known only by frame (before its execution context
	/// was reported). Transports without frame access keep the default.
	fn execute_in_frame<'a>(&'a self, frame_id: &'a str, source: &'a str, user_gesture: bool) -> CommandFuture<'a> {
		let _ = (source, user_gesture);
		Box::pin(async move {
			Err(Error::Unsupported(format!(
				"frame-scoped execution (frame {frame_id})"
			)))
		})
	}

	/// Ids of every frame currently known to the embedder.
	fn frame_ids(&self) -> Vec<String> {
		Vec::new()
	}
}

/// Inbound notification from the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
	/// A raw CDP event.
	Protocol(ProtocolEvent),
	/// A console message surfaced by the embedder for one of its frames.
	Console(ConsoleMessage),
	FrameCreated { frame_id: String },
	WillFrameNavigate { frame_id: String },
	FrameNavigated { frame_id: String },
	/// The debugger connection went away.
	Detached(DetachReason),
}

/// A CDP event together with the session it was raised in.
#[derive(Debug, Clone)]
pub struct ProtocolEvent {
	pub method: String,
	pub params: Value,
	/// Absent for the root session
	pub session_id: Option<String>,
}

/// Console line reported by the embedder, outside of the CDP `Runtime` domain.
#[derive(Debug, Clone)]
pub struct ConsoleMessage {
	pub level: ConsoleLevel,
	pub text: String,
	pub frame_id: Option<String>,
}

/// Severity of an embedder console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
	/// `console.debug()`
	Verbose,
	Info,
	Warning,
	Error,
}

impl ConsoleLevel {
	/// Maps the numeric level used by Chromium embedders (0 = verbose .. 3 = error).
	pub fn from_level(level: u8) -> Self {
		match level {
			0 => Self::Verbose,
			1 => Self::Info,
			2 => Self::Warning,
			_ => Self::Error,
		}
	}
}

/// Why a session stopped being attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
	/// The session was detached from its target.
	Detached,
	/// The session's target was destroyed.
	Destroyed,
	/// The embedder detached the whole debugger.
	WebContentsDetached,
	/// The embedder's hosting contents were destroyed.
	WebContentsDestroyed,
}

impl DetachReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Detached => "detached",
			Self::Destroyed => "destroyed",
			Self::WebContentsDetached => "web-contents detached",
			Self::WebContentsDestroyed => "web-contents destroyed",
		}
	}
}

impl fmt::Display for DetachReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn console_levels_map_from_embedder_numbers() {
		assert_eq!(ConsoleLevel::from_level(0), ConsoleLevel::Verbose);
		assert_eq!(ConsoleLevel::from_level(2), ConsoleLevel::Warning);
		assert_eq!(ConsoleLevel::from_level(9), ConsoleLevel::Error);
	}

	#[test]
	fn detach_reason_tags() {
		assert_eq!(DetachReason::WebContentsDestroyed.to_string(), "web-contents destroyed");
		assert_eq!(DetachReason::Detached.as_str(), "detached");
	}
}
