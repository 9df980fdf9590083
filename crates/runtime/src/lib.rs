//! Bridge Runtime - debugger transport, CDP connection and error model
//!
//! This crate provides the low-level plumbing shared by every session:
//!
//! - **Transport seam**: [`DebuggerTransport`], the boundary to whatever owns
//!   the raw CDP pipe (an embedder's debugger object or a WebSocket)
//! - **Connection**: command id allocation and response correlation
//! - **WebSocket transport**: flat-mode CDP over `tokio-tungstenite`
//! - **Errors**: the crate-wide [`Error`] and [`Result`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  cdp-bridge  │  Sessions, execution contexts, exposed functions
//! └──────┬───────┘
//!        │ Arc<dyn DebuggerTransport>
//! ┌──────▼───────┐
//! │bridge-runtime│  This crate
//! │  ┌────────┐  │
//! │  │ Conn   │  │  id correlation, event fan-out
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ WS     │  │  tokio-tungstenite socket
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod transport;
pub mod websocket;

pub use connection::Connection;
pub use error::{Error, Result};
pub use transport::{
	CommandFuture, ConsoleLevel, ConsoleMessage, DebuggerTransport, DetachReason, ProtocolEvent, TransportEvent,
};
pub use websocket::WebSocketTransport;
