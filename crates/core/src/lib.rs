//! cdp-bridge: run host-defined functions inside CDP execution contexts, and
//! call back into the host from them.
//!
//! A [`Session`] wraps one CDP debugging session over a shared
//! [`DebuggerTransport`]. Functions are shipped to a realm as source text
//! together with codec-encoded arguments; the result travels back through
//! the same type-preserving [`Codec`], so dates, binary data, maps, sets,
//! errors, `undefined` and special numbers survive the round trip.
//!
//! # Evaluating
//!
//! ```ignore
//! use cdp_bridge::{JsFunction, Session, SessionConfig, Value, WebSocketTransport};
//!
//! #[tokio::main]
//! async fn main() -> cdp_bridge::Result<()> {
//! 	let transport = WebSocketTransport::connect("ws://127.0.0.1:9222/devtools/page/ABC").await?;
//! 	let session = Session::attach(transport, SessionConfig::default()).await?;
//!
//! 	let add = JsFunction::new("(a, b) => a + b")?;
//! 	let sum = session.evaluate(&add, vec![Value::from(40), Value::from(2)]).await?;
//! 	assert_eq!(sum, Value::from(42));
//! 	Ok(())
//! }
//! ```
//!
//! Functions must be self-contained: a name the function does not declare
//! resolves against the remote realm's globals, never against host-side
//! variables. [`JsFunction::new`] rejects sources referencing such free
//! variables; pass the values as arguments instead.
//!
//! # Exposing host functions
//!
//! ```ignore
//! use cdp_bridge::{ExposeOptions, Value};
//!
//! session
//! 	.expose_function("ping", |_call| async { Ok(Value::from("pong")) }, ExposeOptions::new().with_return_value())
//! 	.await?;
//! // In any realm of the page: `await ping()` === "pong"
//! ```
//!
//! # Events
//!
//! Every session re-emits the protocol events addressed to it plus its own
//! lifecycle events as [`SessionEvent`]s, consumable as a stream
//! ([`Session::subscribe`]), through a callback ([`Session::on_event`]) or as
//! a one-shot wait ([`Session::wait_for_event`]).

pub mod codec;
pub mod context;
pub mod events;
pub mod expose;
pub mod function;
pub mod script;
pub mod session;

pub use bridge_protocol as protocol;
pub use bridge_runtime::{
	CommandFuture, ConsoleLevel, ConsoleMessage, DebuggerTransport, DetachReason, Error, ProtocolEvent, Result, TransportEvent,
	WebSocketTransport,
};
pub use codec::{Codec, ErrorValue, TypeHandler, Value};
pub use context::ExecutionContext;
pub use events::{EventStream, EventSubscription, EventWaiter, SessionEvent};
pub use expose::{ExposeMode, ExposeOptions, ExposedCall, ExposedFn, ExposedFuture, ReturnValueOptions, RetryOptions};
pub use function::JsFunction;
pub use session::{EvaluateOptions, Session, SessionConfig};
