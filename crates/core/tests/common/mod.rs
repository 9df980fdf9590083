//! Scripted in-memory transport for integration tests.
#![allow(dead_code)]

use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cdp_bridge::{CommandFuture, DebuggerTransport, Error, ProtocolEvent, Result, TransportEvent};
use parking_lot::Mutex;
use serde_json::{Value as Json, json};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Answer to one command.
pub enum Reply {
	Ok(Json),
	Err(Error),
	/// Never answers
	Hang,
}

pub type Responder = Box<dyn Fn(&str, &Json, Option<&str>) -> Reply + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Command {
	pub method: String,
	pub params: Json,
	pub session_id: Option<String>,
}

impl Command {
	pub fn expression(&self) -> &str {
		self.params["expression"].as_str().unwrap_or_default()
	}
}

pub struct FakeTransport {
	attached: AtomicBool,
	events: broadcast::Sender<TransportEvent>,
	commands: Mutex<Vec<Command>>,
	frame_runs: Mutex<Vec<(String, String)>>,
	frames: Mutex<Vec<String>>,
	responder: Mutex<Responder>,
}

impl FakeTransport {
	/// Transport answering every command with [`default_reply`].
	pub fn new() -> Arc<Self> {
		Self::with_responder(|method, _, _| default_reply(method))
	}

	/// Transport whose commands are answered by `responder`.
	pub fn with_responder<F>(responder: F) -> Arc<Self>
	where
		F: Fn(&str, &Json, Option<&str>) -> Reply + Send + Sync + 'static,
	{
		init_tracing();
		let (events, _) = broadcast::channel(256);
		Arc::new(Self {
			attached: AtomicBool::new(true),
			events,
			commands: Mutex::new(Vec::new()),
			frame_runs: Mutex::new(Vec::new()),
			frames: Mutex::new(Vec::new()),
			responder: Mutex::new(Box::new(responder)),
		})
	}

	pub fn set_responder<F>(&self, responder: F)
	where
		F: Fn(&str, &Json, Option<&str>) -> Reply + Send + Sync + 'static,
	{
		*self.responder.lock() = Box::new(responder);
	}

	pub fn set_attached(&self, attached: bool) {
		self.attached.store(attached, Ordering::SeqCst);
	}

	pub fn set_frames(&self, frames: &[&str]) {
		*self.frames.lock() = frames.iter().map(|f| f.to_string()).collect();
	}

	pub fn emit(&self, event: TransportEvent) {
		let _ = self.events.send(event);
	}

	pub fn emit_protocol(&self, method: &str, params: Json, session_id: Option<&str>) {
		self.emit(TransportEvent::Protocol(ProtocolEvent {
			method: method.to_string(),
			params,
			session_id: session_id.map(str::to_string),
		}));
	}

	pub fn context_created(&self, id: i64, frame_id: &str, session_id: Option<&str>) {
		self.emit_protocol(
			"Runtime.executionContextCreated",
			json!({
				"context": {
					"id": id,
					"origin": "https://app.test",
					"name": "",
					"auxData": { "isDefault": true, "type": "default", "frameId": frame_id }
				}
			}),
			session_id,
		);
	}

	pub fn commands(&self) -> Vec<Command> {
		self.commands.lock().clone()
	}

	pub fn commands_named(&self, method: &str) -> Vec<Command> {
		self.commands.lock().iter().filter(|c| c.method == method).cloned().collect()
	}

	pub fn frame_runs(&self) -> Vec<(String, String)> {
		self.frame_runs.lock().clone()
	}

	/// Polls until a command matching `predicate` was sent.
	pub async fn wait_for_command<F>(&self, predicate: F) -> Command
	where
		F: Fn(&Command) -> bool,
	{
		for _ in 0..200 {
			if let Some(command) = self.commands.lock().iter().find(|c| predicate(c)).cloned() {
				return command;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		panic!("expected command was never sent; sent: {:#?}", self.commands());
	}
}

impl DebuggerTransport for FakeTransport {
	fn attach(&self, _protocol_version: Option<&str>) -> Result<()> {
		self.attached.store(true, Ordering::SeqCst);
		Ok(())
	}

	fn detach(&self) -> Result<()> {
		self.attached.store(false, Ordering::SeqCst);
		Ok(())
	}

	fn is_attached(&self) -> bool {
		self.attached.load(Ordering::SeqCst)
	}

	fn send_command<'a>(&'a self, method: &'a str, params: Json, session_id: Option<&'a str>) -> CommandFuture<'a> {
		let reply = {
			let responder = self.responder.lock();
			(*responder)(method, &params, session_id)
		};
		self.commands.lock().push(Command {
			method: method.to_string(),
			params,
			session_id: session_id.map(str::to_string),
		});
		Box::pin(async move {
			match reply {
				Reply::Ok(value) => Ok(value),
				Reply::Err(e) => Err(e),
				Reply::Hang => pending().await,
			}
		})
	}

	fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
		self.events.subscribe()
	}

	fn execute_in_frame<'a>(&'a self, frame_id: &'a str, source: &'a str, _user_gesture: bool) -> CommandFuture<'a> {
		self.frame_runs.lock().push((frame_id.to_string(), source.to_string()));
		Box::pin(async { Ok::<_, Error>(Json::Null) })
	}

	fn frame_ids(&self) -> Vec<String> {
		self.frames.lock().clone()
	}
}

/// Routes library logs to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Successful `Runtime.evaluate` answer carrying `encoded` as the script result.
pub fn evaluated(encoded: &str) -> Reply {
	Reply::Ok(json!({ "result": { "type": "string", "value": encoded } }))
}

/// Replies most commands need: an identifier for new-document scripts and an
/// `undefined` result for evaluations.
pub fn default_reply(method: &str) -> Reply {
	match method {
		"Runtime.evaluate" => evaluated(r#"{"$t":"undef"}"#),
		"Page.addScriptToEvaluateOnNewDocument" => Reply::Ok(json!({ "identifier": "script-1" })),
		_ => Reply::Ok(json!({})),
	}
}

/// Lets spawned dispatch work run.
pub async fn settle() {
	tokio::time::sleep(Duration::from_millis(20)).await;
}
