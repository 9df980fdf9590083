//! Session and evaluation options.

use std::time::Duration;

use bridge_runtime::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::codec::Codec;

/// CDP protocol version requested when attaching.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.3";

/// Default wait for a preloaded codec, in milliseconds.
pub const DEFAULT_CODEC_TIMEOUT_MS: u64 = 5000;

/// Configuration of a [`Session`](crate::Session).
///
/// Child sessions created by auto-attach inherit their parent's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
	/// Protocol version passed to the transport's `attach`
	#[serde(skip_serializing_if = "Option::is_none")]
	pub protocol_version: Option<String>,

	/// Preload the codec into every new document on attach
	pub preload_codec: bool,

	/// Maximum wait for a preloaded codec in ms
	pub codec_timeout: u64,

	/// Maximum time for any single command in ms
	#[serde(skip_serializing_if = "Option::is_none")]
	pub command_timeout: Option<u64>,

	/// Codec with any custom type handlers
	#[serde(skip)]
	pub codec: Codec,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			protocol_version: Some(DEFAULT_PROTOCOL_VERSION.to_string()),
			preload_codec: false,
			codec_timeout: DEFAULT_CODEC_TIMEOUT_MS,
			command_timeout: None,
			codec: Codec::default(),
		}
	}
}

impl SessionConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
		self.protocol_version = Some(version.into());
		self
	}

	pub fn preload_codec(mut self, preload: bool) -> Self {
		self.preload_codec = preload;
		self
	}

	/// Sets the preloaded-codec wait in milliseconds.
	pub fn codec_timeout(mut self, timeout_ms: u64) -> Self {
		self.codec_timeout = timeout_ms;
		self
	}

	/// Sets the per-command timeout in milliseconds.
	pub fn command_timeout(mut self, timeout_ms: u64) -> Self {
		self.command_timeout = Some(timeout_ms);
		self
	}

	pub fn codec(mut self, codec: Codec) -> Self {
		self.codec = codec;
		self
	}

	pub(crate) fn codec_wait(&self) -> Duration {
		Duration::from_millis(self.codec_timeout)
	}

	pub(crate) fn command_wait(&self) -> Option<Duration> {
		self.command_timeout.map(Duration::from_millis)
	}
}

/// `Runtime.evaluate` parameters the bridge controls itself.
const RESERVED_PARAMS: &[&str] = &[
	"expression",
	"contextId",
	"uniqueContextId",
	"returnByValue",
	"generatePreview",
	"awaitPromise",
	"throwOnSideEffect",
	"userGesture",
	"serializationOptions",
];

/// Options for a single `evaluate` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateOptions {
	/// Maximum evaluation time in ms
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout: Option<u64>,

	/// Treat the evaluation as initiated by a user gesture
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_gesture: Option<bool>,

	/// Additional `Runtime.evaluate` parameters passed through as-is
	#[serde(flatten)]
	pub extra: Map<String, Json>,
}

impl EvaluateOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the timeout in milliseconds.
	pub fn timeout(mut self, timeout_ms: u64) -> Self {
		self.timeout = Some(timeout_ms);
		self
	}

	pub fn user_gesture(mut self, user_gesture: bool) -> Self {
		self.user_gesture = Some(user_gesture);
		self
	}

	/// Adds a pass-through `Runtime.evaluate` parameter.
	pub fn param(mut self, name: impl Into<String>, value: impl Into<Json>) -> Self {
		self.extra.insert(name.into(), value.into());
		self
	}

	/// Fails when a pass-through parameter would replace one the bridge sets.
	pub(crate) fn check_params(&self) -> Result<()> {
		match self.extra.keys().find(|key| RESERVED_PARAMS.contains(&key.as_str())) {
			Some(key) => Err(Error::InvalidArgument(format!(
				"Runtime.evaluate parameter '{key}' is managed by the bridge and cannot be passed through"
			))),
			None => Ok(()),
		}
	}

	pub(crate) fn time_limit(&self) -> Option<Duration> {
		self.timeout.map(Duration::from_millis)
	}
}
