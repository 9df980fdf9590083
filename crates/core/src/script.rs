//! Builds the self-contained expression evaluated in a realm.
//!
//! The generated text is an async IIFE that obtains a codec, decodes the
//! argument list, calls the embedded function and resolves with the
//! codec-encoded result. A thrown value is re-thrown codec-encoded so the
//! host can rebuild a structured error.

use std::time::Duration;

use bridge_runtime::Result;

use crate::codec::{Codec, Value};
use crate::function::JsFunction;

/// Realm global holding the bridge's per-realm state (`codec`, `calls`).
pub const NAMESPACE: &str = "__cdpBridge";

/// Error name thrown by a realm that never sees a codec.
pub const CODEC_UNAVAILABLE: &str = "CodecUnavailableError";

/// Interval between looks for a preloaded codec.
const CODEC_POLL_MS: u64 = 10;

#[derive(Debug, Clone)]
pub struct ScriptOptions {
	/// How long to wait for a preloaded codec
	pub timeout: Duration,
	/// Wait for a preloaded codec instead of installing one inline
	pub preload: bool,
	/// Realm identifier used in the codec-unavailable message
	pub context_label: String,
}

impl Default for ScriptOptions {
	fn default() -> Self {
		Self {
			timeout: Duration::from_millis(5000),
			preload: false,
			context_label: "default".to_string(),
		}
	}
}

/// Produces the expression that calls `function` with `args` in a realm.
///
/// # Errors
///
/// Fails only if an argument cannot be encoded by `codec`.
pub fn build(function: &JsFunction, args: &[Value], codec: &Codec, options: &ScriptOptions) -> Result<String> {
	let encoded_args = codec.encode(&Value::Array(args.to_vec()))?;
	let args_literal = serde_json::to_string(&encoded_args)?;
	let acquire = if options.preload {
		wait_for_codec(function, options)?
	} else {
		install_codec(codec)
	};

	Ok(format!(
		"(async () => {{\n\
		const codec = {acquire};\n\
		const fn = ({source});\n\
		const args = codec.decode({args_literal});\n\
		try {{\n\
		return codec.encode(await fn(...args));\n\
		}} catch (error) {{\n\
		throw codec.encode(error);\n\
		}}\n\
		}})()",
		source = function.source(),
	))
}

/// Expression returning this realm's codec, installing it on first use.
pub fn install_codec(codec: &Codec) -> String {
	format!(
		"((globalThis.{NAMESPACE} ??= {{}}).codec ??= {})",
		codec.remote_source()
	)
}

/// Expression polling for a preloaded codec in this realm, then the top
/// window, the parent window and the top window's frames.
fn wait_for_codec(function: &JsFunction, options: &ScriptOptions) -> Result<String> {
	let message = serde_json::to_string(&format!(
		"codec not available in execution context {} after {}ms while evaluating function '{}'",
		options.context_label,
		options.timeout.as_millis(),
		function.name()
	))?;
	let timeout = options.timeout.as_millis();

	Ok(format!(
		"await (async () => {{\n\
		const lookup = () => {{\n\
		const scopes = [globalThis];\n\
		try {{ scopes.push(globalThis.top); }} catch (_) {{}}\n\
		try {{ scopes.push(globalThis.parent); }} catch (_) {{}}\n\
		try {{\n\
		const frames = globalThis.top && globalThis.top.frames;\n\
		for (let i = 0; frames && i < frames.length; i++) scopes.push(frames[i]);\n\
		}} catch (_) {{}}\n\
		for (const scope of scopes) {{\n\
		try {{\n\
		const found = scope && scope.{NAMESPACE} && scope.{NAMESPACE}.codec;\n\
		if (found) return found;\n\
		}} catch (_) {{}}\n\
		}}\n\
		return null;\n\
		}};\n\
		const deadline = Date.now() + {timeout};\n\
		for (;;) {{\n\
		const found = lookup();\n\
		if (found) return found;\n\
		if (Date.now() >= deadline) {{\n\
		const error = new Error({message});\n\
		error.name = \"{CODEC_UNAVAILABLE}\";\n\
		throw error;\n\
		}}\n\
		await new Promise((resolve) => setTimeout(resolve, {CODEC_POLL_MS}));\n\
		}}\n\
		}})()"
	))
}

/// Script that installs the codec into a realm for later evaluations.
pub fn preload_source(codec: &Codec) -> String {
	format!("(() => {{ {}; }})();", install_codec(codec))
}
