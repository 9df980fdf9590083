//! Scripts installed into realms for exposed functions.

use bridge_runtime::Result;
use serde::Serialize;

use super::options::{ExposeMode, ExposeOptions, ReturnValueOptions, RetryOptions};
use crate::codec::Codec;
use crate::function::JsFunction;
use crate::script;

/// CDP binding shared by every function exposed in [`ExposeMode::Cdp`].
pub const BINDING: &str = "__cdpBridgeCall";

/// Marks console lines carrying a call envelope.
pub const CONSOLE_PREFIX: &str = "__cdp_bridge__:";

const STUB_JS: &str = include_str!("../js/stub.js");

/// Host-to-realm answer, written into the realm's pending-call table.
pub(crate) const WRITE_BACK_JS: &str = r#"(sequence, name, outcome, value) => {
	const calls = globalThis.__cdpBridge && globalThis.__cdpBridge.calls;
	const entry = calls && calls.returnValues.get(sequence);
	if (!entry) return false;
	if (outcome === "error") {
		calls.errors.set(sequence, { name, value });
		return true;
	}
	entry.init = true;
	if (outcome === "value") {
		entry.done = true;
		entry.value = value;
	}
	return true;
}"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StubConfig<'a> {
	name: &'a str,
	mode: ExposeMode,
	binding: &'static str,
	prefix: &'static str,
	session_id: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	retry: Option<RetryOptions>,
	#[serde(skip_serializing_if = "Option::is_none")]
	return_value: Option<ReturnValueOptions>,
}

/// Script that defines `globalThis[name]` in the realm it runs in.
pub(crate) fn install_source(name: &str, options: &ExposeOptions, session_id: Option<&str>, codec: &Codec) -> Result<String> {
	let config = StubConfig {
		name,
		mode: options.mode,
		binding: BINDING,
		prefix: CONSOLE_PREFIX,
		session_id,
		retry: options.retry,
		return_value: options.with_return_value,
	};
	Ok(format!(
		"({})({}, () => {});",
		STUB_JS.trim_end(),
		serde_json::to_string(&config)?,
		script::install_codec(codec)
	))
}

/// Prefixes `source` with the id of the frame hosting the realm, so console
/// envelopes sent from it name their frame.
pub(crate) fn tag_frame(source: &str, frame_id: Option<&str>) -> String {
	match frame_id {
		Some(frame_id) => {
			let quoted = serde_json::Value::String(frame_id.to_string());
			format!("(globalThis.{ns} ??= {{}}).frameId = {quoted};\n{source}", ns = script::NAMESPACE)
		}
		None => source.to_string(),
	}
}

/// Script that removes `globalThis[name]`. With `release_calls` the realm's
/// pending-call table goes too; the codec stays for evaluations.
pub(crate) fn cleanup_source(name: &str, release_calls: bool) -> String {
	let quoted = serde_json::Value::String(name.to_string());
	if release_calls {
		format!(
			"delete globalThis[{quoted}];\nif (globalThis.{ns}) delete globalThis.{ns}.calls;",
			ns = script::NAMESPACE
		)
	} else {
		format!("delete globalThis[{quoted}];")
	}
}

pub(crate) fn write_back() -> JsFunction {
	JsFunction::unchecked(WRITE_BACK_JS)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn write_back_is_a_self_contained_function() {
		let checked = JsFunction::new(WRITE_BACK_JS).unwrap();
		assert_eq!(checked.source(), write_back().source());
	}

	#[test]
	fn install_source_embeds_config_and_codec() {
		let options = ExposeOptions::new().mode(ExposeMode::Cdp).with_return_value();
		let source = install_source("ping", &options, Some("S1"), &Codec::new()).unwrap();

		assert!(source.starts_with("((config, loadCodec) => {"));
		assert!(source.contains(r#""name":"ping""#));
		assert!(source.contains(r#""mode":"CDP""#));
		assert!(source.contains(r#""binding":"__cdpBridgeCall""#));
		assert!(source.contains(r#""sessionId":"S1""#));
		assert!(source.contains(r#""returnValue":{"timeout":10000,"delay":10}"#));
		assert!(!source.contains(r#""retry""#));
		assert!(source.contains("() => ((globalThis.__cdpBridge ??= {}).codec ??="));
	}

	#[test]
	fn root_session_stub_has_null_session_id() {
		let source = install_source("ping", &ExposeOptions::default(), None, &Codec::new()).unwrap();
		assert!(source.contains(r#""sessionId":null"#));
		assert!(source.contains(r#""mode":"Electron""#));
		assert!(source.contains(r#""prefix":"__cdp_bridge__:""#));
	}

	#[test]
	fn cleanup_quotes_the_name() {
		assert_eq!(cleanup_source("ping", false), r#"delete globalThis["ping"];"#);
		assert_eq!(
			cleanup_source("ping", true),
			"delete globalThis[\"ping\"];\nif (globalThis.__cdpBridge) delete globalThis.__cdpBridge.calls;"
		);
	}

	#[test]
	fn frame_tag_precedes_install() {
		assert_eq!(tag_frame("stub();", None), "stub();");
		assert_eq!(
			tag_frame("stub();", Some("F1")),
			"(globalThis.__cdpBridge ??= {}).frameId = \"F1\";\nstub();"
		);
	}
}
