//! Typed value codec shared by the host and every realm.
//!
//! Values travel as a JSON string. Anything JSON already represents is
//! emitted as-is; every other type becomes an object tagged with `"$t"`:
//!
//! | tag      | payload                                       |
//! |----------|-----------------------------------------------|
//! | `undef`  | none                                          |
//! | `num`    | `v`: `"NaN"`, `"Infinity"`, `"-Infinity"`, `"-0"` |
//! | `bigint` | `v`: decimal digits                           |
//! | `bytes`  | `v`: standard base64                          |
//! | `date`   | `v`: epoch milliseconds, `null` when invalid  |
//! | `map`    | `v`: `[[key, value], ...]`                    |
//! | `set`    | `v`: `[member, ...]`                          |
//! | `error`  | `name`, `message`, optional `stack`           |
//! | `obj`    | `v`: a plain object that itself has a `"$t"` key |
//! | `ext`    | `n`: handler tag, `v`: handler payload        |
//!
//! The JavaScript half lives in `js/codec.js` and is installed into realms
//! by the generated evaluation scripts.

mod value;

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bridge_runtime::{Error, Result};
use serde_json::{Map, Number, Value as Json};

pub use value::{ErrorValue, Value};

/// Key that marks a tagged wire object.
pub const TAG: &str = "$t";

/// JavaScript source of the realm-side codec. Evaluates to `{ encode, decode, register }`.
pub const CODEC_JS: &str = include_str!("../js/codec.js");

/// Pluggable support for a custom type.
///
/// A handler claims host values through [`applies`](TypeHandler::applies)
/// and maps them to a payload the built-in codec can carry. Its
/// [`remote_source`](TypeHandler::remote_source), when present, is a
/// JavaScript object expression `{ tag, test, serialize, deserialize }`
/// registered with the realm-side codec so both ends agree on the tag.
///
/// Handlers take priority over built-in types, in registration order.
pub trait TypeHandler: Send + Sync {
	fn tag(&self) -> &str;

	fn applies(&self, value: &Value) -> bool;

	fn serialize(&self, value: &Value) -> Result<Value>;

	fn deserialize(&self, payload: Value) -> Result<Value>;

	fn remote_source(&self) -> Option<String> {
		None
	}
}

/// Encoder/decoder for the tagged wire format.
#[derive(Clone, Default)]
pub struct Codec {
	handlers: Vec<Arc<dyn TypeHandler>>,
}

impl fmt::Debug for Codec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Codec")
			.field("handlers", &self.handlers.iter().map(|h| h.tag().to_string()).collect::<Vec<_>>())
			.finish()
	}
}

impl Codec {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a custom type handler.
	pub fn with_handler(mut self, handler: impl TypeHandler + 'static) -> Self {
		self.handlers.push(Arc::new(handler));
		self
	}

	pub fn register(&mut self, handler: Arc<dyn TypeHandler>) {
		self.handlers.push(handler);
	}

	/// Encodes a value into its wire string.
	pub fn encode(&self, value: &Value) -> Result<String> {
		Ok(serde_json::to_string(&self.encode_json(value)?)?)
	}

	/// Encodes a value into the wire JSON tree.
	pub fn encode_json(&self, value: &Value) -> Result<Json> {
		self.to_wire(value, true)
	}

	/// Decodes a wire string.
	///
	/// # Errors
	///
	/// Returns [`Error::Serialization`] for malformed JSON, unknown type tags
	/// and tagged objects with a payload of the wrong shape.
	pub fn decode(&self, text: &str) -> Result<Value> {
		let json: Json =
			serde_json::from_str(text).map_err(|e| Error::Serialization(format!("malformed codec payload: {e}")))?;
		self.decode_json(json)
	}

	/// Decodes an already parsed wire JSON tree.
	pub fn decode_json(&self, json: Json) -> Result<Value> {
		match json {
			Json::Null => Ok(Value::Null),
			Json::Bool(b) => Ok(Value::Bool(b)),
			Json::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN))),
			Json::String(s) => Ok(Value::String(s)),
			Json::Array(items) => Ok(Value::Array(self.decode_all(items)?)),
			Json::Object(map) if map.contains_key(TAG) => self.decode_tagged(map),
			Json::Object(map) => self.decode_entries(map),
		}
	}

	/// JavaScript expression evaluating to a codec with every handler's
	/// remote half registered.
	pub fn remote_source(&self) -> String {
		let registrations: Vec<String> = self
			.handlers
			.iter()
			.filter_map(|h| h.remote_source())
			.map(|source| format!("codec.register({source});"))
			.collect();
		if registrations.is_empty() {
			return format!("({})", CODEC_JS.trim_end());
		}
		format!(
			"((codec) => {{ {} return codec; }})({})",
			registrations.join(" "),
			CODEC_JS.trim_end()
		)
	}

	fn to_wire(&self, value: &Value, use_handlers: bool) -> Result<Json> {
		if use_handlers {
			if let Some(handler) = self.handlers.iter().find(|h| h.applies(value)) {
				let payload = handler.serialize(value)?;
				return Ok(tagged("ext", [
					("n", Json::String(handler.tag().to_string())),
					("v", self.to_wire(&payload, false)?),
				]));
			}
		}

		Ok(match value {
			Value::Undefined => tagged("undef", []),
			Value::Null => Json::Null,
			Value::Bool(b) => Json::Bool(*b),
			Value::Number(n) => encode_number(*n),
			Value::BigInt(digits) => tagged("bigint", [("v", Json::String(digits.clone()))]),
			Value::String(s) => Json::String(s.clone()),
			Value::Bytes(bytes) => tagged("bytes", [("v", Json::String(BASE64.encode(bytes)))]),
			Value::Date(ms) => {
				let v = if ms.is_finite() {
					Number::from_f64(*ms).map_or(Json::Null, Json::Number)
				} else {
					Json::Null
				};
				tagged("date", [("v", v)])
			}
			Value::Array(items) => Json::Array(self.wire_all(items)?),
			Value::Object(map) => {
				let mut out = Map::with_capacity(map.len());
				for (key, item) in map {
					out.insert(key.clone(), self.to_wire(item, true)?);
				}
				if out.contains_key(TAG) {
					tagged("obj", [("v", Json::Object(out))])
				} else {
					Json::Object(out)
				}
			}
			Value::Map(entries) => {
				let mut pairs = Vec::with_capacity(entries.len());
				for (key, item) in entries {
					pairs.push(Json::Array(vec![self.to_wire(key, true)?, self.to_wire(item, true)?]));
				}
				tagged("map", [("v", Json::Array(pairs))])
			}
			Value::Set(members) => tagged("set", [("v", Json::Array(self.wire_all(members)?))]),
			Value::Error(error) => {
				let mut fields = vec![
					("name", Json::String(error.name.clone())),
					("message", Json::String(error.message.clone())),
				];
				if let Some(stack) = &error.stack {
					fields.push(("stack", Json::String(stack.clone())));
				}
				tagged("error", fields)
			}
			Value::Extension { tag, value } => tagged("ext", [
				("n", Json::String(tag.clone())),
				("v", self.to_wire(value, false)?),
			]),
		})
	}

	fn wire_all(&self, items: &[Value]) -> Result<Vec<Json>> {
		items.iter().map(|item| self.to_wire(item, true)).collect()
	}

	fn decode_all(&self, items: Vec<Json>) -> Result<Vec<Value>> {
		items.into_iter().map(|item| self.decode_json(item)).collect()
	}

	fn decode_entries(&self, map: Map<String, Json>) -> Result<Value> {
		let mut out = indexmap::IndexMap::with_capacity(map.len());
		for (key, item) in map {
			out.insert(key, self.decode_json(item)?);
		}
		Ok(Value::Object(out))
	}

	fn decode_tagged(&self, mut map: Map<String, Json>) -> Result<Value> {
		let tag = match map.remove(TAG) {
			Some(Json::String(tag)) => tag,
			other => return Err(malformed("type tag", other.as_ref())),
		};
		let payload = map.remove("v");

		match tag.as_str() {
			"undef" => Ok(Value::Undefined),
			"num" => match payload.as_ref().and_then(Json::as_str) {
				Some("NaN") => Ok(Value::Number(f64::NAN)),
				Some("Infinity") => Ok(Value::Number(f64::INFINITY)),
				Some("-Infinity") => Ok(Value::Number(f64::NEG_INFINITY)),
				Some("-0") => Ok(Value::Number(-0.0)),
				_ => Err(malformed("num", payload.as_ref())),
			},
			"bigint" => match payload {
				Some(Json::String(digits)) if is_bigint_literal(&digits) => Ok(Value::BigInt(digits)),
				other => Err(malformed("bigint", other.as_ref())),
			},
			"bytes" => match payload {
				Some(Json::String(text)) => BASE64
					.decode(text.as_bytes())
					.map(Value::Bytes)
					.map_err(|e| Error::Serialization(format!("invalid base64 in bytes payload: {e}"))),
				other => Err(malformed("bytes", other.as_ref())),
			},
			"date" => match payload {
				Some(Json::Null) => Ok(Value::Date(f64::NAN)),
				Some(Json::Number(ms)) => Ok(Value::Date(ms.as_f64().unwrap_or(f64::NAN))),
				other => Err(malformed("date", other.as_ref())),
			},
			"map" => {
				let Some(Json::Array(pairs)) = payload else {
					return Err(malformed("map", payload.as_ref()));
				};
				let mut entries = Vec::with_capacity(pairs.len());
				for pair in pairs {
					match pair {
						Json::Array(mut kv) if kv.len() == 2 => {
							let item = kv.pop().unwrap_or(Json::Null);
							let key = kv.pop().unwrap_or(Json::Null);
							entries.push((self.decode_json(key)?, self.decode_json(item)?));
						}
						other => return Err(malformed("map entry", Some(&other))),
					}
				}
				Ok(Value::Map(entries))
			}
			"set" => match payload {
				Some(Json::Array(members)) => Ok(Value::Set(self.decode_all(members)?)),
				other => Err(malformed("set", other.as_ref())),
			},
			"error" => {
				let name = string_field(&mut map, "name").unwrap_or_else(|| "Error".to_string());
				let message = string_field(&mut map, "message").unwrap_or_default();
				let stack = string_field(&mut map, "stack");
				Ok(Value::Error(ErrorValue { name, message, stack }))
			}
			"obj" => match payload {
				Some(Json::Object(inner)) => self.decode_entries(inner),
				other => Err(malformed("obj", other.as_ref())),
			},
			"ext" => {
				let ext_tag = match map.remove("n") {
					Some(Json::String(n)) => n,
					other => return Err(malformed("ext name", other.as_ref())),
				};
				let inner = self.decode_json(payload.unwrap_or(Json::Null))?;
				match self.handlers.iter().find(|h| h.tag() == ext_tag) {
					Some(handler) => handler.deserialize(inner),
					None => Ok(Value::Extension {
						tag: ext_tag,
						value: Box::new(inner),
					}),
				}
			}
			unknown => Err(Error::Serialization(format!("unknown type tag '{unknown}'"))),
		}
	}
}

fn tagged<'a>(tag: &str, fields: impl IntoIterator<Item = (&'a str, Json)>) -> Json {
	let mut map = Map::new();
	map.insert(TAG.to_string(), Json::String(tag.to_string()));
	for (key, value) in fields {
		map.insert(key.to_string(), value);
	}
	Json::Object(map)
}

fn encode_number(n: f64) -> Json {
	if n.is_nan() {
		tagged("num", [("v", Json::from("NaN"))])
	} else if n == f64::INFINITY {
		tagged("num", [("v", Json::from("Infinity"))])
	} else if n == f64::NEG_INFINITY {
		tagged("num", [("v", Json::from("-Infinity"))])
	} else if n == 0.0 && n.is_sign_negative() {
		tagged("num", [("v", Json::from("-0"))])
	} else {
		Number::from_f64(n).map_or(Json::Null, Json::Number)
	}
}

fn is_bigint_literal(digits: &str) -> bool {
	let unsigned = digits.strip_prefix('-').unwrap_or(digits);
	!unsigned.is_empty() && unsigned.bytes().all(|b| b.is_ascii_digit())
}

fn string_field(map: &mut Map<String, Json>, key: &str) -> Option<String> {
	match map.remove(key) {
		Some(Json::String(s)) => Some(s),
		_ => None,
	}
}

fn malformed(what: &str, payload: Option<&Json>) -> Error {
	Error::Serialization(format!(
		"malformed {what} payload: {}",
		payload.map_or_else(|| "missing".to_string(), Json::to_string)
	))
}
