//! Host-side model of values that cross the evaluation boundary.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bridge_runtime::{Error, Result};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A JavaScript value as seen by the host.
///
/// Unlike [`serde_json::Value`] this keeps the runtime type of values JSON
/// cannot represent: `undefined`, binary buffers, dates, `Map`, `Set` and
/// errors survive a round trip with their type tag intact.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
	#[default]
	Undefined,
	Null,
	Bool(bool),
	Number(f64),
	/// Decimal digits of a `BigInt`
	BigInt(String),
	String(String),
	/// `Uint8Array` / `ArrayBuffer` contents
	Bytes(Vec<u8>),
	/// Milliseconds since the Unix epoch (`NaN` for an invalid date)
	Date(f64),
	Array(Vec<Value>),
	Object(IndexMap<String, Value>),
	/// `Map` entries in insertion order
	Map(Vec<(Value, Value)>),
	/// `Set` members in insertion order
	Set(Vec<Value>),
	Error(ErrorValue),
	/// Payload of a custom type handler that has no host-side counterpart.
	Extension { tag: String, value: Box<Value> },
}

/// Structured form of a JavaScript `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorValue {
	pub name: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

impl ErrorValue {
	pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			message: message.into(),
			stack: None,
		}
	}

	/// Converts into the host error surfaced to `evaluate` callers.
	pub fn into_error(self) -> Error {
		Error::Evaluation {
			name: self.name,
			message: self.message,
			stack: self.stack,
		}
	}
}

impl From<&Error> for ErrorValue {
	fn from(error: &Error) -> Self {
		match error {
			Error::Evaluation { name, message, stack } => Self {
				name: name.clone(),
				message: message.clone(),
				stack: stack.clone(),
			},
			Error::Timeout(message) => Self::new("TimeoutError", message.clone()),
			other => Self::new("Error", other.to_string()),
		}
	}
}

impl fmt::Display for ErrorValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.name, self.message)
	}
}

impl Value {
	pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
		Value::Bytes(bytes.into())
	}

	pub fn date_millis(millis: f64) -> Self {
		Value::Date(millis)
	}

	pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
		Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
	}

	pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
		Value::Map(entries.into_iter().collect())
	}

	pub fn set(members: impl IntoIterator<Item = Value>) -> Self {
		Value::Set(members.into_iter().collect())
	}

	pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
		Value::Error(ErrorValue::new(name, message))
	}

	/// Name of the JavaScript runtime type this value decodes to.
	pub fn type_name(&self) -> &'static str {
		match self {
			Value::Undefined => "undefined",
			Value::Null => "null",
			Value::Bool(_) => "boolean",
			Value::Number(_) => "number",
			Value::BigInt(_) => "bigint",
			Value::String(_) => "string",
			Value::Bytes(_) => "Uint8Array",
			Value::Date(_) => "Date",
			Value::Array(_) => "Array",
			Value::Object(_) => "Object",
			Value::Map(_) => "Map",
			Value::Set(_) => "Set",
			Value::Error(_) => "Error",
			Value::Extension { .. } => "extension",
		}
	}

	pub fn is_undefined(&self) -> bool {
		matches!(self, Value::Undefined)
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Value::Number(n) => Some(*n),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(b) => Some(*b),
			_ => None,
		}
	}

	/// Date value as a [`SystemTime`], if this is a valid date.
	pub fn as_system_time(&self) -> Option<SystemTime> {
		match self {
			Value::Date(ms) if ms.is_finite() => {
				let offset = Duration::try_from_secs_f64(ms.abs() / 1000.0).ok()?;
				if *ms >= 0.0 {
					UNIX_EPOCH.checked_add(offset)
				} else {
					UNIX_EPOCH.checked_sub(offset)
				}
			}
			_ => None,
		}
	}

	/// Builds a value from plain JSON. No type tags are interpreted.
	pub fn from_json(json: serde_json::Value) -> Self {
		match json {
			serde_json::Value::Null => Value::Null,
			serde_json::Value::Bool(b) => Value::Bool(b),
			serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
			serde_json::Value::String(s) => Value::String(s),
			serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
			serde_json::Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect()),
		}
	}

	/// Builds a value from any serializable Rust type.
	pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
		Ok(Value::from_json(serde_json::to_value(value)?))
	}

	/// Lossy projection onto plain JSON.
	///
	/// `undefined` and non-finite numbers become `null`, dates become epoch
	/// milliseconds, bytes become an array of numbers, sets become arrays,
	/// maps with string keys become objects (other maps become entry arrays)
	/// and errors become `{ name, message, stack }`.
	pub fn to_json(&self) -> serde_json::Value {
		use serde_json::Value as Json;
		match self {
			Value::Undefined | Value::Null => Json::Null,
			Value::Bool(b) => Json::Bool(*b),
			Value::Number(n) | Value::Date(n) => json_number(*n),
			Value::BigInt(digits) => Json::String(digits.clone()),
			Value::String(s) => Json::String(s.clone()),
			Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
			Value::Array(items) | Value::Set(items) => Json::Array(items.iter().map(Value::to_json).collect()),
			Value::Object(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
			Value::Map(entries) => {
				if entries.iter().all(|(k, _)| matches!(k, Value::String(_))) {
					Json::Object(
						entries
							.iter()
							.filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.to_json())))
							.collect(),
					)
				} else {
					Json::Array(
						entries
							.iter()
							.map(|(k, v)| Json::Array(vec![k.to_json(), v.to_json()]))
							.collect(),
					)
				}
			}
			Value::Error(error) => serde_json::to_value(error).unwrap_or(Json::Null),
			Value::Extension { value, .. } => value.to_json(),
		}
	}

	/// Deserializes the JSON projection of this value into `T`.
	///
	/// # Errors
	///
	/// Returns [`Error::Serialization`] when the value does not fit `T`.
	pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
		serde_json::from_value(self.to_json())
			.map_err(|e| Error::Serialization(format!("cannot convert {} into requested type: {e}", self.type_name())))
	}
}

/// Largest integer an `f64` holds exactly (`Number.MAX_SAFE_INTEGER`).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Whole numbers project as JSON integers so they deserialize into integer types.
fn json_number(n: f64) -> serde_json::Value {
	if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
		serde_json::Value::from(n as i64)
	} else {
		serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
	}
}

macro_rules! number_from {
	($($ty:ty),*) => {
		$(impl From<$ty> for Value {
			fn from(n: $ty) -> Self {
				Value::Number(n as f64)
			}
		})*
	};
}

number_from!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, usize, isize);

impl From<bool> for Value {
	fn from(b: bool) -> Self {
		Value::Bool(b)
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::String(s.to_string())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::String(s)
	}
}

impl From<Vec<Value>> for Value {
	fn from(items: Vec<Value>) -> Self {
		Value::Array(items)
	}
}

impl From<IndexMap<String, Value>> for Value {
	fn from(map: IndexMap<String, Value>) -> Self {
		Value::Object(map)
	}
}

impl From<ErrorValue> for Value {
	fn from(error: ErrorValue) -> Self {
		Value::Error(error)
	}
}

impl From<SystemTime> for Value {
	fn from(time: SystemTime) -> Self {
		let millis = match time.duration_since(UNIX_EPOCH) {
			Ok(after) => after.as_secs_f64() * 1000.0,
			Err(before) => -(before.duration().as_secs_f64() * 1000.0),
		};
		Value::Date(millis)
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(value: Option<T>) -> Self {
		value.map_or(Value::Null, Into::into)
	}
}
