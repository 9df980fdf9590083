//! Options accepted by [`Session::expose_function`](crate::Session::expose_function).
//!
//! Every option deserializes from the camelCase JSON surface, where the
//! `withReturnValue` and `retry` toggles accept either `true`/`false` or an
//! object overriding the defaults:
//!
//! ```
//! use cdp_bridge::{ExposeMode, ExposeOptions};
//!
//! let options: ExposeOptions = serde_json::from_str(
//! 	r#"{ "mode": "CDP", "withReturnValue": true, "retry": { "count": 2 } }"#,
//! ).unwrap();
//! assert_eq!(options.mode, ExposeMode::Cdp);
//! assert_eq!(options.with_return_value.unwrap().timeout, 10_000);
//! assert_eq!(options.retry.unwrap().count, 2);
//! ```

use serde::{Deserialize, Deserializer, Serialize};

/// How the in-realm stub reports a call to the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposeMode {
	/// A tagged `console.debug` line picked up from console events.
	#[default]
	Electron,
	/// A CDP binding (`Runtime.addBinding`); enables execution-context tracking.
	#[serde(rename = "CDP")]
	Cdp,
}

/// Stub-side wait for the host's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReturnValueOptions {
	/// Give up after this many ms, rejecting with a `TimeoutError`
	pub timeout: u64,
	/// Poll interval in ms
	pub delay: u64,
}

impl Default for ReturnValueOptions {
	fn default() -> Self {
		Self {
			timeout: 10_000,
			delay: 10,
		}
	}
}

/// Stub-side retransmission until the host acknowledges a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
	/// Retransmissions after the first send
	pub count: u32,
	/// Interval between transmissions in ms
	pub delay: u64,
}

impl Default for RetryOptions {
	fn default() -> Self {
		Self { count: 3, delay: 500 }
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Toggle<T> {
	Flag(bool),
	Options(T),
}

fn toggle<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
	D: Deserializer<'de>,
	T: Deserialize<'de> + Default,
{
	Ok(match Option::<Toggle<T>>::deserialize(deserializer)? {
		None | Some(Toggle::Flag(false)) => None,
		Some(Toggle::Flag(true)) => Some(T::default()),
		Some(Toggle::Options(options)) => Some(options),
	})
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExposeOptions {
	pub mode: ExposeMode,
	/// Make the stub return a promise for the callback's result
	#[serde(deserialize_with = "toggle", skip_serializing_if = "Option::is_none")]
	pub with_return_value: Option<ReturnValueOptions>,
	/// Retransmit unacknowledged calls
	#[serde(deserialize_with = "toggle", skip_serializing_if = "Option::is_none")]
	pub retry: Option<RetryOptions>,
}

impl ExposeOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn mode(mut self, mode: ExposeMode) -> Self {
		self.mode = mode;
		self
	}

	/// Enables return values with the default timeout and poll interval.
	pub fn with_return_value(self) -> Self {
		self.return_value(ReturnValueOptions::default())
	}

	pub fn return_value(mut self, options: ReturnValueOptions) -> Self {
		self.with_return_value = Some(options);
		self
	}

	pub fn retry(mut self, options: RetryOptions) -> Self {
		self.retry = Some(options);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_fire_and_forget_over_console() {
		let options: ExposeOptions = serde_json::from_str("{}").unwrap();
		assert_eq!(options, ExposeOptions::default());
		assert_eq!(options.mode, ExposeMode::Electron);
		assert!(options.with_return_value.is_none());
		assert!(options.retry.is_none());
	}

	#[test]
	fn toggles_accept_flags_and_partial_objects() {
		let options: ExposeOptions =
			serde_json::from_str(r#"{"withReturnValue": {"delay": 25}, "retry": false}"#).unwrap();
		assert_eq!(
			options.with_return_value,
			Some(ReturnValueOptions {
				timeout: 10_000,
				delay: 25
			})
		);
		assert!(options.retry.is_none());

		let options: ExposeOptions = serde_json::from_str(r#"{"retry": true}"#).unwrap();
		assert_eq!(options.retry, Some(RetryOptions { count: 3, delay: 500 }));
	}

	#[test]
	fn mode_names_match_the_json_surface() {
		assert_eq!(serde_json::to_value(ExposeMode::Cdp).unwrap(), "CDP");
		assert_eq!(serde_json::to_value(ExposeMode::Electron).unwrap(), "Electron");
		assert!(serde_json::from_str::<ExposeMode>(r#""cdp""#).is_err());
	}

	#[test]
	fn builder_matches_json() {
		let built = ExposeOptions::new()
			.mode(ExposeMode::Cdp)
			.with_return_value()
			.retry(RetryOptions { count: 2, delay: 5 });
		let parsed: ExposeOptions =
			serde_json::from_str(r#"{"mode":"CDP","withReturnValue":true,"retry":{"count":2,"delay":5}}"#).unwrap();
		assert_eq!(built, parsed);
	}
}
