//! `Target` domain payloads.
//!
//! See <https://chromedevtools.github.io/devtools-protocol/tot/Target/>

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub target_id: String,
	/// `page`, `iframe`, `worker`, `service_worker`, `shared_worker`, ...
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub attached: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub opener_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub browser_context_id: Option<String>,
}

impl TargetInfo {
	/// Shared workers are announced through `targetCreated` only and must be
	/// attached explicitly.
	pub fn is_shared_worker(&self) -> bool {
		self.kind == "shared_worker"
	}
}

/// Parameters of `Target.setAutoAttach`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAutoAttachParams {
	pub auto_attach: bool,
	pub wait_for_debugger_on_start: bool,
	pub flatten: bool,
}

/// Parameters of `Target.attachToTarget`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTargetParams {
	pub target_id: String,
	pub flatten: bool,
}

/// Result of `Target.attachToTarget`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTargetReturn {
	pub session_id: String,
}

/// `Target.attachedToTarget`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedToTarget {
	pub session_id: String,
	pub target_info: TargetInfo,
	#[serde(default)]
	pub waiting_for_debugger: bool,
}

/// `Target.detachedFromTarget`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTarget {
	pub session_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub target_id: Option<String>,
}

/// `Target.targetCreated`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCreated {
	pub target_info: TargetInfo,
}

/// `Target.targetDestroyed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDestroyed {
	pub target_id: String,
}
