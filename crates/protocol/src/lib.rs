//! Wire types for the Chrome DevTools Protocol.
//!
//! This crate contains the serde-serializable types exchanged with a CDP
//! endpoint. These types represent the "protocol layer" - the shapes of data
//! as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with protocol**: Field names follow the CDP schema (camelCase)
//! - **Partial**: Only the `Runtime`, `Target` and `Page` members the bridge
//!   actually speaks are modelled; everything else travels as [`serde_json::Value`]
//!
//! Higher-level APIs are built on top of these types in `cdp-bridge`.

pub mod event;
pub mod message;
pub mod runtime;
pub mod target;

pub use event::CdpEvent;
pub use message::{ErrorPayload, Event, Message, Request, Response};
pub use runtime::*;
pub use target::*;
