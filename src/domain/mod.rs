//! Domain layer containing gateway types and rules.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, auth, errors)
//! - `gateway` - Channels, envelopes, routing patterns and the session state machine

pub mod foundation;
pub mod gateway;
