//! Foundation module - Shared domain primitives.
//!
//! Identifiers, timestamps, authentication types and error types that form
//! the vocabulary of the gateway.

mod auth;
mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use auth::{AuthError, AuthenticatedUser};
pub use errors::ValidationError;
pub use ids::{ConnectionId, UserId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
