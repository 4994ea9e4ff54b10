//! Request-edge middleware.
//!
//! Order matters: [`actor::trusted_actor_headers`] must run before
//! [`context::request_context`] so the actor is known when the context is built.

pub mod actor;
pub mod context;

pub use actor::AuthenticatedActor;
pub use context::REQUEST_ID_HEADER;
