//! # vitrine-server
//!
//! HTTP edge of the Vitrine admin backend.
//!
//! - Builds the audit `RequestContext` for every request (actor, client
//!   address, user agent, correlation id) and keeps it in scope for the
//!   handler.
//! - Exposes the audit log, pipeline stats and dead-letter operations under
//!   `/admin/audit`.
//! - Serves the audited `/admin/projects` resource.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod projects;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
