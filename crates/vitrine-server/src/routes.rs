//! Route definitions.

use crate::handlers;
use crate::middleware::{actor, context};
use crate::state::AppState;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let audit = Router::new()
        .route("/", get(handlers::list_audit_records))
        .route("/stats", get(handlers::audit_stats))
        .route("/dead-letters", get(handlers::list_dead_letters))
        .route(
            "/dead-letters/{message_id}",
            axum::routing::delete(handlers::discard_dead_letter),
        )
        .route(
            "/dead-letters/{message_id}/replay",
            post(handlers::replay_dead_letter),
        )
        .route("/{event_id}", get(handlers::get_audit_record));

    let projects = Router::new()
        .route(
            "/",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/{id}",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route("/{id}/publish", post(handlers::publish_project))
        .route("/{id}/unpublish", post(handlers::unpublish_project));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/admin/audit", audit)
        .nest("/admin/projects", projects)
        .fallback(handlers::fallback)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            context::request_context,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            actor::trusted_actor_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
