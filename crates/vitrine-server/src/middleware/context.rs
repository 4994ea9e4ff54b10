//! Builds the audit [`RequestContext`] for every request and keeps it in
//! scope while the handler runs.

use crate::middleware::actor::AuthenticatedActor;
use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, header::USER_AGENT},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use uuid::Uuid;
use vitrine_audit::client_ip::extract_client_ip;
use vitrine_audit::{RequestContext, context};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn request_context(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .unwrap_or_else(Uuid::new_v4);

    let ctx = build_context(&req, request_id, state.pipeline().user_agent_max_len());
    tracing::debug!(
        request_id = %request_id,
        ip = %ctx.ip_address,
        actor = ?ctx.actor_id,
        "request context established"
    );

    let mut response = context::scope(ctx, next.run(req)).await;

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

pub fn build_context(req: &Request, request_id: Uuid, user_agent_max_len: usize) -> RequestContext {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());

    let mut ctx = RequestContext::with_request_id(request_id)
        .with_ip_address(extract_client_ip(req.headers(), peer))
        .with_request(req.method().as_str(), req.uri().path());

    if let Some(ua) = req.headers().get(USER_AGENT).and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_user_agent_bounded(ua, user_agent_max_len);
    }
    if let Some(actor) = req.extensions().get::<AuthenticatedActor>() {
        ctx = ctx.with_actor(actor.id.clone(), actor.name.clone(), actor.role.clone());
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_context_prefers_forwarded_address_and_bounds_user_agent() {
        let mut req = Request::builder()
            .method("PUT")
            .uri("/admin/projects/3?x=1")
            .header("x-forwarded-for", "10.0.0.1, 203.0.113.9")
            .header(USER_AGENT, "a".repeat(40))
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        req.extensions_mut().insert(AuthenticatedActor {
            id: "7".into(),
            name: None,
            role: Some("ADMIN".into()),
        });

        let id = Uuid::new_v4();
        let ctx = build_context(&req, id, 10);
        assert_eq!(ctx.request_id, id);
        assert_eq!(ctx.ip_address, "203.0.113.9");
        assert_eq!(ctx.user_agent.as_deref(), Some("aaaaaaaaaa"));
        assert_eq!(ctx.http_method.as_deref(), Some("PUT"));
        assert_eq!(ctx.request_path.as_deref(), Some("/admin/projects/3"));
        assert_eq!(ctx.actor_role.as_deref(), Some("ADMIN"));
    }

    #[test]
    fn test_peer_address_is_the_fallback() {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));

        let ctx = build_context(&req, Uuid::new_v4(), 500);
        assert_eq!(ctx.ip_address, "192.0.2.1");
        assert!(ctx.is_anonymous());
    }
}
