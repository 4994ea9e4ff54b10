use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// The caller as authenticated upstream, stored as a request extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedActor {
    pub id: String,
    pub name: Option<String>,
    pub role: Option<String>,
}

/// Populate [`AuthenticatedActor`] from `x-actor-*` headers set by a trusted
/// gateway. Does nothing unless `server.trust_actor_headers` is enabled.
pub async fn trusted_actor_headers(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    if state.trust_actor_headers() {
        if let Some(actor) = actor_from_headers(req.headers()) {
            req.extensions_mut().insert(actor);
        }
    }
    next.run(req).await
}

pub fn actor_from_headers(headers: &HeaderMap) -> Option<AuthenticatedActor> {
    Some(AuthenticatedActor {
        id: header_value(headers, ACTOR_ID_HEADER)?,
        name: header_value(headers, ACTOR_NAME_HEADER),
        role: header_value(headers, ACTOR_ROLE_HEADER),
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let s = headers.get(name).and_then(|h| h.to_str().ok())?.trim();
    if s.is_empty() {
        return None;
    }
    Some(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_actor_requires_an_id() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_NAME_HEADER, HeaderValue::from_static("Ada"));
        assert!(actor_from_headers(&headers).is_none());

        headers.insert(ACTOR_ID_HEADER, HeaderValue::from_static(" 7 "));
        headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_static(""));
        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor.id, "7");
        assert_eq!(actor.name.as_deref(), Some("Ada"));
        assert!(actor.role.is_none());
    }
}
