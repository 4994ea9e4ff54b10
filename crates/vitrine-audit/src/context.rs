//! Request-scoped actor and network context.
//!
//! A [`RequestContext`] is built once at the edge of a request and is readable
//! from any depth of the call stack through [`current`] without threading it
//! through signatures.
//!
//! Two storage modes are provided:
//!
//! - [`scope`] binds the context to an async task (tokio task-local). This is
//!   the mode used by the HTTP edge: the context follows the task across worker
//!   threads and disappears when the scope ends, whether the request succeeded,
//!   failed or panicked.
//! - [`set_context`] binds the context to the current OS thread for synchronous
//!   callers. It returns a [`ContextGuard`] that clears the slot on drop, so a
//!   pooled thread never carries one request's context into the next.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::future::Future;
use uuid::Uuid;

use crate::client_ip::{UNKNOWN_ADDRESS, truncate_user_agent};

/// Default bound on the stored User-Agent length (in characters).
pub const DEFAULT_USER_AGENT_MAX_LEN: usize = 500;

/// Who is acting, from where, on which request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Actor identifier; `None` for anonymous callers.
    pub actor_id: Option<String>,
    /// Human-readable actor name.
    pub actor_name: Option<String>,
    /// Actor role, e.g. "ADMIN".
    pub actor_role: Option<String>,
    /// Validated client address, or "unknown".
    pub ip_address: String,
    /// Client user agent, truncated.
    pub user_agent: Option<String>,
    /// HTTP method of the request.
    pub http_method: Option<String>,
    /// Request path.
    pub request_path: Option<String>,
    /// Per-request correlation id.
    pub request_id: Uuid,
}

impl RequestContext {
    /// Create an anonymous context with a fresh correlation id.
    pub fn new() -> Self {
        Self::with_request_id(Uuid::new_v4())
    }

    /// Create an anonymous context with the given correlation id.
    pub fn with_request_id(request_id: Uuid) -> Self {
        Self {
            actor_id: None,
            actor_name: None,
            actor_role: None,
            ip_address: UNKNOWN_ADDRESS.to_string(),
            user_agent: None,
            http_method: None,
            request_path: None,
            request_id,
        }
    }

    pub fn with_actor(
        mut self,
        id: impl Into<String>,
        name: Option<String>,
        role: Option<String>,
    ) -> Self {
        self.actor_id = Some(id.into());
        self.actor_name = name;
        self.actor_role = role;
        self
    }

    /// Set the client address. Callers pass an already validated value
    /// (see [`crate::client_ip::extract_client_ip`]).
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = ip.into();
        self
    }

    /// Set the user agent, truncated to [`DEFAULT_USER_AGENT_MAX_LEN`] characters.
    pub fn with_user_agent(self, user_agent: &str) -> Self {
        self.with_user_agent_bounded(user_agent, DEFAULT_USER_AGENT_MAX_LEN)
    }

    /// Set the user agent, truncated to `max_len` characters.
    pub fn with_user_agent_bounded(mut self, user_agent: &str, max_len: usize) -> Self {
        self.user_agent = Some(truncate_user_agent(user_agent, max_len));
        self
    }

    pub fn with_request(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.http_method = Some(method.into());
        self.request_path = Some(path.into());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.actor_id.is_none()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

tokio::task_local! {
    static TASK_CONTEXT: RequestContext;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

/// Run `future` with `context` visible to [`current`] for its whole duration.
pub async fn scope<F>(context: RequestContext, future: F) -> F::Output
where
    F: Future,
{
    TASK_CONTEXT.scope(context, future).await
}

/// Synchronous counterpart of [`scope`].
pub fn sync_scope<F, R>(context: RequestContext, f: F) -> R
where
    F: FnOnce() -> R,
{
    TASK_CONTEXT.sync_scope(context, f)
}

/// Bind `context` to the current thread until the returned guard is dropped
/// or [`clear`] is called.
///
/// Guards nest: dropping one puts back whatever context was bound when it was
/// created.
#[must_use = "the previous context is restored as soon as the guard is dropped"]
pub fn set_context(context: RequestContext) -> ContextGuard {
    let previous = THREAD_CONTEXT.with(|slot| slot.borrow_mut().replace(context));
    ContextGuard { previous }
}

/// The context of the current unit of work, if any.
///
/// `None` is the normal state for background jobs and unauthenticated paths.
pub fn current() -> Option<RequestContext> {
    TASK_CONTEXT
        .try_with(|context| context.clone())
        .ok()
        .or_else(|| THREAD_CONTEXT.with(|slot| slot.borrow().clone()))
}

/// Remove any thread-bound context.
pub fn clear() {
    THREAD_CONTEXT.with(|slot| slot.borrow_mut().take());
}

/// Restores the previously bound thread context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    previous: Option<RequestContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        THREAD_CONTEXT.with(|slot| *slot.borrow_mut() = previous);
    }
}
