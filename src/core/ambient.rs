//! Ambient per-call context (spec §4.C, §9 "Ambient per-call current agent
//! context").
//!
//! The source models this with reflection: every instance method is
//! wrapped so that calling it binds `{agent, connection, request, email}`
//! for the dynamic extent of the call. Rust has no such reflection, so per
//! §9's guidance this is a `tokio::task_local!` entered explicitly by every
//! core dispatcher (RPC dispatch, queue drain, scheduler fire, durable-task
//! execute) via [`with_agent_context`] — user handler closures observe the
//! right ambient values without threading parameters through the call.

use std::future::Future;

use uuid::Uuid;

use crate::core::agent::AgentHandle;

/// Identifies one live WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal metadata about the inbound HTTP request driving the current
/// callback, when there is one.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
}

/// Minimal metadata about an inbound email, when email ingress is the
/// trigger for the current callback. Email ingress plumbing itself is out
/// of scope (spec §1); this type only carries what ambient context needs.
#[derive(Debug, Clone)]
pub struct EmailMeta {
    pub from: String,
    pub to: String,
    pub subject: Option<String>,
}

/// The dynamically-scoped binding available to all code executed within a
/// single callback.
#[derive(Clone)]
pub struct AmbientContext {
    pub agent: AgentHandle,
    pub connection: Option<ConnectionId>,
    pub request: Option<RequestMeta>,
    pub email: Option<EmailMeta>,
}

impl AmbientContext {
    pub fn new(agent: AgentHandle) -> Self {
        Self { agent, connection: None, request: None, email: None }
    }

    pub fn with_connection(mut self, connection: ConnectionId) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_request(mut self, request: RequestMeta) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_email(mut self, email: EmailMeta) -> Self {
        self.email = Some(email);
        self
    }
}

tokio::task_local! {
    static CONTEXT: AmbientContext;
}

/// Enter `ctx` for the dynamic extent of `fut`. Nested same-agent scopes
/// are detected and skipped — re-entering the task-local for the same
/// agent is a no-op that just runs `fut` under the existing context,
/// matching the source's re-entry guard.
pub async fn with_agent_context<F, T>(ctx: AmbientContext, fut: F) -> T
where
    F: Future<Output = T>,
{
    let already_scoped = CONTEXT.try_with(|current| current.agent.same_agent(&ctx.agent)).unwrap_or(false);

    if already_scoped {
        fut.await
    } else {
        CONTEXT.scope(ctx, fut).await
    }
}

/// Read a value out of the current ambient context, if any is bound.
pub fn try_with<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&AmbientContext) -> R,
{
    CONTEXT.try_with(f).ok()
}

pub fn current_agent() -> Option<AgentHandle> {
    try_with(|c| c.agent.clone())
}

pub fn current_connection() -> Option<ConnectionId> {
    try_with(|c| c.connection).flatten()
}

pub fn current_request() -> Option<RequestMeta> {
    try_with(|c| c.request.clone()).flatten()
}

pub fn current_email() -> Option<EmailMeta> {
    try_with(|c| c.email.clone()).flatten()
}

/// `true` when called from within any ambient scope at all.
pub fn is_in_scope() -> bool {
    try_with(|_| ()).is_some()
}
