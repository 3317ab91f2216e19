//! The axum WebSocket/HTTP surface described in spec §6, modeled on the
//! teacher's `adapters/mcp/events_http.rs` (`EventsHttpServer`/`EventsState`
//! shape): a `Router` built once from shared state, `with_state` plus
//! `TraceLayer`/`CorsLayer`, and a `serve`/`serve_with_shutdown` pair
//! binding a `TcpListener`.
//!
//! Agents are addressed as `"{prefix}/{class}/{name}"` (spec §6 "Routing");
//! this harness serves exactly one class per process via [`AgentRegistry`],
//! the Rust-native stand-in for the platform's named-durable-object
//! resolver (spec §1 non-goal: no concrete durable-object host).

pub mod http;
pub mod registry;
pub mod websocket;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use registry::{AgentFactory, AgentRegistry, BoxFuture};

use crate::infrastructure::config::ListenerConfig;

/// State shared by every route.
pub struct ServerState {
    pub registry: Arc<AgentRegistry>,
    pub routing_prefix: String,
}

/// The harness's HTTP/WebSocket listener: one router serving every
/// instance of one agent class.
pub struct AgentServer {
    state: Arc<ServerState>,
    listener: ListenerConfig,
}

impl AgentServer {
    pub fn new(registry: Arc<AgentRegistry>, routing_prefix: impl Into<String>, listener: ListenerConfig) -> Self {
        Self { state: Arc::new(ServerState { registry, routing_prefix: routing_prefix.into() }), listener }
    }

    fn build_router(&self) -> Router {
        let agent_routes = Router::new()
            .route("/:class/:name", get(websocket::upgrade))
            .route("/:class/:name/_workflow-update", post(http::workflow_update))
            .route("/:class/:name/_execute-durable-task", post(http::execute_durable_task))
            .route("/:class/:name/_mcp/callback/:server_id", get(http::mcp_callback))
            .with_state(self.state.clone());

        let mut router = Router::new().nest(&format!("/{}", self.state.routing_prefix), agent_routes).layer(TraceLayer::new_for_http());

        if self.listener.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
        }

        router
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.listener.host, self.listener.port).parse()?;
        let router = self.build_router();

        tracing::info!(%addr, prefix = %self.state.routing_prefix, "agent-server listening");

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }

    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.listener.host, self.listener.port).parse()?;
        let router = self.build_router();

        tracing::info!(%addr, prefix = %self.state.routing_prefix, "agent-server listening");

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_without_panicking() {
        let registry = Arc::new(AgentRegistry::new("example-agent", Arc::new(|_name| Box::pin(async { unreachable!() }))));
        let server = AgentServer::new(registry, "agents", ListenerConfig::default());
        let _router = server.build_router();
    }
}
