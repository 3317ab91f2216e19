//! Orchestrates zero or more outbound MCP sessions keyed by server id
//! (spec §4.I).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rmcp::transport::auth::OAuthState;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::adapters::mcp::{self, McpTransport};
use crate::core::connections::ConnectionRegistry;
use crate::core::event_bus::{EventBus, ObservabilityEvent};
use crate::core::rpc::OutboundFrame;
use crate::domain::errors::{McpError, McpResult};
use crate::domain::models::{
    McpConnectionState, McpConnectionView, McpResourceSummary, McpServerRecord, McpToolSummary, McpTransportKind,
};
use crate::domain::ports::McpServerRepository;

struct ConnectionEntry {
    view: McpConnectionView,
    transport: Option<Arc<dyn McpTransport>>,
    pending_oauth: Option<OAuthState>,
}

pub struct McpManager {
    repo: Arc<dyn McpServerRepository>,
    connections: Arc<ConnectionRegistry>,
    events: Arc<EventBus>,
    entries: RwLock<HashMap<String, ConnectionEntry>>,
    callback_url_cache: RwLock<HashSet<String>>,
}

/// What `connect_to_server` yields to the caller (e.g. the RPC layer or
/// `register_server`'s own startup path).
pub enum McpConnectAttempt {
    Ready,
    AuthRequired { auth_url: String, client_id: Option<String> },
    Failed(String),
}

/// What handling an OAuth callback request produces.
pub enum McpCallbackOutcome {
    NotFound,
    Error(String),
    Success,
}

impl McpManager {
    pub fn new(repo: Arc<dyn McpServerRepository>, connections: Arc<ConnectionRegistry>, events: Arc<EventBus>) -> Self {
        Self { repo, connections, events, entries: RwLock::new(HashMap::new()), callback_url_cache: RwLock::new(HashSet::new()) }
    }

    /// Rehydrate in-memory state for every persisted server, called once at
    /// agent construction.
    pub async fn restore_from_storage(&self) -> McpResult<()> {
        for record in self.repo.list_all().await.map_err(McpError::Storage)? {
            let mut view = McpConnectionView::new(record.id.clone(), record.server_url.clone());
            view.state = if record.auth_url.is_some() { McpConnectionState::Authenticating } else { McpConnectionState::Connecting };
            self.entries.write().await.insert(record.id, ConnectionEntry { view, transport: None, pending_oauth: None });
        }
        self.refresh_callback_cache().await.ok();
        Ok(())
    }

    /// `id` is caller-assigned (spec §4.I "`registerServer(id, opts)`") —
    /// the manager never mints its own server ids.
    pub async fn register_server(&self, id: &str, name: &str, server_url: &str, callback_url: &str) -> McpResult<()> {
        let record = McpServerRecord {
            id: id.to_string(),
            name: name.to_string(),
            server_url: server_url.to_string(),
            callback_url: callback_url.to_string(),
            client_id: None,
            auth_url: None,
            server_options: Value::Null,
        };
        self.repo.upsert(&record).await.map_err(McpError::Storage)?;

        let view = McpConnectionView::new(id.to_string(), server_url.to_string());
        self.entries.write().await.insert(id.to_string(), ConnectionEntry { view, transport: None, pending_oauth: None });
        self.refresh_callback_cache().await.ok();
        Ok(())
    }

    pub async fn connect_to_server(&self, id: &str, kind: McpTransportKind, oauth_code: Option<&str>) -> McpResult<McpConnectAttempt> {
        if let Some(code) = oauth_code {
            return self.complete_authorization(id, code).await;
        }

        match mcp::connect(&self.server_url(id).await?, kind).await {
            Ok(mcp::ConnectOutcome::Ready(conn, transport)) => {
                self.mark_connected(id, Arc::new(conn), transport).await;
                self.discover(id).await;
                Ok(McpConnectAttempt::Ready)
            }
            Ok(mcp::ConnectOutcome::AuthRequired { oauth, transport }) => {
                let (auth_url, client_id) = mcp::pending_authorization(&oauth);
                {
                    let mut entries = self.entries.write().await;
                    if let Some(entry) = entries.get_mut(id) {
                        entry.view.state = McpConnectionState::Authenticating;
                        entry.view.last_attempted_transport = Some(transport);
                        entry.pending_oauth = Some(oauth);
                    }
                }
                if let Some(mut record) = self.repo.get(id).await.map_err(McpError::Storage)? {
                    record.auth_url = Some(auth_url.clone());
                    record.client_id = client_id.clone();
                    self.repo.upsert(&record).await.map_err(McpError::Storage)?;
                }
                Ok(McpConnectAttempt::AuthRequired { auth_url, client_id })
            }
            Err(err) => {
                self.mark_failed(id, err.to_string()).await;
                Ok(McpConnectAttempt::Failed(err.to_string()))
            }
        }
    }

    async fn complete_authorization(&self, id: &str, code: &str) -> McpResult<McpConnectAttempt> {
        let (oauth, transport, url) = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(id).ok_or_else(|| McpError::ServerNotFound(id.to_string()))?;
            let oauth = entry.pending_oauth.take().ok_or(McpError::Unauthorized)?;
            (oauth, entry.view.last_attempted_transport.unwrap_or(McpTransportKind::StreamableHttp), entry.view.url.clone())
        };

        match mcp::resume_with_code(oauth, transport, &url, code).await {
            Ok(conn) => {
                self.mark_connected(id, Arc::new(conn), transport).await;
                self.discover(id).await;
                self.repo.clear_oauth_pending(id).await.map_err(McpError::Storage)?;
                self.refresh_callback_cache().await.ok();
                self.events.emit(ObservabilityEvent::new("mcp.connected", format!("mcp server {id} connected"), serde_json::json!({ "serverId": id })));
                Ok(McpConnectAttempt::Ready)
            }
            Err(err) => {
                self.mark_failed(id, err.to_string()).await;
                Ok(McpConnectAttempt::Failed(err.to_string()))
            }
        }
    }

    async fn server_url(&self, id: &str) -> McpResult<String> {
        let entries = self.entries.read().await;
        entries.get(id).map(|e| e.view.url.clone()).ok_or_else(|| McpError::ServerNotFound(id.to_string()))
    }

    async fn mark_connected(&self, id: &str, transport: Arc<dyn McpTransport>, kind: McpTransportKind) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(id) {
            entry.transport = Some(transport);
            entry.view.state = McpConnectionState::Discovering;
            entry.view.last_attempted_transport = Some(kind);
        }
    }

    async fn mark_failed(&self, id: &str, reason: String) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(id) {
            entry.view.state = McpConnectionState::Failed { reason: reason.clone() };
        }
        drop(entries);
        self.events.emit(ObservabilityEvent::new("mcp.error", format!("mcp server {id} failed: {reason}"), serde_json::json!({ "serverId": id, "reason": reason })));
        self.broadcast_view().await;
    }

    /// Required capability discovery (server capabilities) happens first;
    /// everything else is independent and a partial failure just leaves an
    /// empty collection with a logged error, per spec §4.I.
    async fn discover(&self, id: &str) {
        let transport = {
            let entries = self.entries.read().await;
            entries.get(id).and_then(|e| e.transport.clone())
        };
        let Some(transport) = transport else { return };

        let capabilities = match transport.server_capabilities().await {
            Ok(caps) => caps,
            Err(err) => {
                self.mark_failed(id, format!("capability discovery failed: {err}")).await;
                return;
            }
        };

        let (instructions, tools, resources, prompts, templates) = tokio::join!(
            transport.get_instructions(),
            transport.list_tools(),
            transport.list_resources(),
            transport.list_prompts(),
            transport.list_resource_templates(),
        );

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(id) {
            entry.view.state = McpConnectionState::Ready;
            entry.view.server_capabilities = Some(capabilities);
            entry.view.tools = log_partial_failure(&self.events, id, "tools", tools);
            entry.view.resources = log_partial_failure(&self.events, id, "resources", resources);
            entry.view.prompts = log_partial_failure(&self.events, id, "prompts", prompts);
            entry.view.resource_templates = log_partial_failure(&self.events, id, "resourceTemplates", templates);
            let _ = instructions;
        }
        drop(entries);
        self.broadcast_view().await;
    }

    async fn broadcast_view(&self) {
        let view = self.aggregate_view().await;
        self.connections.broadcast(OutboundFrame::McpServers { servers: view }, None);
    }

    pub async fn aggregate_view(&self) -> Value {
        let entries = self.entries.read().await;
        let servers: Vec<Value> = entries
            .values()
            .map(|e| {
                serde_json::json!({
                    "id": e.view.server_id,
                    "url": e.view.url,
                    "state": e.view.state.as_str(),
                    "toolCount": e.view.tools.len(),
                })
            })
            .collect();
        serde_json::json!({ "servers": servers })
    }

    /// Flat-maps each ready connection's tools, tagging each with its
    /// `serverId`.
    pub async fn list_tools(&self) -> Vec<(String, McpToolSummary)> {
        let entries = self.entries.read().await;
        entries.values().flat_map(|e| e.view.tools.iter().map(move |t| (e.view.server_id.clone(), t.clone()))).collect()
    }

    pub async fn list_resources(&self) -> Vec<(String, McpResourceSummary)> {
        let entries = self.entries.read().await;
        entries.values().flat_map(|e| e.view.resources.iter().map(move |r| (e.view.server_id.clone(), r.clone()))).collect()
    }

    pub async fn list_prompts(&self) -> Vec<(String, Value)> {
        let entries = self.entries.read().await;
        entries.values().flat_map(|e| e.view.prompts.iter().map(move |p| (e.view.server_id.clone(), p.clone()))).collect()
    }

    pub async fn list_resource_templates(&self) -> Vec<(String, Value)> {
        let entries = self.entries.read().await;
        entries.values().flat_map(|e| e.view.resource_templates.iter().map(move |t| (e.view.server_id.clone(), t.clone()))).collect()
    }

    /// `{name: "tool_{serverId-without-dashes}_{name}", description,
    /// inputSchema, outputSchema?}` — the tool-for-AI view.
    pub async fn tools_for_ai(&self) -> Vec<Value> {
        self.list_tools()
            .await
            .into_iter()
            .map(|(server_id, tool)| {
                let namespaced = format!("tool_{}_{}", server_id.replace('-', ""), tool.name);
                serde_json::json!({
                    "name": namespaced,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                    "outputSchema": tool.output_schema,
                })
            })
            .collect()
    }

    /// Strips any `"{serverId}."` prefix from `name` before delegating.
    pub async fn call_tool(&self, server_id: &str, name: &str, arguments: Value) -> McpResult<Value> {
        let stripped = name.strip_prefix(&format!("{server_id}.")).unwrap_or(name);
        let transport = {
            let entries = self.entries.read().await;
            entries.get(server_id).and_then(|e| e.transport.clone())
        };
        let transport = transport.ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
        transport.call_tool(stripped, arguments).await
    }

    /// Fast path for `isCallbackRequest`: a GET whose path matches a
    /// cached, persisted callback URL. Refreshed from storage on a miss.
    pub async fn is_callback_request(&self, path: &str) -> bool {
        if self.callback_url_cache.read().await.iter().any(|url| path.starts_with(url.as_str())) {
            return true;
        }
        if self.refresh_callback_cache().await.is_ok() {
            return self.callback_url_cache.read().await.iter().any(|url| path.starts_with(url.as_str()));
        }
        false
    }

    async fn refresh_callback_cache(&self) -> McpResult<()> {
        let pending = self.repo.list_pending_callback_urls().await.map_err(McpError::Storage)?;
        let mut cache = self.callback_url_cache.write().await;
        cache.clear();
        cache.extend(pending.into_iter().map(|(_, url)| url));
        Ok(())
    }

    /// `handleCallbackRequest`: locate the server whose `callbackUrl`
    /// prefixes `path`, then dispatch to `connect_to_server` with the code.
    pub async fn handle_callback_request(&self, path: &str, code: Option<&str>, error: Option<&str>) -> McpCallbackOutcome {
        if let Some(error) = error {
            return McpCallbackOutcome::Error(error.to_string());
        }
        let Some(code) = code else {
            return McpCallbackOutcome::Error("missing code".to_string());
        };

        let pending = self.repo.list_pending_callback_urls().await.unwrap_or_default();
        let Some((server_id, _)) = pending.into_iter().find(|(_, url)| path.starts_with(url.as_str())) else {
            return McpCallbackOutcome::NotFound;
        };

        match self.connect_to_server(&server_id, McpTransportKind::Auto, Some(code)).await {
            Ok(McpConnectAttempt::Ready) => McpCallbackOutcome::Success,
            Ok(McpConnectAttempt::AuthRequired { .. }) => McpCallbackOutcome::Error("authorization incomplete".to_string()),
            Ok(McpConnectAttempt::Failed(reason)) => McpCallbackOutcome::Error(reason),
            Err(err) => McpCallbackOutcome::Error(err.to_string()),
        }
    }
}

/// Alias used by `server::websocket`/`server::http` to report the
/// aggregate MCP view without reaching into `McpManager` internals.
pub type McpView = Value;

fn log_partial_failure<T>(events: &EventBus, server_id: &str, kind: &str, result: Result<Vec<T>, McpError>) -> Vec<T> {
    match result {
        Ok(items) => items,
        Err(err) => {
            events.emit(ObservabilityEvent::new(
                "mcp.discovery_partial_failure",
                format!("mcp server {server_id} failed to list {kind}: {err}"),
                serde_json::json!({ "serverId": server_id, "kind": kind }),
            ));
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteMcpServerRepository};

    async fn new_manager() -> McpManager {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteMcpServerRepository::new(pool));
        McpManager::new(repo, Arc::new(ConnectionRegistry::new()), Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn register_server_is_reflected_in_the_aggregate_view() {
        let manager = new_manager().await;
        manager.register_server("srv-1", "Server One", "https://mcp.example/srv", "/_mcp/callback/srv-1").await.unwrap();

        let view = manager.aggregate_view().await;
        let servers = view["servers"].as_array().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0]["id"], "srv-1");
    }

    #[tokio::test]
    async fn callback_request_is_recognized_once_the_server_is_pending_auth() {
        let manager = new_manager().await;
        manager.register_server("srv-1", "Server One", "https://mcp.example/srv", "/_mcp/callback/srv-1").await.unwrap();

        assert!(!manager.is_callback_request("/_mcp/callback/srv-1").await);

        if let Some(mut record) = manager.repo.get("srv-1").await.unwrap() {
            record.auth_url = Some("https://mcp.example/authorize".to_string());
            manager.repo.upsert(&record).await.unwrap();
        }

        assert!(manager.is_callback_request("/_mcp/callback/srv-1").await);
    }

    #[tokio::test]
    async fn handle_callback_request_reports_not_found_for_unknown_path() {
        let manager = new_manager().await;
        let outcome = manager.handle_callback_request("/_mcp/callback/ghost", Some("code"), None).await;
        assert!(matches!(outcome, McpCallbackOutcome::NotFound));
    }

    #[tokio::test]
    async fn handle_callback_request_surfaces_the_provider_error() {
        let manager = new_manager().await;
        let outcome = manager.handle_callback_request("/_mcp/callback/srv-1", None, Some("access_denied")).await;
        match outcome {
            McpCallbackOutcome::Error(reason) => assert_eq!(reason, "access_denied"),
            _ => panic!("expected Error outcome"),
        }
    }
}
