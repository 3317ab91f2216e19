//! A single live outbound MCP session built on `rmcp`'s `Transport`/
//! `RunningService`/OAuth abstractions (spec §1 "the MCP wire SDK is an
//! external collaborator"; SPEC_FULL §B.5).
//!
//! `core::mcp::manager` only ever sees [`McpTransport`] — the domain layer
//! must not depend on `rmcp`'s non-`Send`/opaque wire types directly (see
//! `domain::models::mcp`'s doc comment), so every `rmcp` type stays behind
//! this file's wall.

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, PaginatedRequestParam};
use rmcp::service::{serve_client, RoleClient, RunningService};
use rmcp::transport::auth::{AuthClient, OAuthState};
use rmcp::transport::sse_client::SseClientTransport;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ClientHandler;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::errors::McpError;
use crate::domain::models::{McpToolSummary, McpTransportKind};

/// A no-op client handler; this crate does not implement server-initiated
/// sampling/elicitation, only the outbound-call surface spec §4.I needs.
#[derive(Clone, Default)]
struct PassiveClientHandler;

impl ClientHandler for PassiveClientHandler {}

enum Session {
    StreamableHttp(RunningService<RoleClient, PassiveClientHandler>),
    StreamableHttpAuth(RunningService<RoleClient, PassiveClientHandler>, OAuthState),
    Sse(RunningService<RoleClient, PassiveClientHandler>),
}

/// What the manager needs from a live connection, independent of which
/// transport/auth combination is underneath.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn server_capabilities(&self) -> Result<Value, McpError>;
    async fn get_instructions(&self) -> Result<Option<String>, McpError>;
    async fn list_tools(&self) -> Result<Vec<McpToolSummary>, McpError>;
    async fn list_resources(&self) -> Result<Vec<crate::domain::models::McpResourceSummary>, McpError>;
    async fn list_prompts(&self) -> Result<Vec<Value>, McpError>;
    async fn list_resource_templates(&self) -> Result<Vec<Value>, McpError>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError>;
}

pub struct RmcpConnection {
    session: Mutex<Session>,
}

impl RmcpConnection {
    /// Attempt streamable-http, no OAuth.
    pub async fn connect_streamable_http(url: &str) -> Result<Self, McpError> {
        let transport = StreamableHttpClientTransport::with_client(
            reqwest::Client::new(),
            rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig::with_uri(url.to_string()),
        );
        let service = serve_client(PassiveClientHandler, transport).await.map_err(classify_connect_error)?;
        Ok(Self { session: Mutex::new(Session::StreamableHttp(service)) })
    }

    /// Attempt streamable-http behind an OAuth-aware `reqwest` client, used
    /// once tokens are available (either a resumed session or fresh from a
    /// completed authorization-code exchange).
    pub async fn connect_streamable_http_authenticated(url: &str, oauth: OAuthState) -> Result<Self, McpError> {
        let auth_client = AuthClient::new(reqwest::Client::new(), oauth.clone());
        let transport = StreamableHttpClientTransport::with_client(
            auth_client,
            rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig::with_uri(url.to_string()),
        );
        let service = serve_client(PassiveClientHandler, transport)
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        Ok(Self { session: Mutex::new(Session::StreamableHttpAuth(service, oauth)) })
    }

    pub async fn connect_sse(url: &str) -> Result<Self, McpError> {
        let transport = SseClientTransport::start(url.to_string()).await.map_err(classify_connect_error)?;
        let service = serve_client(PassiveClientHandler, transport).await.map_err(classify_connect_error)?;
        Ok(Self { session: Mutex::new(Session::Sse(service)) })
    }

    /// Complete an authorization-code exchange against the pending OAuth
    /// state this connection was authenticating with. Only valid on a
    /// connection created against a 401 response.
    pub async fn complete_authorization(&self, oauth: &mut OAuthState, code: &str) -> Result<(), McpError> {
        oauth.handle_callback(code).await.map_err(|e| McpError::Unauthorized.context(e.to_string()))
    }
}

#[async_trait]
impl McpTransport for RmcpConnection {
    async fn server_capabilities(&self) -> Result<Value, McpError> {
        let session = self.session.lock().await;
        let info = match &*session {
            Session::StreamableHttp(s) => s.peer_info(),
            Session::StreamableHttpAuth(s, _) => s.peer_info(),
            Session::Sse(s) => s.peer_info(),
        };
        serde_json::to_value(info).map_err(|e| McpError::Discovery(e.to_string()))
    }

    async fn get_instructions(&self) -> Result<Option<String>, McpError> {
        let session = self.session.lock().await;
        let info = match &*session {
            Session::StreamableHttp(s) => s.peer_info(),
            Session::StreamableHttpAuth(s, _) => s.peer_info(),
            Session::Sse(s) => s.peer_info(),
        };
        Ok(info.and_then(|i| i.instructions.clone()))
    }

    async fn list_tools(&self) -> Result<Vec<McpToolSummary>, McpError> {
        let session = self.session.lock().await;
        let result = match &*session {
            Session::StreamableHttp(s) => s.list_tools(PaginatedRequestParam::default()).await,
            Session::StreamableHttpAuth(s, _) => s.list_tools(PaginatedRequestParam::default()).await,
            Session::Sse(s) => s.list_tools(PaginatedRequestParam::default()).await,
        }
        .map_err(|e| McpError::Discovery(e.to_string()))?;

        Ok(result
            .tools
            .into_iter()
            .map(|tool| McpToolSummary {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()),
                input_schema: serde_json::to_value(&tool.input_schema).unwrap_or(Value::Null),
                output_schema: tool.output_schema.as_ref().and_then(|s| serde_json::to_value(s).ok()),
            })
            .collect())
    }

    async fn list_resources(&self) -> Result<Vec<crate::domain::models::McpResourceSummary>, McpError> {
        let session = self.session.lock().await;
        let result = match &*session {
            Session::StreamableHttp(s) => s.list_resources(PaginatedRequestParam::default()).await,
            Session::StreamableHttpAuth(s, _) => s.list_resources(PaginatedRequestParam::default()).await,
            Session::Sse(s) => s.list_resources(PaginatedRequestParam::default()).await,
        }
        .map_err(|e| McpError::Discovery(e.to_string()))?;

        Ok(result
            .resources
            .into_iter()
            .map(|r| crate::domain::models::McpResourceSummary { uri: r.uri.to_string(), name: r.name.to_string(), mime_type: r.mime_type.map(|m| m.to_string()) })
            .collect())
    }

    async fn list_prompts(&self) -> Result<Vec<Value>, McpError> {
        let session = self.session.lock().await;
        let result = match &*session {
            Session::StreamableHttp(s) => s.list_prompts(PaginatedRequestParam::default()).await,
            Session::StreamableHttpAuth(s, _) => s.list_prompts(PaginatedRequestParam::default()).await,
            Session::Sse(s) => s.list_prompts(PaginatedRequestParam::default()).await,
        }
        .map_err(|e| McpError::Discovery(e.to_string()))?;

        Ok(result.prompts.into_iter().filter_map(|p| serde_json::to_value(p).ok()).collect())
    }

    async fn list_resource_templates(&self) -> Result<Vec<Value>, McpError> {
        let session = self.session.lock().await;
        let result = match &*session {
            Session::StreamableHttp(s) => s.list_resource_templates(PaginatedRequestParam::default()).await,
            Session::StreamableHttpAuth(s, _) => s.list_resource_templates(PaginatedRequestParam::default()).await,
            Session::Sse(s) => s.list_resource_templates(PaginatedRequestParam::default()).await,
        }
        .map_err(|e| McpError::Discovery(e.to_string()))?;

        Ok(result.resource_templates.into_iter().filter_map(|t| serde_json::to_value(t).ok()).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let args = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => return Err(McpError::Discovery(format!("tool arguments must be an object, got {other}"))),
        };
        let params = CallToolRequestParam { name: name.to_string().into(), arguments: args };

        let session = self.session.lock().await;
        let result = match &*session {
            Session::StreamableHttp(s) => s.call_tool(params).await,
            Session::StreamableHttpAuth(s, _) => s.call_tool(params).await,
            Session::Sse(s) => s.call_tool(params).await,
        }
        .map_err(|e| McpError::Transport(e.to_string()))?;

        serde_json::to_value(result).map_err(|e| McpError::Discovery(e.to_string()))
    }
}

/// Resolve the `{authUrl, clientId}` pair a manager needs to persist when a
/// connection attempt yields `401` and falls back to authenticating.
pub fn pending_authorization(oauth: &OAuthState) -> (String, Option<String>) {
    (oauth.authorization_url().to_string(), oauth.client_id())
}

/// What a connection attempt produced: either a ready session, or a signal
/// that the caller must persist `{authUrl, clientId}` and wait for the
/// OAuth callback.
pub enum ConnectOutcome {
    Ready(RmcpConnection, McpTransportKind),
    AuthRequired { oauth: OAuthState, transport: McpTransportKind },
}

/// Try `kind`; under `Auto`, try streamable-http first and fall through to
/// SSE both on a transport-level failure (404/405/connection refused, per
/// spec §4.I "On 404/405 in auto, transparently fall through") and on a 401
/// ("On 401 under auto with a remaining fallback, try the next transport").
/// `AuthRequired` is only surfaced once SSE has also been tried — either it
/// also comes back `AuthRequired` (in which case that's the one reported,
/// with `lastAttemptedTransport` set to SSE) or it fails outright (in which
/// case the original streamable-http `AuthRequired` is reported instead).
pub async fn connect(url: &str, kind: McpTransportKind) -> Result<ConnectOutcome, McpError> {
    match kind {
        McpTransportKind::StreamableHttp => try_streamable_http(url).await,
        McpTransportKind::Sse => try_sse(url).await,
        McpTransportKind::Auto => match try_streamable_http(url).await {
            Ok(ConnectOutcome::Ready(conn, transport)) => Ok(ConnectOutcome::Ready(conn, transport)),
            Ok(ConnectOutcome::AuthRequired { oauth, transport }) => match try_sse(url).await {
                Ok(outcome) => Ok(outcome),
                Err(_) => Ok(ConnectOutcome::AuthRequired { oauth, transport }),
            },
            Err(McpError::Transport(_)) => try_sse(url).await,
            Err(other) => Err(other),
        },
    }
}

/// Resume a pending authorization with the code from the OAuth callback,
/// then establish the authenticated connection.
pub async fn resume_with_code(mut oauth: OAuthState, transport: McpTransportKind, url: &str, code: &str) -> Result<RmcpConnection, McpError> {
    oauth.handle_callback(code).await.map_err(|e| McpError::OAuth(e.to_string()))?;
    match transport {
        McpTransportKind::Sse => RmcpConnection::connect_sse(url).await,
        _ => RmcpConnection::connect_streamable_http_authenticated(url, oauth).await,
    }
}

async fn try_streamable_http(url: &str) -> Result<ConnectOutcome, McpError> {
    match RmcpConnection::connect_streamable_http(url).await {
        Ok(conn) => Ok(ConnectOutcome::Ready(conn, McpTransportKind::StreamableHttp)),
        Err(McpError::Unauthorized) => {
            let oauth = OAuthState::new(url, None).await.map_err(|e| McpError::OAuth(e.to_string()))?;
            Ok(ConnectOutcome::AuthRequired { oauth, transport: McpTransportKind::StreamableHttp })
        }
        Err(other) => Err(other),
    }
}

async fn try_sse(url: &str) -> Result<ConnectOutcome, McpError> {
    match RmcpConnection::connect_sse(url).await {
        Ok(conn) => Ok(ConnectOutcome::Ready(conn, McpTransportKind::Sse)),
        Err(McpError::Unauthorized) => {
            let oauth = OAuthState::new(url, None).await.map_err(|e| McpError::OAuth(e.to_string()))?;
            Ok(ConnectOutcome::AuthRequired { oauth, transport: McpTransportKind::Sse })
        }
        Err(other) => Err(other),
    }
}

trait McpErrorExt {
    fn context(self, detail: String) -> McpError;
}

impl McpErrorExt for McpError {
    fn context(self, detail: String) -> McpError {
        match self {
            McpError::Unauthorized => McpError::Discovery(format!("oauth callback failed: {detail}")),
            other => other,
        }
    }
}

/// rmcp surfaces transport failures as opaque `Display`-able errors; a 401
/// is distinguished by string sniffing since the crate does not expose a
/// typed HTTP status here. Good enough to route to the OAuth path without
/// depending on an unstable error shape.
fn classify_connect_error(err: impl std::fmt::Display) -> McpError {
    let message = err.to_string();
    if message.contains("401") || message.to_lowercase().contains("unauthorized") {
        McpError::Unauthorized
    } else {
        McpError::Transport(message)
    }
}
