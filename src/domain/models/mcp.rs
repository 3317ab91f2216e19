//! MCP server record and in-memory connection state (spec §3, §4.I).

use serde_json::Value;
use uuid::Uuid;

/// Persisted per-server registration. `auth_url` non-empty implies OAuth is
/// pending; a successful callback clears both `auth_url` and `callback_url`
/// (anti-replay).
#[derive(Debug, Clone)]
pub struct McpServerRecord {
    pub id: String,
    pub name: String,
    pub server_url: String,
    pub callback_url: String,
    pub client_id: Option<String>,
    pub auth_url: Option<String>,
    pub server_options: Value,
}

/// Client-side transport preference (spec §6 "MCP transports").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpTransportKind {
    StreamableHttp,
    Sse,
    /// Try streamable-http, then fall back to SSE.
    Auto,
}

impl McpTransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StreamableHttp => "streamable-http",
            Self::Sse => "sse",
            Self::Auto => "auto",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "streamable-http" => Some(Self::StreamableHttp),
            "sse" => Some(Self::Sse),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Per-server lifecycle state machine (spec §4.I). Not persisted — lives
/// only as long as the in-process connection does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpConnectionState {
    Authenticating,
    Connecting,
    Discovering,
    Ready,
    /// Terminal until the connection is recreated.
    Failed { reason: String },
}

impl McpConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticating => "authenticating",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
            Self::Failed { .. } => "failed",
        }
    }
}

/// The live, in-memory MCP connection (spec §3 "MCP live connection"). The
/// `rmcp` `RunningService`/`Transport` handles live on
/// `adapters::mcp::connection::LiveConnection`, which wraps this record with
/// the non-`Send`/opaque wire types the domain layer must not depend on.
#[derive(Debug, Clone)]
pub struct McpConnectionView {
    pub server_id: String,
    pub url: String,
    pub state: McpConnectionState,
    pub server_capabilities: Option<Value>,
    pub tools: Vec<McpToolSummary>,
    pub resources: Vec<McpResourceSummary>,
    pub prompts: Vec<Value>,
    pub resource_templates: Vec<Value>,
    pub last_attempted_transport: Option<McpTransportKind>,
}

#[derive(Debug, Clone)]
pub struct McpToolSummary {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct McpResourceSummary {
    pub uri: String,
    pub name: String,
    pub mime_type: Option<String>,
}

impl McpConnectionView {
    pub fn new(server_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            url: url.into(),
            state: McpConnectionState::Connecting,
            server_capabilities: None,
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            resource_templates: Vec::new(),
            last_attempted_transport: None,
        }
    }
}

/// A stable, opaque server identifier derived the same way the teacher's
/// repositories mint entity ids: a UUID, but formatted so it doubles as a
/// `HashMap` key without an extra parse.
pub fn new_server_id() -> String {
    Uuid::new_v4().to_string()
}
