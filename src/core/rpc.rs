//! WebSocket frame types and RPC dispatch (spec §4.H, §6 "WebSocket
//! frames").
//!
//! Every frame is a UTF-8 JSON object tagged by `type`. The core recognizes
//! two inbound tags (`rpc`, `cf_agent_state`) and emits four outbound tags;
//! anything else on the inbound side is handed to the embedding
//! application's `on_message` hook untouched.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::errors::RpcError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A frame sent by a client over the WebSocket.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Rpc { id: String, method: String, args: Vec<Value> },
    StateUpdate { state: Value },
    /// Any other tagged or untagged frame — forwarded verbatim to the
    /// embedding application's `on_message` hook.
    Other(Value),
}

/// Parse one WebSocket text frame. Malformed JSON is a protocol error
/// (spec §7); an unrecognized `type` is not an error, just a pass-through.
pub fn parse_inbound(raw: &str) -> Result<InboundFrame, RpcError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| RpcError::MalformedFrame(e.to_string()))?;

    let Some(tag) = value.get("type").and_then(Value::as_str) else {
        return Ok(InboundFrame::Other(value));
    };

    match tag {
        "rpc" => {
            let id = value
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError::MalformedFrame("rpc frame missing id".into()))?
                .to_string();
            let method = value
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError::MalformedFrame("rpc frame missing method".into()))?
                .to_string();
            let args = value.get("args").and_then(Value::as_array).cloned().unwrap_or_default();
            Ok(InboundFrame::Rpc { id, method, args })
        }
        "cf_agent_state" => {
            let state = value
                .get("state")
                .cloned()
                .ok_or_else(|| RpcError::MalformedFrame("cf_agent_state frame missing state".into()))?;
            Ok(InboundFrame::StateUpdate { state })
        }
        _ => Ok(InboundFrame::Other(value)),
    }
}

/// A frame sent to a client. Serializes to the exact wire shape spec §6
/// names.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    #[serde(rename = "rpc")]
    Rpc {
        id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        done: Option<bool>,
    },
    #[serde(rename = "cf_agent_state")]
    State { state: Option<Value> },
    #[serde(rename = "cf_agent_mcp_servers")]
    McpServers { servers: Value },
    #[serde(rename = "cf_agent_task_update")]
    TaskUpdate {
        #[serde(rename = "taskId")]
        task_id: Uuid,
        task: Option<Value>,
    },
}

impl OutboundFrame {
    pub fn rpc_success(id: impl Into<String>, result: Value, done: bool) -> Self {
        Self::Rpc { id: id.into(), success: true, result: Some(result), error: None, done: Some(done) }
    }

    pub fn rpc_error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Rpc { id: id.into(), success: false, result: None, error: Some(error.into()), done: None }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Marker struct handed to a streaming RPC method as its first argument.
/// `send` emits one intermediate `done:false` chunk; the method's own
/// return value becomes the final `done:true` chunk.
#[derive(Clone)]
pub struct StreamingResponse {
    tx: mpsc::UnboundedSender<Value>,
}

impl StreamingResponse {
    fn new() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send one intermediate chunk. Silently dropped if the connection is
    /// already gone — streaming RPCs never fail because nobody is
    /// listening anymore.
    pub fn send(&self, value: Value) {
        let _ = self.tx.send(value);
    }
}

/// What a registered callable method does when invoked.
pub enum Handler {
    Unary(Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>),
    Streaming(Arc<dyn Fn(StreamingResponse, Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>),
}

/// Dispatch one `rpc` frame against a resolved [`Handler`], sending frames
/// through `send` as they become available. `send` is given every frame in
/// wire order; streaming dispatch interleaves intermediate chunks with
/// whatever else is emitted on the same connection only by virtue of
/// `send`'s own serialization (typically an mpsc sender per connection).
pub async fn dispatch(id: String, handler: &Handler, args: Vec<Value>, send: impl Fn(OutboundFrame) + Send + Sync) {
    match handler {
        Handler::Unary(f) => match f(args).await {
            Ok(result) => send(OutboundFrame::rpc_success(id, result, true)),
            Err(error) => send(OutboundFrame::rpc_error(id, error)),
        },
        Handler::Streaming(f) => {
            let (stream, mut rx) = StreamingResponse::new();
            let call = f(stream, args);
            tokio::pin!(call);

            loop {
                tokio::select! {
                    biased;
                    chunk = rx.recv() => {
                        match chunk {
                            Some(value) => send(OutboundFrame::rpc_success(id.clone(), value, false)),
                            None => {}
                        }
                    }
                    result = &mut call => {
                        // Drain any chunks sent just before completion.
                        while let Ok(value) = rx.try_recv() {
                            send(OutboundFrame::rpc_success(id.clone(), value, false));
                        }
                        match result {
                            Ok(result) => send(OutboundFrame::rpc_success(id, result, true)),
                            Err(error) => send(OutboundFrame::rpc_error(id, error)),
                        }
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rpc_frame() {
        let raw = r#"{"type":"rpc","id":"1","method":"echo","args":["hi"]}"#;
        let frame = parse_inbound(raw).unwrap();
        match frame {
            InboundFrame::Rpc { id, method, args } => {
                assert_eq!(id, "1");
                assert_eq!(method, "echo");
                assert_eq!(args, vec![Value::String("hi".into())]);
            }
            _ => panic!("expected Rpc frame"),
        }
    }

    #[test]
    fn unknown_tag_is_passthrough() {
        let raw = r#"{"type":"custom_app_event","foo":"bar"}"#;
        let frame = parse_inbound(raw).unwrap();
        assert!(matches!(frame, InboundFrame::Other(_)));
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        assert!(parse_inbound("not json").is_err());
    }

    #[tokio::test]
    async fn echo_rpc_yields_single_success_frame() {
        let handler = Handler::Unary(Arc::new(|args: Vec<Value>| {
            Box::pin(async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) }) as BoxFuture<'static, Result<Value, String>>
        }));

        let frames = std::sync::Mutex::new(Vec::new());
        dispatch("1".into(), &handler, vec![Value::String("hi".into())], |frame| {
            frames.lock().unwrap().push(frame);
        })
        .await;

        let frames = frames.into_inner().unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            OutboundFrame::Rpc { success, result, done, .. } => {
                assert!(success);
                assert_eq!(result, &Some(Value::String("hi".into())));
                assert_eq!(done, &Some(true));
            }
            _ => panic!("expected rpc frame"),
        }
    }

    #[tokio::test]
    async fn streaming_rpc_yields_chunks_then_done() {
        let handler = Handler::Streaming(Arc::new(|stream: StreamingResponse, _args: Vec<Value>| {
            Box::pin(async move {
                stream.send(Value::from(1));
                stream.send(Value::from(2));
                Ok(Value::from(3))
            }) as BoxFuture<'static, Result<Value, String>>
        }));

        let frames = std::sync::Mutex::new(Vec::new());
        dispatch("7".into(), &handler, vec![], |frame| {
            frames.lock().unwrap().push(frame);
        })
        .await;

        let frames = frames.into_inner().unwrap();
        assert_eq!(frames.len(), 3);
        let dones: Vec<_> = frames
            .iter()
            .map(|f| match f {
                OutboundFrame::Rpc { done, .. } => *done,
                _ => None,
            })
            .collect();
        assert_eq!(dones, vec![Some(false), Some(false), Some(true)]);
    }
}
