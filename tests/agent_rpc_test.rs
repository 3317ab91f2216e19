//! End-to-end coverage of spec §8's RPC scenarios: a unary `echo` call and
//! a streaming `count` call driven through `Agent::handle_inbound`, exactly
//! as `server::websocket` drives it from a live socket.

mod common;

use serde_json::{json, Value};
use statefield::core::callable::{CallableRegistry, HandlerRegistration};
use statefield::core::rpc::OutboundFrame;
use statefield::core::task_tracker::TaskMethodRegistry;

async fn drain_on_connect_frames(rx: &mut tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>) {
    // onConnect sends a state frame then an MCP-servers frame (spec §4.H)
    // before any RPC traffic; tests that only care about RPC frames skip
    // past them here.
    let _ = rx.recv().await;
    let _ = rx.recv().await;
}

#[tokio::test]
async fn echo_rpc_round_trips_through_handle_inbound() {
    let mut callables = CallableRegistry::new();
    callables.register(HandlerRegistration::unary("echo", |args: Vec<Value>| {
        Box::pin(async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) })
    }));

    let agent = common::test_agent("echo-agent", callables, TaskMethodRegistry::new()).await;
    let (connection_id, mut rx) = agent.accept_connection().await.unwrap();
    drain_on_connect_frames(&mut rx).await;

    agent.handle_inbound(connection_id, r#"{"type":"rpc","id":"1","method":"echo","args":["hello"]}"#).await;

    let frame = rx.recv().await.expect("rpc response frame");
    match frame {
        OutboundFrame::Rpc { id, success, result, done, .. } => {
            assert_eq!(id, "1");
            assert!(success);
            assert_eq!(result, Some(Value::String("hello".to_string())));
            assert_eq!(done, Some(true));
        }
        other => panic!("expected an rpc frame, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_method_yields_an_rpc_error_frame() {
    let agent = common::test_agent("echo-agent-2", CallableRegistry::new(), TaskMethodRegistry::new()).await;
    let (connection_id, mut rx) = agent.accept_connection().await.unwrap();
    drain_on_connect_frames(&mut rx).await;

    agent.handle_inbound(connection_id, r#"{"type":"rpc","id":"9","method":"ghost","args":[]}"#).await;

    let frame = rx.recv().await.expect("rpc error frame");
    match frame {
        OutboundFrame::Rpc { success, error, .. } => {
            assert!(!success);
            assert!(error.is_some());
        }
        other => panic!("expected an rpc frame, got {other:?}"),
    }
}

#[tokio::test]
async fn streaming_rpc_emits_chunks_before_the_final_frame() {
    let mut callables = CallableRegistry::new();
    callables.register(HandlerRegistration::streaming("count", |stream, args: Vec<Value>| {
        Box::pin(async move {
            let n = args.first().and_then(Value::as_u64).unwrap_or(0);
            for i in 1..=n {
                stream.send(json!(i));
            }
            Ok(json!({ "total": n }))
        })
    }));

    let agent = common::test_agent("streaming-agent", callables, TaskMethodRegistry::new()).await;
    let (connection_id, mut rx) = agent.accept_connection().await.unwrap();
    drain_on_connect_frames(&mut rx).await;

    agent.handle_inbound(connection_id, r#"{"type":"rpc","id":"2","method":"count","args":[3]}"#).await;

    let mut dones = Vec::new();
    for _ in 0..4 {
        match rx.recv().await.expect("a streamed frame") {
            OutboundFrame::Rpc { done, .. } => dones.push(done),
            other => panic!("expected an rpc frame, got {other:?}"),
        }
    }

    assert_eq!(dones, vec![Some(false), Some(false), Some(false), Some(true)]);
}
