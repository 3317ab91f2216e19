//! End-to-end coverage of spec §8's task scenarios against a live `Agent`:
//! deadline enforcement and the `cf_agent_task_update` broadcast a
//! connected client observes as a task runs to completion.

mod common;

use serde_json::Value;
use statefield::core::callable::CallableRegistry;
use statefield::core::rpc::OutboundFrame;
use statefield::core::task_tracker::TaskMethodRegistry;
use statefield::domain::models::TaskStatus;

#[tokio::test]
async fn a_task_past_its_deadline_is_aborted() {
    let mut methods = TaskMethodRegistry::new();
    methods.register("slow", |_input, _ctx| {
        Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(Value::Null)
        })
    });

    let agent = common::test_agent("deadline-agent", CallableRegistry::new(), methods).await;
    let id = agent.tasks.run("slow", Value::Null, Some(10), 0).await.unwrap();

    let task = agent.tasks.get(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Aborted);
    assert_eq!(task.error.as_deref(), Some("Task timed out"));
}

#[tokio::test]
async fn a_connected_client_observes_task_updates_as_the_task_runs() {
    let mut methods = TaskMethodRegistry::new();
    methods.register("greet", |input, _ctx| {
        Box::pin(async move {
            let name = input.as_str().unwrap_or("world").to_string();
            Ok(Value::String(format!("hello, {name}")))
        })
    });

    let agent = common::test_agent("task-broadcast-agent", CallableRegistry::new(), methods).await;
    let (_connection_id, mut rx) = agent.accept_connection().await.unwrap();

    // onConnect: state frame, then mcp-servers frame.
    let _ = rx.recv().await;
    let _ = rx.recv().await;

    let id = agent.tasks.run("greet", Value::String("ferris".into()), None, 0).await.unwrap();

    let mut saw_completed = false;
    while let Ok(Some(frame)) = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await {
        if let OutboundFrame::TaskUpdate { task_id, task: Some(view) } = frame {
            if task_id == id && view["status"] == "completed" {
                assert_eq!(view["result"], Value::String("hello, ferris".to_string()));
                saw_completed = true;
                break;
            }
        }
    }

    assert!(saw_completed, "expected a completed cf_agent_task_update frame");
}
