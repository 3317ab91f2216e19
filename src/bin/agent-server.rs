//! Reference harness: hosts one agent class ("example-agent") behind the
//! HTTP/WebSocket listener described in spec §6, wiring
//! [`ConfigLoader`]/[`LoggerImpl`] the way the teacher's own binaries do.
//!
//! The callables and task methods registered here are a minimal
//! demonstration of spec §8's scenarios (echo RPC, streaming RPC,
//! retry/backoff), not part of the library surface — a real embedding
//! application supplies its own [`AgentConfig`] via [`AgentFactory`].

use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use statefield::core::callable::{CallableRegistry, HandlerRegistration};
use statefield::core::agent::AgentConfig;
use statefield::core::rpc::StreamingResponse;
use statefield::core::task_tracker::{TaskContext, TaskMethodRegistry};
use statefield::infrastructure::config::ConfigLoader;
use statefield::infrastructure::logging::LoggerImpl;
use statefield::server::{AgentFactory, AgentRegistry, AgentServer, BoxFuture};
use statefield::adapters::sqlite::{all_embedded_migrations, create_pool, MigrationError, Migrator, PoolConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load().context("loading agent runtime configuration")?;
    let _logger = LoggerImpl::init(&config.logging).context("initializing logger")?;

    tracing::info!(prefix = %config.routing_prefix, "starting agent-server");

    let database_base = config.database.path.clone();
    let max_connections = config.database.max_connections;
    let mcp_servers = config.mcp_servers.clone();

    let factory: AgentFactory = Arc::new(move |name: String| -> BoxFuture<'static, statefield::AgentResult<AgentConfig>> {
        let database_base = database_base.clone();
        let mcp_servers = mcp_servers.clone();
        Box::pin(async move {
            let database_url = instance_database_url(&database_base, &name);
            let pool = build_instance_pool(&database_url, max_connections)
                .await
                .map_err(|e| statefield::AgentError::Config(e.to_string()))?;

            Ok(AgentConfig {
                name,
                pool,
                initial_state: Some(json!({})),
                rpc_callables: Arc::new(example_callables()),
                task_methods: Arc::new(example_task_methods()),
                workflow_runtime: None,
                mcp_servers: mcp_servers.clone(),
            })
        })
    });

    let registry = Arc::new(AgentRegistry::new("example-agent", factory));
    let server = AgentServer::new(registry, config.routing_prefix.clone(), config.listener.clone());

    server.serve_with_shutdown(shutdown_signal()).await
}

/// Gives each named instance its own SQLite file, inserting `-{name}`
/// before the file extension (or appending it, if there is none).
fn instance_database_url(base: &str, name: &str) -> String {
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{name}.{ext}"),
        _ => format!("{base}-{name}"),
    }
}

/// Opens a migrated pool honoring the configured `max_connections`, unlike
/// [`statefield::adapters::sqlite::initialize_database`] which always uses
/// the default [`PoolConfig`].
async fn build_instance_pool(database_url: &str, max_connections: u32) -> Result<sqlx::SqlitePool, MigrationError> {
    let pool_config = PoolConfig { max_connections, ..PoolConfig::default() };
    let pool = create_pool(database_url, Some(pool_config))
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: sqlx::Error::Configuration(e.to_string().into()) })?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// `echo(value) -> value` and a `count(n)` streaming method emitting
/// `1..=n` as intermediate chunks before a final total, matching spec §8
/// scenarios 1 and 2.
fn example_callables() -> CallableRegistry {
    let mut registry = CallableRegistry::new();

    registry.register(HandlerRegistration::unary("echo", |args: Vec<Value>| {
        Box::pin(async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) })
    }));

    registry.register(HandlerRegistration::streaming("count", |stream: StreamingResponse, args: Vec<Value>| {
        Box::pin(async move {
            let n = args.first().and_then(Value::as_u64).unwrap_or(0);
            for i in 1..=n {
                stream.send(json!(i));
            }
            Ok(json!({ "total": n }))
        })
    }));

    registry
}

/// `flaky-with-retries` fails its first two attempts then succeeds, and
/// `slow` sleeps past any caller-supplied timeout — demonstration fixtures
/// for the retry/backoff and deadline scenarios in spec §8.
fn example_task_methods() -> TaskMethodRegistry {
    use std::sync::atomic::{AtomicU32, Ordering};

    let mut registry = TaskMethodRegistry::new();
    let attempts = Arc::new(AtomicU32::new(0));

    registry.register("flaky-with-retries", move |_input: Value, ctx: TaskContext| {
        let attempts = attempts.clone();
        Box::pin(async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            ctx.set_progress(((attempt + 1) * 25).min(100) as u8).await;
            if attempt < 2 {
                return Err(format!("transient failure on attempt {attempt}"));
            }
            Ok(json!({ "succeededOnAttempt": attempt }))
        })
    });

    registry.register("slow", |_input: Value, _ctx: TaskContext| {
        Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(Value::Null)
        })
    });

    registry
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
