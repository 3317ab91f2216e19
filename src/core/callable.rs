//! Callable method registry (spec §4.H, §9 "Callable decorator metadata").
//!
//! The source marks RPC-invocable methods with a decorator read via
//! reflection. Per §9 this becomes an explicit registry populated at
//! `Agent::new()` time: RPC dispatch is a `HashMap` lookup, never a
//! property probe.

use std::collections::HashMap;

use crate::core::rpc::Handler;
use crate::domain::errors::RpcError;

/// One method name's registered handler, built by the embedding
/// application and handed to `Agent::new`.
pub struct HandlerRegistration {
    pub method: String,
    pub handler: Handler,
}

impl HandlerRegistration {
    pub fn unary(
        method: impl Into<String>,
        f: impl Fn(Vec<serde_json::Value>) -> crate::core::rpc::BoxFuture<'static, Result<serde_json::Value, String>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self { method: method.into(), handler: Handler::Unary(std::sync::Arc::new(f)) }
    }

    pub fn streaming(
        method: impl Into<String>,
        f: impl Fn(
                crate::core::rpc::StreamingResponse,
                Vec<serde_json::Value>,
            ) -> crate::core::rpc::BoxFuture<'static, Result<serde_json::Value, String>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self { method: method.into(), handler: Handler::Streaming(std::sync::Arc::new(f)) }
    }
}

/// A table of `(method name) -> Handler`, built once and consulted on
/// every `rpc` frame.
#[derive(Default)]
pub struct CallableRegistry {
    handlers: HashMap<String, Handler>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_registrations(registrations: Vec<HandlerRegistration>) -> Self {
        let mut registry = Self::new();
        for reg in registrations {
            registry.register(reg);
        }
        registry
    }

    pub fn register(&mut self, registration: HandlerRegistration) {
        self.handlers.insert(registration.method, registration.handler);
    }

    pub fn get(&self, method: &str) -> Result<&Handler, RpcError> {
        self.handlers.get(method).ok_or_else(|| RpcError::NotCallable(method.to_string()))
    }

    pub fn is_callable(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn unknown_method_is_not_callable() {
        let registry = CallableRegistry::new();
        assert!(registry.get("ghost").is_err());
    }

    #[tokio::test]
    async fn registered_unary_method_dispatches() {
        let mut registry = CallableRegistry::new();
        registry.register(HandlerRegistration::unary("echo", |args: Vec<Value>| {
            Box::pin(async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) })
        }));

        let handler = registry.get("echo").unwrap();
        match handler {
            Handler::Unary(f) => {
                let result = f(vec![json!("hi")]).await.unwrap();
                assert_eq!(result, json!("hi"));
            }
            Handler::Streaming(_) => panic!("expected unary"),
        }
    }
}
