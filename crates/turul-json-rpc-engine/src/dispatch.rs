//! # Dispatcher
//!
//! Resolves a parsed [`Request`] against a [`Registry`], binds its parameters,
//! invokes the callable and turns every outcome (success, coded error, plain
//! error, panic, hook failure) into a [`JsonRpcMessage`]. Nothing escapes as a
//! panic or `Err`.
//!
//! Calls carry no timeout: a callable that never completes holds its worker
//! for as long as it runs.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::ValueCodec;
use crate::context::{CallContext, SessionContext};
use crate::error::RpcError;
use crate::extract::bind_parameters;
use crate::method::{Args, MethodError};
use crate::registry::{Hooks, Registry};
use crate::request::Request;
use crate::response::JsonRpcMessage;

/// Dispatch one request and build its response.
///
/// The call context (including the explicit error slot) lives exactly as long
/// as this future, so it is released on every exit path.
pub async fn dispatch(
    registry: &Registry,
    request: &Request<'_>,
    session: &SessionContext,
    codec: &dyn ValueCodec,
) -> JsonRpcMessage {
    let ctx = CallContext::new(session, request.method.as_ref(), request.id.clone());
    let hooks = registry.hooks();

    let message = match invoke(registry, &hooks, request, &ctx, codec).await {
        Ok(value) => JsonRpcMessage::success(request.id.clone(), value.into()),
        Err(error) => JsonRpcMessage::error(request.id.clone(), error),
    };
    let message = post_process(&hooks, message, &ctx);

    debug!(
        session_id = %registry.session_id(),
        method = %request.method,
        error = message.error_object().map(|e| e.code),
        "Dispatched request"
    );
    message
}

async fn invoke(
    registry: &Registry,
    hooks: &Hooks,
    request: &Request<'_>,
    ctx: &CallContext<'_>,
    codec: &dyn ValueCodec,
) -> Result<Value, RpcError> {
    if let Some(pre_process) = &hooks.pre_process {
        match catch_unwind(AssertUnwindSafe(|| pre_process(request, ctx))) {
            Ok(Some(error)) => return Err(error),
            Ok(None) => {}
            Err(panic) => return Err(hook_panicked("pre-process", panic)),
        }
    }

    let binding = registry
        .resolve(&request.method)
        .ok_or_else(|| RpcError::method_not_found(&request.method))?;

    let args = bind_parameters(
        &request.document(),
        request.params,
        binding.parameters(),
        codec,
    )
    .map_err(|e| RpcError::invalid_params(&e.to_string()))?;

    let outcome = AssertUnwindSafe(binding.handler().call(Args::new(args), ctx))
        .catch_unwind()
        .await;

    if let Some(raised) = ctx.take_raised() {
        return Err(transform_error(hooks, raised, ctx));
    }

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(method_error(hooks, error, ctx)),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(method = %ctx.method(), panic = %message, "Method panicked");
            Err(RpcError::internal_error(Some(Value::String(message))))
        }
    }
}

fn method_error(hooks: &Hooks, error: MethodError, ctx: &CallContext<'_>) -> RpcError {
    match error {
        MethodError::Rpc(rpc) => transform_error(hooks, rpc, ctx),
        MethodError::ArgumentCount { expected, received } => RpcError::invalid_params(&format!(
            "expected {} parameters, received {}",
            expected, received
        )),
        MethodError::Internal(inner) => {
            let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&*inner);
            while let Some(err) = source {
                if let Some(rpc) = err.downcast_ref::<RpcError>() {
                    return transform_error(hooks, rpc.clone(), ctx);
                }
                source = err.source();
            }
            RpcError::internal_error(Some(Value::String(inner.to_string())))
        }
    }
}

fn transform_error(hooks: &Hooks, error: RpcError, ctx: &CallContext<'_>) -> RpcError {
    let Some(transform) = &hooks.error_transform else {
        return error;
    };
    catch_unwind(AssertUnwindSafe(|| transform(error, ctx)))
        .unwrap_or_else(|panic| hook_panicked("error-transform", panic))
}

fn post_process(hooks: &Hooks, message: JsonRpcMessage, ctx: &CallContext<'_>) -> JsonRpcMessage {
    let Some(post_process) = &hooks.post_process else {
        return message;
    };
    match catch_unwind(AssertUnwindSafe(|| post_process(&message, ctx))) {
        Ok(None) => message,
        Ok(Some(error)) => JsonRpcMessage::error(message.id().cloned(), error),
        Err(panic) => JsonRpcMessage::error(message.id().cloned(), hook_panicked("post-process", panic)),
    }
}

fn hook_panicked(hook: &str, panic: Box<dyn Any + Send>) -> RpcError {
    let message = panic_message(panic.as_ref());
    warn!(hook = %hook, panic = %message, "Hook panicked");
    RpcError::internal_error(Some(Value::String(format!("{} hook failed: {}", hook, message))))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonCodec, ParamType};
    use crate::extract::Document;
    use crate::method::method_fn;
    use crate::registry::ParamDescriptor;
    use crate::scanner::{ScanMode, Token, scan};
    use crate::types::RequestId;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn run(registry: &Registry, src: &str) -> JsonRpcMessage {
        let mut tokens = vec![Token::EMPTY; 64];
        let count = scan(src, &mut tokens, ScanMode::Strict).unwrap();
        let doc = Document::new(src, &tokens[..count]);
        let request = Request::parse(doc, 0).unwrap();
        dispatch(registry, &request, &SessionContext::new("test"), &JsonCodec).await
    }

    fn calculator() -> Registry {
        let registry = Registry::new("test");
        registry
            .register(
                "add",
                vec![
                    ParamDescriptor::required("a", ParamType::Integer),
                    ParamDescriptor::required("b", ParamType::Integer),
                ],
                vec![],
                method_fn(|args, _| Ok(json!(args.parse::<i64>(0)? + args.parse::<i64>(1)?))),
            )
            .unwrap();
        registry
            .register(
                "greet",
                vec![ParamDescriptor::required("name", ParamType::String)],
                vec![],
                method_fn(|args, _| Ok(json!(format!("Hello {}", args.parse::<String>(0)?)))),
            )
            .unwrap();
        registry
    }

    fn code(message: &JsonRpcMessage) -> Option<i64> {
        message.error_object().map(|e| e.code)
    }

    #[tokio::test]
    async fn test_positional_success() {
        let registry = calculator();
        let message = run(&registry, r#"{"method":"add","params":[1,2],"id":1}"#).await;
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"jsonrpc":"2.0","result":3,"id":1}"#
        );
    }

    #[tokio::test]
    async fn test_named_success_and_missing() {
        let registry = calculator();
        let message = run(&registry, r#"{"method":"greet","params":{"name":"Al"},"id":"x"}"#).await;
        assert_eq!(message.result().and_then(|r| r.as_value()), Some(&json!("Hello Al")));
        assert_eq!(message.id(), Some(&RequestId::from("x")));

        let message = run(&registry, r#"{"method":"greet","params":{},"id":1}"#).await;
        let error = message.error_object().unwrap();
        assert_eq!(error.code, -32602);
        assert!(error.message.contains("'name'"));
    }

    #[tokio::test]
    async fn test_method_not_found_any_params_shape() {
        let registry = calculator();
        for src in [
            r#"{"method":"nope","id":1}"#,
            r#"{"method":"nope","params":[1],"id":1}"#,
            r#"{"method":"nope","params":{"a":1},"id":1}"#,
            r#"{"method":"Add","params":[1,2],"id":1}"#,
        ] {
            assert_eq!(code(&run(&registry, src).await), Some(-32601));
        }
    }

    #[tokio::test]
    async fn test_wrong_arity_and_types() {
        let registry = calculator();
        assert_eq!(code(&run(&registry, r#"{"method":"add","params":[1],"id":1}"#).await), Some(-32602));
        assert_eq!(code(&run(&registry, r#"{"method":"add","params":[1,2,3],"id":1}"#).await), Some(-32602));
        assert_eq!(code(&run(&registry, r#"{"method":"add","params":[1,"2"],"id":1}"#).await), Some(-32602));
        assert_eq!(
            code(&run(&registry, r#"{"method":"add","params":{"a":1,"b":2,"c":3},"id":1}"#).await),
            Some(-32602)
        );
    }

    #[tokio::test]
    async fn test_raised_error_wins_over_return_value() {
        let registry = Registry::new("test");
        registry
            .register(
                "fail",
                vec![],
                vec![],
                method_fn(|_, ctx| {
                    ctx.raise(RpcError::application(-7, "explicit"));
                    Ok(json!("ignored"))
                }),
            )
            .unwrap();
        let message = run(&registry, r#"{"method":"fail","id":1}"#).await;
        let error = message.error_object().unwrap();
        assert_eq!((error.code, error.message.as_str()), (-7, "explicit"));
    }

    #[tokio::test]
    async fn test_error_mapping() {
        #[derive(Debug, thiserror::Error)]
        #[error("wrapped: {0}")]
        struct Wrapper(#[source] RpcError);

        let registry = Registry::new("test");
        registry
            .register_all([
                crate::registry::MethodBinding::new(
                    "coded",
                    method_fn(|_, _| Err(RpcError::application(42, "coded").into())),
                ),
                crate::registry::MethodBinding::new(
                    "plain",
                    method_fn(|_, _| Err(MethodError::internal("disk on fire"))),
                ),
                crate::registry::MethodBinding::new(
                    "wrapped",
                    method_fn(|_, _| {
                        Err(MethodError::internal(Wrapper(RpcError::application(9, "inner"))))
                    }),
                ),
                crate::registry::MethodBinding::new(
                    "arity",
                    method_fn(|_, _| Err(MethodError::ArgumentCount { expected: 2, received: 1 })),
                ),
                crate::registry::MethodBinding::new(
                    "panics",
                    method_fn(|_, _| panic!("kaboom")),
                ),
            ])
            .unwrap();

        assert_eq!(code(&run(&registry, r#"{"method":"coded","id":1}"#).await), Some(42));

        let plain = run(&registry, r#"{"method":"plain","id":1}"#).await;
        let error = plain.error_object().unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.data, Some(json!("disk on fire")));

        assert_eq!(code(&run(&registry, r#"{"method":"wrapped","id":1}"#).await), Some(9));
        assert_eq!(code(&run(&registry, r#"{"method":"arity","id":1}"#).await), Some(-32602));

        let panicked = run(&registry, r#"{"method":"panics","id":1}"#).await;
        let error = panicked.error_object().unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.data, Some(json!("kaboom")));
    }

    #[tokio::test]
    async fn test_pre_hook_short_circuits_but_post_hook_runs() {
        let registry = calculator();
        let post_calls = Arc::new(AtomicUsize::new(0));
        registry.set_pre_process_hook(|request, _| {
            (request.method == "add").then(|| RpcError::application(-1, "denied"))
        });
        let counter = Arc::clone(&post_calls);
        registry.set_post_process_hook(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        });

        let message = run(&registry, r#"{"method":"add","params":[1,2],"id":1}"#).await;
        assert_eq!(code(&message), Some(-1));
        let message = run(&registry, r#"{"method":"greet","params":["x"],"id":2}"#).await;
        assert!(!message.is_error());
        assert_eq!(post_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_post_hook_substitutes_error() {
        let registry = calculator();
        registry.set_post_process_hook(|message, _| {
            message.is_error().then(|| RpcError::application(-100, "masked"))
        });
        let message = run(&registry, r#"{"method":"missing","id":5}"#).await;
        assert_eq!(code(&message), Some(-100));
        assert_eq!(message.id(), Some(&RequestId::from(5)));

        let message = run(&registry, r#"{"method":"add","params":[2,2],"id":6}"#).await;
        assert!(!message.is_error());
    }

    #[tokio::test]
    async fn test_panicking_hooks_become_internal_errors() {
        let registry = calculator();
        registry.set_post_process_hook(|_, _| panic!("post hook bug"));
        let message = run(&registry, r#"{"method":"add","params":[1,2],"id":1}"#).await;
        assert_eq!(code(&message), Some(-32603));
        assert_eq!(message.id(), Some(&RequestId::from(1)));

        registry.clear_hooks();
        registry.set_pre_process_hook(|_, _| panic!("pre hook bug"));
        let message = run(&registry, r#"{"method":"add","params":[1,2],"id":1}"#).await;
        assert_eq!(code(&message), Some(-32603));
    }

    #[tokio::test]
    async fn test_panicking_error_transform_becomes_internal_error() {
        let registry = Registry::new("test");
        registry
            .register(
                "coded",
                vec![],
                vec![],
                method_fn(|_, _| Err(RpcError::application(7, "coded").into())),
            )
            .unwrap();
        registry.set_error_transform(|_, _| panic!("transform bug"));

        let message = run(&registry, r#"{"method":"coded","id":"t1"}"#).await;
        let error = message.error_object().unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.data, Some(json!("error-transform hook failed: transform bug")));
        assert_eq!(message.id(), Some(&RequestId::from("t1")));
    }

    #[tokio::test]
    async fn test_error_transform_applies_to_coded_errors() {
        let registry = Registry::new("test");
        registry
            .register(
                "coded",
                vec![],
                vec![],
                method_fn(|_, _| Err(RpcError::application(1, "raw").into())),
            )
            .unwrap();
        registry.set_error_transform(|mut error, ctx| {
            error.message = format!("{} in {}", error.message, ctx.method());
            error
        });

        let message = run(&registry, r#"{"method":"coded","id":1}"#).await;
        assert_eq!(message.error_object().unwrap().message, "raw in coded");

        // protocol errors are not rewritten
        let message = run(&registry, r#"{"method":"other","id":1}"#).await;
        assert_eq!(message.error_object().unwrap().message, "Method not found");
    }

    #[tokio::test]
    async fn test_context_visible_to_callable() {
        let registry = Registry::new("test");
        registry
            .register(
                "whoami",
                vec![],
                vec![],
                method_fn(|_, ctx| Ok(json!([ctx.session_id(), ctx.method(), ctx.request_id()]))),
            )
            .unwrap();
        let message = run(&registry, r#"{"method":"whoami","id":9}"#).await;
        assert_eq!(
            message.result().and_then(|r| r.as_value()),
            Some(&json!(["test", "whoami", 9]))
        );
    }
}
