//! Simple Calculator JSON-RPC Example
//!
//! Registers a small calculator service on the default session and feeds the
//! engine single requests, a batch with a notification, and a few malformed
//! inputs.

use serde_json::json;
use turul_json_rpc_engine::prelude::*;

struct Calculator;

impl RpcService for Calculator {
    fn bindings(&self) -> Vec<MethodBinding> {
        vec![
            MethodBinding::new(
                "add",
                method_fn(|args, _| Ok(json!(args.parse::<f64>(0)? + args.parse::<f64>(1)?))),
            )
            .params([
                ParamDescriptor::required("a", ParamType::Number),
                ParamDescriptor::required("b", ParamType::Number),
            ])
            .returns(ParamType::Number),
            MethodBinding::new(
                "subtract",
                method_fn(|args, _| Ok(json!(args.parse::<f64>(0)? - args.parse::<f64>(1)?))),
            )
            .params([
                ParamDescriptor::required("a", ParamType::Number),
                ParamDescriptor::optional("b", ParamType::Number, json!(1)),
            ])
            .returns(ParamType::Number),
            MethodBinding::new(
                "divide",
                method_fn(|args, ctx| {
                    let b = args.parse::<f64>(1)?;
                    if b == 0.0 {
                        ctx.raise(RpcError::application(1001, "Division by zero"));
                        return Ok(serde_json::Value::Null);
                    }
                    Ok(json!(args.parse::<f64>(0)? / b))
                }),
            )
            .params([
                ParamDescriptor::required("a", ParamType::Number),
                ParamDescriptor::required("b", ParamType::Number),
            ])
            .returns(ParamType::Number),
            MethodBinding::new(
                "log",
                method_fn(|args, ctx| {
                    println!("[{}] {}", ctx.session_id(), args.parse::<String>(0)?);
                    Ok(serde_json::Value::Null)
                }),
            )
            .param(ParamDescriptor::required("message", ParamType::String)),
        ]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let engine = JsonRpcEngine::new();
    engine.default_registry().register_service(&Calculator)?;

    println!("Registered methods: {:?}", engine.default_registry().method_names());

    let inputs = [
        r#"{"jsonrpc":"2.0","method":"add","params":[5,3],"id":1}"#,
        r#"{"jsonrpc":"2.0","method":"subtract","params":{"a":10},"id":2}"#,
        r#"{"jsonrpc":"2.0","method":"divide","params":[1,0],"id":3}"#,
        r#"{"jsonrpc":"2.0","method":"multiply","params":[2,2],"id":4}"#,
        r#"[{"jsonrpc":"2.0","method":"log","params":["batch started"]},
            {"jsonrpc":"2.0","method":"add","params":[1,2],"id":5},
            {"jsonrpc":"2.0","method":"add","params":{"a":1},"id":6}]"#,
        r#"{"jsonrpc":"2.0","method":"log","params":["fire and forget"]}"#,
        r#"[]"#,
        r#"{not json"#,
    ];

    for input in inputs {
        let output = engine.process_default(input).await;
        println!("--> {}", input.split_whitespace().collect::<Vec<_>>().join(" "));
        if output.is_empty() {
            println!("<-- (no response)");
        } else {
            println!("<-- {}", output);
        }
    }

    Ok(())
}
