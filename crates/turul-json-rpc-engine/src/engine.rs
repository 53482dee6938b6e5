//! # Batch Engine
//!
//! Top-level entry point. Takes raw request text for a session and returns the
//! response body, applying the JSON-RPC batch rules:
//!
//! - a hard parse failure yields one `-32700` response with a null id
//! - an empty batch yields one error response (code `3200`)
//! - successful notifications contribute nothing to the output
//! - a batch with exactly one entry is answered with a bare object
//! - when every response was suppressed the body is the empty string, not `[]`
//!
//! Entries of a batch are dispatched one after another, in order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::{JsonCodec, ValueCodec};
use crate::context::SessionContext;
use crate::dispatch::{dispatch, panic_message};
use crate::error::RpcError;
use crate::extract::Document;
use crate::registry::Registry;
use crate::request::Request;
use crate::response::JsonRpcMessage;
use crate::scanner::{ScanError, ScanMode, Token, scan};
use crate::session::{DEFAULT_SESSION_ID, SessionStore};

/// Code of the error returned for `[]`
pub const EMPTY_BATCH_CODE: i64 = 3200;
const EMPTY_BATCH_MESSAGE: &str = "Invalid Request: batch was empty.";

/// Sent when a response cannot be encoded
const ENCODE_FAILURE: &str =
    r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scanner strictness
    pub scan_mode: ScanMode,
    /// Token slots allocated for the first scan attempt
    pub initial_token_capacity: usize,
    /// Largest token buffer the engine will grow to
    pub max_token_capacity: usize,
    /// Session used by [`JsonRpcEngine::process_default`]
    pub default_session_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_mode: ScanMode::Strict,
            initial_token_capacity: 64,
            max_token_capacity: 1 << 20,
            default_session_id: DEFAULT_SESSION_ID.to_string(),
        }
    }
}

/// Session-aware JSON-RPC engine; clones share the session store
#[derive(Clone)]
pub struct JsonRpcEngine {
    store: SessionStore,
    codec: Arc<dyn ValueCodec>,
    config: Arc<EngineConfig>,
}

impl Default for JsonRpcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcEngine {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> JsonRpcEngineBuilder {
        JsonRpcEngineBuilder::new()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry of `session_id`, created on first use
    pub fn registry(&self, session_id: &str) -> Arc<Registry> {
        self.store.get_or_create(session_id)
    }

    pub fn default_registry(&self) -> Arc<Registry> {
        self.registry(&self.config.default_session_id)
    }

    /// Drop a session and all of its bindings
    pub fn destroy_session(&self, session_id: &str) -> bool {
        self.store.destroy(session_id)
    }

    /// Process request text against the default session
    pub async fn process_default(&self, text: &str) -> String {
        let session_id = self.config.default_session_id.clone();
        self.process(&session_id, text).await
    }

    /// Process request text for a session with an empty caller context
    pub async fn process(&self, session_id: &str, text: &str) -> String {
        self.process_with_context(session_id, text, SessionContext::new(session_id))
            .await
    }

    /// Process request text, exposing `context` to hooks and callables.
    ///
    /// Never fails: every problem is reported as error-shaped JSON in the
    /// returned body.
    pub async fn process_with_context(
        &self,
        session_id: &str,
        text: &str,
        context: SessionContext,
    ) -> String {
        let registry = self.store.resolve(session_id);
        let is_batch = text.trim_start().starts_with('[');

        let tokens = match self.scan(text) {
            Ok(tokens) => tokens,
            Err(e) => return self.parse_failure(&registry, text, e.to_string()),
        };
        let doc = Document::new(text, &tokens);
        if doc.is_empty() {
            return self.parse_failure(&registry, text, "empty document".to_string());
        }
        if doc.next_sibling(0) != doc.len() {
            return self.parse_failure(&registry, text, "unexpected content after the first value".to_string());
        }

        let entries: Vec<usize> = if is_batch {
            doc.children(0).collect()
        } else {
            vec![0]
        };
        if entries.is_empty() {
            debug!(session_id = %session_id, "Rejected empty batch");
            let error = RpcError::application(EMPTY_BATCH_CODE, EMPTY_BATCH_MESSAGE);
            return self.encode(&JsonRpcMessage::error(None, error));
        }

        let mut responses = Vec::with_capacity(entries.len());
        for &entry in &entries {
            let message = match Request::parse(doc, entry) {
                Ok(request) => {
                    let message =
                        dispatch(&registry, &request, &context, self.codec.as_ref()).await;
                    if request.is_notification() && !message.is_error() {
                        continue;
                    }
                    message
                }
                Err(error) => error.into(),
            };
            responses.push(self.encode(&message));
        }

        debug!(
            session_id = %session_id,
            requests = entries.len(),
            responses = responses.len(),
            "Processed request text"
        );

        match responses.len() {
            0 => String::new(),
            1 if entries.len() == 1 => responses.swap_remove(0),
            _ => format!("[{}]", responses.join(",")),
        }
    }

    /// Scan `text`, doubling the token buffer until it fits or the
    /// configured ceiling is reached
    fn scan(&self, text: &str) -> Result<Vec<Token>, ScanError> {
        let max = self.config.max_token_capacity.max(1);
        let mut capacity = self.config.initial_token_capacity.clamp(1, max);
        loop {
            let mut tokens = vec![Token::EMPTY; capacity];
            match scan(text, &mut tokens, self.config.scan_mode) {
                Ok(count) => {
                    tokens.truncate(count);
                    return Ok(tokens);
                }
                Err(ScanError::OutOfTokenSlots) if capacity < max => {
                    capacity = capacity.saturating_mul(2).min(max);
                    debug!(capacity, "Growing token buffer");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn parse_failure(&self, registry: &Registry, text: &str, reason: String) -> String {
        debug!(session_id = %registry.session_id(), reason = %reason, "Parse error");
        let mut error = RpcError::parse_error(Some(Value::String(reason)));
        if let Some(hook) = &registry.hooks().parse_error {
            error = catch_unwind(AssertUnwindSafe(|| hook(text, error))).unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                warn!(hook = "parse-error", panic = %message, "Hook panicked");
                RpcError::internal_error(Some(Value::String(format!(
                    "parse-error hook failed: {}",
                    message
                ))))
            });
        }
        self.encode(&JsonRpcMessage::error(None, error))
    }

    fn encode(&self, message: &JsonRpcMessage) -> String {
        match self.codec.encode(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode response");
                ENCODE_FAILURE.to_string()
            }
        }
    }
}

impl std::fmt::Debug for JsonRpcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcEngine")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`JsonRpcEngine`]
pub struct JsonRpcEngineBuilder {
    config: EngineConfig,
    codec: Arc<dyn ValueCodec>,
    store: Option<SessionStore>,
}

impl Default for JsonRpcEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            codec: Arc::new(JsonCodec),
            store: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scan_mode(mut self, mode: ScanMode) -> Self {
        self.config.scan_mode = mode;
        self
    }

    pub fn initial_token_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_token_capacity = capacity;
        self
    }

    pub fn max_token_capacity(mut self, capacity: usize) -> Self {
        self.config.max_token_capacity = capacity;
        self
    }

    pub fn default_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.config.default_session_id = session_id.into();
        self
    }

    /// Replace the `serde_json` codec
    pub fn codec<C: ValueCodec + 'static>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Share an existing session store instead of creating a new one
    pub fn session_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> JsonRpcEngine {
        JsonRpcEngine {
            store: self.store.unwrap_or_default(),
            codec: self.codec,
            config: Arc::new(self.config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, ParamType};
    use crate::method::method_fn;
    use crate::registry::ParamDescriptor;
    use serde_json::json;

    fn engine() -> JsonRpcEngine {
        let engine = JsonRpcEngine::new();
        engine
            .default_registry()
            .register(
                "echo",
                vec![ParamDescriptor::required("s", ParamType::Any)],
                vec![],
                method_fn(|args, _| Ok(args.get(0).cloned().unwrap_or(Value::Null))),
            )
            .unwrap();
        engine
    }

    fn parse(body: &str) -> Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_single_request() {
        let body = engine()
            .process_default(r#"{"jsonrpc":"2.0","method":"echo","params":["hi"],"id":1}"#)
            .await;
        assert_eq!(body, r#"{"jsonrpc":"2.0","result":"hi","id":1}"#);
    }

    #[tokio::test]
    async fn test_single_notification_is_empty() {
        let body = engine().process_default(r#"{"method":"echo","params":["hi"]}"#).await;
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn test_batch_shapes() {
        let engine = engine();

        let one = engine.process_default(r#"[{"method":"echo","params":[1],"id":7}]"#).await;
        assert!(one.starts_with('{'));
        assert_eq!(parse(&one)["id"], json!(7));

        let two = engine
            .process_default(r#"[{"method":"echo","params":[1],"id":1},{"method":"echo","params":[2],"id":2}]"#)
            .await;
        assert!(two.starts_with('[') && two.ends_with(']'));
        let values = parse(&two);
        assert_eq!(values[0]["result"], json!(1));
        assert_eq!(values[1]["result"], json!(2));
    }

    #[tokio::test]
    async fn test_batch_suppresses_notifications() {
        let engine = engine();
        let body = engine
            .process_default(
                r#"[{"method":"echo","params":[1]},{"method":"echo","params":[2],"id":2},{"method":"echo","params":[3]}]"#,
            )
            .await;
        let values = parse(&body);
        assert_eq!(values.as_array().map(Vec::len), Some(1));
        assert_eq!(values[0]["id"], json!(2));

        let body = engine
            .process_default(r#"[{"method":"echo","params":[1]},{"method":"echo","params":[2]}]"#)
            .await;
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn test_failed_notification_is_reported() {
        let body = engine().process_default(r#"{"method":"missing"}"#).await;
        let value = parse(&body);
        assert_eq!(value["error"]["code"], json!(-32601));
        assert_eq!(value["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let body = engine().process_default("  [ ]").await;
        assert_eq!(
            body,
            r#"{"jsonrpc":"2.0","error":{"code":3200,"message":"Invalid Request: batch was empty."},"id":null}"#
        );
    }

    #[tokio::test]
    async fn test_parse_errors() {
        let engine = engine();
        for text in ["{not json", "", "   ", r#"{"method":"echo"} {}"#, r#"[{"method":"echo","id":1}"#] {
            let value = parse(&engine.process_default(text).await);
            assert_eq!(value["error"]["code"], json!(-32700), "input {:?}", text);
            assert_eq!(value["id"], Value::Null);
        }
    }

    #[tokio::test]
    async fn test_invalid_entries_in_batch() {
        let body = engine()
            .process_default(r#"[1,{"id":2},{"method":"echo","params":["x"],"id":3}]"#)
            .await;
        let values = parse(&body);
        assert_eq!(values[0]["error"]["code"], json!(-32600));
        assert_eq!(values[1]["error"]["code"], json!(-32600));
        assert_eq!(values[1]["id"], json!(2));
        assert_eq!(values[2]["result"], json!("x"));
    }

    #[tokio::test]
    async fn test_parse_error_hook() {
        let engine = engine();
        engine.default_registry().set_parse_error_hook(|text, mut error| {
            error.data = Some(json!(text.len()));
            error
        });
        let value = parse(&engine.process_default("{oops").await);
        assert_eq!(value["error"]["code"], json!(-32700));
        assert_eq!(value["error"]["data"], json!(5));
    }

    #[tokio::test]
    async fn test_panicking_parse_error_hook() {
        let engine = engine();
        engine
            .default_registry()
            .set_parse_error_hook(|_, _| panic!("parse hook bug"));
        let value = parse(&engine.process_default("{bad").await);
        assert_eq!(value["error"]["code"], json!(-32603));
        assert_eq!(value["error"]["data"], json!("parse-error hook failed: parse hook bug"));
        assert_eq!(value["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_misplaced_separators_are_parse_errors() {
        let engine = engine();
        for text in [
            r#"[{"method":"echo","params":["a"],"id":1} {"method":"echo","params":["b"],"id":2}]"#,
            r#"{"method":"echo","params":["a"],"id":1,}"#,
            r#"{,"method":"echo","params":[,"a"],"id":1}"#,
            r#"{"method":"echo","params":["a"],,"id":1}"#,
            r#"{"method":"echo","params":[1-2],"id":1}"#,
        ] {
            let value = parse(&engine.process_default(text).await);
            assert_eq!(value["error"]["code"], json!(-32700), "input {}", text);
            assert_eq!(value["id"], Value::Null);
        }
    }

    #[tokio::test]
    async fn test_malformed_numeric_id_is_a_parse_error() {
        let value = parse(
            &engine()
                .process_default(r#"{"method":"echo","params":["a"],"id":1-2}"#)
                .await,
        );
        assert_eq!(value["error"]["code"], json!(-32700));
        assert_eq!(value["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_token_buffer_grows() {
        let engine = JsonRpcEngine::builder()
            .initial_token_capacity(2)
            .build();
        engine
            .default_registry()
            .register(
                "sum",
                vec![ParamDescriptor::required("values", ParamType::Array)],
                vec![],
                method_fn(|args, _| Ok(json!(args.parse::<Vec<i64>>(0)?.iter().sum::<i64>()))),
            )
            .unwrap();
        let values: Vec<i64> = (1..=100).collect();
        let text = json!({"method": "sum", "params": [values], "id": 1}).to_string();
        let value = parse(&engine.process_default(&text).await);
        assert_eq!(value["result"], json!(5050));
    }

    #[tokio::test]
    async fn test_token_ceiling_is_a_parse_error() {
        let engine = JsonRpcEngine::builder()
            .initial_token_capacity(2)
            .max_token_capacity(4)
            .build();
        let value = parse(&engine.process_default(r#"{"method":"x","params":[1,2,3],"id":1}"#).await);
        assert_eq!(value["error"]["code"], json!(-32700));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let engine = engine();
        let body = engine.process("other", r#"{"method":"echo","params":[1],"id":1}"#).await;
        assert_eq!(parse(&body)["error"]["code"], json!(-32601));
        assert_eq!(engine.store().session_ids(), vec!["default", "other"]);
    }

    #[tokio::test]
    async fn test_encode_failure_falls_back() {
        struct BrokenCodec;

        impl ValueCodec for BrokenCodec {
            fn decode(&self, raw: &str, ty: &ParamType) -> Result<Value, CodecError> {
                JsonCodec.decode(raw, ty)
            }

            fn encode(&self, _message: &JsonRpcMessage) -> Result<String, CodecError> {
                Err(CodecError::TypeMismatch {
                    expected: ParamType::Object,
                    found: "nothing",
                })
            }
        }

        let engine = JsonRpcEngine::builder().codec(BrokenCodec).build();
        let body = engine.process_default("{bad").await;
        assert_eq!(body, ENCODE_FAILURE);
    }
}
