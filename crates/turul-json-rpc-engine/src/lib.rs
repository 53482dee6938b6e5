//! # JSON-RPC 2.0 Engine
//!
//! A transport-agnostic, session-scoped JSON-RPC 2.0 engine. Raw request text
//! goes in, the response body comes out.
//!
//! ## Features
//! - Single-pass token scanner; requests are read in place without building a
//!   document tree
//! - Positional and named parameter binding with trailing defaults
//! - Per-session method registries with lock-free reads on the dispatch path
//! - Batch processing with notification suppression
//! - Pre/post-process, error-transform and parse-error hooks
//!
//! ```rust
//! use turul_json_rpc_engine::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), RegistrationError> {
//! let engine = JsonRpcEngine::new();
//! engine.default_registry().register(
//!     "add",
//!     vec![
//!         ParamDescriptor::required("a", ParamType::Integer),
//!         ParamDescriptor::required("b", ParamType::Integer),
//!     ],
//!     vec![],
//!     method_fn(|args, _| Ok(json!(args.parse::<i64>(0)? + args.parse::<i64>(1)?))),
//! )?;
//!
//! let body = engine
//!     .process_default(r#"{"jsonrpc":"2.0","method":"add","params":[1,2],"id":1}"#)
//!     .await;
//! assert_eq!(body, r#"{"jsonrpc":"2.0","result":3,"id":1}"#);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod extract;
pub mod method;
pub mod prelude;
pub mod registry;
pub mod request;
pub mod response;
pub mod scanner;
pub mod session;
pub mod types;

// Re-export main types
pub use codec::{CodecError, JsonCodec, ParamType, ValueCodec};
pub use context::{CallContext, SessionContext};
pub use dispatch::dispatch;
pub use engine::{EMPTY_BATCH_CODE, EngineConfig, JsonRpcEngine, JsonRpcEngineBuilder};
pub use error::{JsonRpcErrorCode, RpcError};
pub use extract::{BindError, Document, bind_parameters, first_top_level_field};
pub use method::{Args, MethodError, RpcMethod, async_method_fn, method_fn};
pub use registry::{MethodBinding, ParamDescriptor, Registry, RegistrationError, RpcService};
pub use request::{ParamsShape, Request};
pub use response::{JsonRpcErrorResponse, JsonRpcMessage, JsonRpcResponse, ResponseResult};
pub use scanner::{ScanError, ScanMode, Token, TokenKind, scan};
pub use session::{DEFAULT_SESSION_ID, SessionStore};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
