//! # JSON-RPC Engine Prelude
//!
//! Re-exports of the types needed to register methods and process requests.
//!
//! ```rust
//! use turul_json_rpc_engine::prelude::*;
//! ```

// Engine and sessions
pub use crate::engine::{EngineConfig, JsonRpcEngine, JsonRpcEngineBuilder};
pub use crate::session::{DEFAULT_SESSION_ID, SessionStore};

// Registration
pub use crate::codec::{JsonCodec, ParamType, ValueCodec};
pub use crate::context::{CallContext, SessionContext};
pub use crate::method::{Args, MethodError, RpcMethod, async_method_fn, method_fn};
pub use crate::registry::{MethodBinding, ParamDescriptor, Registry, RegistrationError, RpcService};

// Wire types
pub use crate::error::{JsonRpcErrorCode, RpcError};
pub use crate::response::{JsonRpcMessage, ResponseResult};
pub use crate::types::{JsonRpcVersion, RequestId};

// Standard error codes
pub use crate::error_codes::*;
