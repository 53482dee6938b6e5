use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::context::CallContext;
use crate::error::RpcError;

/// Errors a callable may return
#[derive(Debug, Error)]
pub enum MethodError {
    /// A protocol error with its own code, forwarded to the client
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The callable was handed the wrong number of arguments
    #[error("expected {expected} arguments, received {received}")]
    ArgumentCount { expected: usize, received: usize },
    /// Anything else; reported as an internal error unless an [`RpcError`]
    /// is found in its source chain
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl MethodError {
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        MethodError::Internal(error.into())
    }
}

/// A registered callable
#[async_trait]
pub trait RpcMethod: Send + Sync {
    /// Invoke with arguments already bound to the method's descriptors, in
    /// declaration order
    async fn call(&self, args: Args, ctx: &CallContext<'_>) -> Result<Value, MethodError>;
}

/// Bound arguments of one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }

    /// Deserialize argument `index` into `T`
    pub fn parse<T: DeserializeOwned>(&self, index: usize) -> Result<T, MethodError> {
        let value = self.0.get(index).ok_or(MethodError::ArgumentCount {
            expected: index + 1,
            received: self.0.len(),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            MethodError::Rpc(RpcError::invalid_params(&format!("argument {}: {}", index, e)))
        })
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Adapter for synchronous closures
pub struct FnMethod<F>(F);

/// Wrap a synchronous closure as an [`RpcMethod`]
pub fn method_fn<F>(f: F) -> FnMethod<F>
where
    F: Fn(Args, &CallContext<'_>) -> Result<Value, MethodError> + Send + Sync,
{
    FnMethod(f)
}

#[async_trait]
impl<F> RpcMethod for FnMethod<F>
where
    F: Fn(Args, &CallContext<'_>) -> Result<Value, MethodError> + Send + Sync,
{
    async fn call(&self, args: Args, ctx: &CallContext<'_>) -> Result<Value, MethodError> {
        (self.0)(args, ctx)
    }
}

/// Adapter for closures returning a future; the future does not see the
/// call context
pub struct AsyncFnMethod<F>(F);

/// Wrap an async closure as an [`RpcMethod`]
pub fn async_method_fn<F, Fut>(f: F) -> AsyncFnMethod<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
{
    AsyncFnMethod(f)
}

#[async_trait]
impl<F, Fut> RpcMethod for AsyncFnMethod<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
{
    async fn call(&self, args: Args, _ctx: &CallContext<'_>) -> Result<Value, MethodError> {
        (self.0)(args).await
    }
}
