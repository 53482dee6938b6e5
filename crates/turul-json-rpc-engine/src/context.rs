use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::RpcError;
use crate::types::RequestId;

/// Host-supplied context for one `process` call, shared by every request in
/// a batch
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Session the request was routed to
    pub session_id: String,
    /// Transport metadata (headers, peer address, ...)
    pub metadata: HashMap<String, Value>,
    /// Opaque host object, retrieved with [`CallContext::extension`]
    pub extension: Option<Arc<dyn Any + Send + Sync>>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_extension<T: Any + Send + Sync>(mut self, extension: T) -> Self {
        self.extension = Some(Arc::new(extension));
        self
    }
}

/// Storage scoped to exactly one in-flight call.
///
/// A fresh `CallContext` is created for every dispatch and dropped when the
/// dispatch returns, so the explicit error slot can never leak between calls,
/// even when many calls share one worker thread.
#[derive(Debug)]
pub struct CallContext<'s> {
    session: &'s SessionContext,
    method: String,
    request_id: Option<RequestId>,
    raised: Mutex<Option<RpcError>>,
}

impl<'s> CallContext<'s> {
    pub(crate) fn new(
        session: &'s SessionContext,
        method: impl Into<String>,
        request_id: Option<RequestId>,
    ) -> Self {
        Self {
            session,
            method: method.into(),
            request_id,
            raised: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &'s SessionContext {
        self.session
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn is_notification(&self) -> bool {
        self.request_id.is_none()
    }

    pub fn metadata(&self, key: &str) -> Option<&'s Value> {
        self.session.metadata.get(key)
    }

    pub fn extension<T: Any + Send + Sync>(&self) -> Option<&'s T> {
        self.session.extension.as_deref()?.downcast_ref::<T>()
    }

    /// Fail the current call with `error`, whatever the callable returns
    pub fn raise(&self, error: RpcError) {
        *self.raised.lock() = Some(error);
    }

    pub fn has_raised(&self) -> bool {
        self.raised.lock().is_some()
    }

    pub(crate) fn take_raised(&self) -> Option<RpcError> {
        self.raised.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct Peer(&'static str);

    #[test]
    fn test_context_accessors() {
        let session = SessionContext::new("s1")
            .with_metadata("user", json!("al"))
            .with_extension(Peer("127.0.0.1"));
        let ctx = CallContext::new(&session, "echo", Some(RequestId::from(3)));

        assert_eq!(ctx.session_id(), "s1");
        assert_eq!(ctx.method(), "echo");
        assert_eq!(ctx.request_id(), Some(&RequestId::from(3)));
        assert_eq!(ctx.metadata("user"), Some(&json!("al")));
        assert_eq!(ctx.extension::<Peer>(), Some(&Peer("127.0.0.1")));
        assert_eq!(ctx.extension::<String>(), None);
        assert!(!ctx.is_notification());
    }

    #[test]
    fn test_raise_is_consumed_once() {
        let session = SessionContext::default();
        let ctx = CallContext::new(&session, "m", None);
        assert!(!ctx.has_raised());

        ctx.raise(RpcError::application(-1, "first"));
        ctx.raise(RpcError::application(-2, "second"));
        assert!(ctx.has_raised());
        assert_eq!(ctx.take_raised().map(|e| e.code), Some(-2));
        assert_eq!(ctx.take_raised(), None);
    }
}
