//! # Method Registry
//!
//! One [`Registry`] per session holds the session's method bindings and hooks.
//! Reads on the dispatch path go through [`ArcSwap`] loads and never block;
//! registration swaps in a new copy of the table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::codec::ParamType;
use crate::context::CallContext;
use crate::error::RpcError;
use crate::method::RpcMethod;
use crate::request::Request;
use crate::response::JsonRpcMessage;

/// Describes one declared parameter of a method
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescriptor {
    /// Name clients use for named params
    pub name: String,
    pub ty: ParamType,
    pub default: Option<Value>,
}

impl ParamDescriptor {
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType, default: Value) -> Self {
        Self {
            name: name.into(),
            ty,
            default: Some(default),
        }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Registration failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("method name must not be empty")]
    EmptyName,
    #[error("method '{0}' is already registered")]
    Duplicate(String),
    #[error("method '{method}': parameter '{parameter}' has a default but a later parameter does not")]
    NonTrailingDefault { method: String, parameter: String },
    #[error("method '{method}': {defaults} defaults supplied for {parameters} parameters")]
    TooManyDefaults {
        method: String,
        defaults: usize,
        parameters: usize,
    },
    #[error("method '{method}': parameter '{parameter}' is declared twice")]
    DuplicateParameter { method: String, parameter: String },
}

/// A method name bound to its callable and parameter descriptors
#[derive(Clone)]
pub struct MethodBinding {
    name: String,
    params: Vec<ParamDescriptor>,
    returns: ParamType,
    handler: Arc<dyn RpcMethod>,
}

impl MethodBinding {
    pub fn new<H>(name: impl Into<String>, handler: H) -> Self
    where
        H: RpcMethod + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: ParamType::Any,
            handler: Arc::new(handler),
        }
    }

    pub fn param(mut self, descriptor: ParamDescriptor) -> Self {
        self.params.push(descriptor);
        self
    }

    pub fn params(mut self, descriptors: impl IntoIterator<Item = ParamDescriptor>) -> Self {
        self.params.extend(descriptors);
        self
    }

    pub fn returns(mut self, ty: ParamType) -> Self {
        self.returns = ty;
        self
    }

    /// Assign `defaults` to the trailing parameters, last default to last
    /// parameter
    pub fn with_trailing_defaults(mut self, defaults: Vec<Value>) -> Result<Self, RegistrationError> {
        if defaults.len() > self.params.len() {
            return Err(RegistrationError::TooManyDefaults {
                method: self.name,
                defaults: defaults.len(),
                parameters: self.params.len(),
            });
        }
        let offset = self.params.len() - defaults.len();
        for (descriptor, default) in self.params[offset..].iter_mut().zip(defaults) {
            descriptor.default = Some(default);
        }
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParamDescriptor] {
        &self.params
    }

    pub fn return_type(&self) -> &ParamType {
        &self.returns
    }

    pub fn handler(&self) -> &Arc<dyn RpcMethod> {
        &self.handler
    }

    pub fn required_count(&self) -> usize {
        self.params.iter().filter(|p| !p.has_default()).count()
    }

    /// Defaults may only cover a contiguous trailing run of parameters
    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        for (i, descriptor) in self.params.iter().enumerate() {
            if self.params[..i].iter().any(|p| p.name == descriptor.name) {
                return Err(RegistrationError::DuplicateParameter {
                    method: self.name.clone(),
                    parameter: descriptor.name.clone(),
                });
            }
        }
        let first_default = self.params.iter().position(ParamDescriptor::has_default);
        if let Some(first) = first_default {
            if self.params[first..].iter().any(|p| !p.has_default()) {
                return Err(RegistrationError::NonTrailingDefault {
                    method: self.name.clone(),
                    parameter: self.params[first].name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MethodBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodBinding")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// A group of bindings registered together, typically one service object
pub trait RpcService {
    fn bindings(&self) -> Vec<MethodBinding>;
}

/// Runs before binding; returning an error skips the call
pub type PreProcessHook = Arc<dyn Fn(&Request<'_>, &CallContext<'_>) -> Option<RpcError> + Send + Sync>;
/// Runs over every finished response; returning an error replaces the response
pub type PostProcessHook =
    Arc<dyn Fn(&JsonRpcMessage, &CallContext<'_>) -> Option<RpcError> + Send + Sync>;
/// Rewrites coded errors raised by callables
pub type ErrorTransformHook = Arc<dyn Fn(RpcError, &CallContext<'_>) -> RpcError + Send + Sync>;
/// Rewrites parse errors; receives the offending text
pub type ParseErrorHook = Arc<dyn Fn(&str, RpcError) -> RpcError + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) pre_process: Option<PreProcessHook>,
    pub(crate) post_process: Option<PostProcessHook>,
    pub(crate) error_transform: Option<ErrorTransformHook>,
    pub(crate) parse_error: Option<ParseErrorHook>,
}

type MethodTable = HashMap<String, Arc<MethodBinding>>;

/// Method table and hooks of one session
pub struct Registry {
    session_id: String,
    methods: ArcSwap<MethodTable>,
    hooks: ArcSwap<Hooks>,
}

impl Registry {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            methods: ArcSwap::from_pointee(HashMap::new()),
            hooks: ArcSwap::from_pointee(Hooks::default()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Register a method from its parts; `defaults` apply to the trailing
    /// descriptors
    pub fn register<H>(
        &self,
        name: impl Into<String>,
        params: Vec<ParamDescriptor>,
        defaults: Vec<Value>,
        handler: H,
    ) -> Result<(), RegistrationError>
    where
        H: RpcMethod + 'static,
    {
        let binding = MethodBinding::new(name, handler)
            .params(params)
            .with_trailing_defaults(defaults)?;
        self.register_binding(binding)
    }

    pub fn register_binding(&self, binding: MethodBinding) -> Result<(), RegistrationError> {
        binding.validate()?;
        let binding = Arc::new(binding);
        let mut duplicate = false;
        self.methods.rcu(|current| {
            duplicate = current.contains_key(binding.name());
            if duplicate {
                return Arc::clone(current);
            }
            let mut next = MethodTable::clone(current);
            next.insert(binding.name().to_string(), Arc::clone(&binding));
            Arc::new(next)
        });
        if duplicate {
            return Err(RegistrationError::Duplicate(binding.name().to_string()));
        }
        debug!(
            session_id = %self.session_id,
            method = %binding.name(),
            params = binding.parameters().len(),
            "Registered method"
        );
        Ok(())
    }

    /// Register every binding, stopping at the first failure
    pub fn register_all(
        &self,
        bindings: impl IntoIterator<Item = MethodBinding>,
    ) -> Result<(), RegistrationError> {
        bindings
            .into_iter()
            .try_for_each(|binding| self.register_binding(binding))
    }

    pub fn register_service(&self, service: &dyn RpcService) -> Result<(), RegistrationError> {
        self.register_all(service.bindings())
    }

    /// Remove a method; returns whether it was registered
    pub fn unregister(&self, name: &str) -> bool {
        let mut removed = false;
        self.methods.rcu(|current| {
            removed = current.contains_key(name);
            if !removed {
                return Arc::clone(current);
            }
            let mut next = MethodTable::clone(current);
            next.remove(name);
            Arc::new(next)
        });
        if removed {
            debug!(session_id = %self.session_id, method = %name, "Unregistered method");
        }
        removed
    }

    /// Exact, case-sensitive lookup
    pub fn resolve(&self, name: &str) -> Option<Arc<MethodBinding>> {
        self.methods.load().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.load().contains_key(name)
    }

    /// Sorted names of all registered methods
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.load().is_empty()
    }

    /// Drop all bindings and hooks
    pub fn clear(&self) {
        self.methods.store(Arc::new(HashMap::new()));
        self.hooks.store(Arc::new(Hooks::default()));
    }

    pub fn set_pre_process_hook<F>(&self, hook: F)
    where
        F: Fn(&Request<'_>, &CallContext<'_>) -> Option<RpcError> + Send + Sync + 'static,
    {
        let hook: PreProcessHook = Arc::new(hook);
        self.hooks.rcu(|current| Hooks {
            pre_process: Some(Arc::clone(&hook)),
            ..Hooks::clone(current)
        });
    }

    pub fn set_post_process_hook<F>(&self, hook: F)
    where
        F: Fn(&JsonRpcMessage, &CallContext<'_>) -> Option<RpcError> + Send + Sync + 'static,
    {
        let hook: PostProcessHook = Arc::new(hook);
        self.hooks.rcu(|current| Hooks {
            post_process: Some(Arc::clone(&hook)),
            ..Hooks::clone(current)
        });
    }

    pub fn set_error_transform<F>(&self, hook: F)
    where
        F: Fn(RpcError, &CallContext<'_>) -> RpcError + Send + Sync + 'static,
    {
        let hook: ErrorTransformHook = Arc::new(hook);
        self.hooks.rcu(|current| Hooks {
            error_transform: Some(Arc::clone(&hook)),
            ..Hooks::clone(current)
        });
    }

    pub fn set_parse_error_hook<F>(&self, hook: F)
    where
        F: Fn(&str, RpcError) -> RpcError + Send + Sync + 'static,
    {
        let hook: ParseErrorHook = Arc::new(hook);
        self.hooks.rcu(|current| Hooks {
            parse_error: Some(Arc::clone(&hook)),
            ..Hooks::clone(current)
        });
    }

    pub fn clear_hooks(&self) {
        self.hooks.store(Arc::new(Hooks::default()));
    }

    pub(crate) fn hooks(&self) -> Arc<Hooks> {
        self.hooks.load_full()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("session_id", &self.session_id)
            .field("methods", &self.method_names())
            .finish_non_exhaustive()
    }
}
