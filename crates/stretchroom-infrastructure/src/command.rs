//! Mediator-style command execution.
//!
//! A [`Command`] handles one context type and produces one result type. The
//! [`CommandRegistry`] holds at most one handler per `(context, result)` pair;
//! [`CommandExecutor`] resolves the handler, runs it and logs around it.
//!
//! ```
//! use async_trait::async_trait;
//! use stretchroom_infrastructure::{ApiResult, Command, CommandExecutor, CommandRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Double;
//!
//! #[async_trait]
//! impl Command<i32, i32> for Double {
//!     async fn execute(&self, context: i32, _token: CancellationToken) -> ApiResult<i32> {
//!         Ok(context * 2)
//!     }
//! }
//!
//! # tokio_test_block_on(async {
//! let mut registry = CommandRegistry::new();
//! registry.register(Double);
//! let executor = CommandExecutor::new(registry);
//! let result = executor.execute::<i32, i32>(21, CancellationToken::new()).await.unwrap();
//! assert_eq!(result, 42);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_command_executed;

/// A handler for one `(context, result)` pair.
#[async_trait]
pub trait Command<C, R>: Send + Sync {
    async fn execute(&self, context: C, token: CancellationToken) -> ApiResult<R>;
}

type Factory<C, R> = Arc<dyn Fn() -> Arc<dyn Command<C, R>> + Send + Sync>;

enum Lifetime<C, R> {
    Singleton(Arc<dyn Command<C, R>>),
    Scoped(Factory<C, R>),
}

struct Registration<C, R> {
    name: &'static str,
    lifetime: Lifetime<C, R>,
}

fn short_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn key<C: 'static, R: 'static>() -> TypeId {
    TypeId::of::<(C, R)>()
}

/// Handlers keyed by `(context, result)` type pair.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler shared by every execution.
    ///
    /// A later registration for the same pair replaces the earlier one.
    pub fn register<C, R, H>(&mut self, handler: H) -> &mut Self
    where
        C: 'static,
        R: 'static,
        H: Command<C, R> + 'static,
    {
        let registration = Registration::<C, R> {
            name: short_name::<H>(),
            lifetime: Lifetime::Singleton(Arc::new(handler)),
        };
        self.handlers.insert(key::<C, R>(), Box::new(registration));
        self
    }

    /// Register a factory producing one handler per scope.
    pub fn register_scoped<C, R, H, F>(&mut self, factory: F) -> &mut Self
    where
        C: 'static,
        R: 'static,
        H: Command<C, R> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let factory: Factory<C, R> = Arc::new(move || Arc::new(factory()) as Arc<dyn Command<C, R>>);
        let registration = Registration::<C, R> {
            name: short_name::<H>(),
            lifetime: Lifetime::Scoped(factory),
        };
        self.handlers.insert(key::<C, R>(), Box::new(registration));
        self
    }

    /// Whether a handler exists for the pair.
    pub fn contains<C: 'static, R: 'static>(&self) -> bool {
        self.handlers.contains_key(&key::<C, R>())
    }

    fn registration<C: 'static, R: 'static>(&self) -> Option<&Registration<C, R>> {
        self.handlers
            .get(&key::<C, R>())
            .and_then(|entry| entry.downcast_ref::<Registration<C, R>>())
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Resolves and runs commands from a shared registry.
///
/// [`execute`](Self::execute) resolves from the executor's root scope, so a
/// scoped handler is built once and reused. [`execute_scoped`](Self::execute_scoped)
/// builds a fresh scope per call.
#[derive(Clone)]
pub struct CommandExecutor {
    registry: Arc<CommandRegistry>,
    root: Arc<CommandScope>,
}

impl CommandExecutor {
    pub fn new(registry: CommandRegistry) -> Self {
        let registry = Arc::new(registry);
        let root = Arc::new(CommandScope::new(Arc::clone(&registry)));
        Self { registry, root }
    }

    /// Start a scope; scoped handlers are built once per scope.
    pub fn create_scope(&self) -> CommandScope {
        CommandScope::new(Arc::clone(&self.registry))
    }

    /// Run the handler registered for `(C, R)` in the root scope.
    pub async fn execute<C, R>(&self, context: C, token: CancellationToken) -> ApiResult<R>
    where
        C: Debug + Send + 'static,
        R: Debug + Send + 'static,
    {
        self.root.execute(context, token).await
    }

    /// Run the handler inside a new scope.
    pub async fn execute_scoped<C, R>(&self, context: C, token: CancellationToken) -> ApiResult<R>
    where
        C: Debug + Send + 'static,
        R: Debug + Send + 'static,
    {
        let scope = self.create_scope();
        scope.execute(context, token).await
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("registry", &self.registry)
            .finish()
    }
}

/// A resolution scope for scoped command handlers.
pub struct CommandScope {
    registry: Arc<CommandRegistry>,
    instances: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl CommandScope {
    fn new(registry: Arc<CommandRegistry>) -> Self {
        Self {
            registry,
            instances: Mutex::new(HashMap::new()),
        }
    }

    fn resolve<C: 'static, R: 'static>(&self) -> ApiResult<(&'static str, Arc<dyn Command<C, R>>)> {
        let registration = self.registry.registration::<C, R>().ok_or_else(|| {
            ApiError::from_error(
                format!(
                    "no command registered for ({}, {})",
                    type_name::<C>(),
                    type_name::<R>()
                ),
                None,
            )
        })?;

        let handler = match &registration.lifetime {
            Lifetime::Singleton(handler) => Arc::clone(handler),
            Lifetime::Scoped(factory) => {
                let mut instances = self
                    .instances
                    .lock()
                    .map_err(|_| ApiError::from_error("command scope poisoned", None))?;
                let cached = instances
                    .entry(key::<C, R>())
                    .or_insert_with(|| Box::new(factory()) as Box<dyn Any + Send + Sync>);
                cached
                    .downcast_ref::<Arc<dyn Command<C, R>>>()
                    .map(Arc::clone)
                    .ok_or_else(|| ApiError::from_error("command scope type mismatch", None))?
            }
        };

        Ok((registration.name, handler))
    }

    /// Run the handler for `(C, R)` within this scope.
    pub async fn execute<C, R>(&self, context: C, token: CancellationToken) -> ApiResult<R>
    where
        C: Debug + Send + 'static,
        R: Debug + Send + 'static,
    {
        let (name, handler) = self.resolve::<C, R>()?;

        tracing::debug!(command = name, "{name} execute with context: {context:?}");

        match handler.execute(context, token).await {
            Ok(result) => {
                tracing::debug!(command = name, "{name} executed with result: {result:?}");
                record_command_executed(name, "success");
                Ok(result)
            }
            Err(error) => {
                tracing::error!(command = name, error = %error, "{name} executed with exception");
                record_command_executed(name, "error");
                Err(error)
            }
        }
    }
}
