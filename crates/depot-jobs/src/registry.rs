//! Handler registry keyed by job type.
//!
//! Built once at startup with [`HandlerRegistryBuilder`] and frozen before
//! any worker starts polling.

use crate::error::JobError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{info, warn};

/// Processes the payload of one job type.
///
/// Return [`JobError::permanent`] for failures a retry cannot fix; any other
/// error is retried with backoff.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the job and returns its result document.
    async fn handle(&self, payload: Value) -> Result<Value, JobError>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> Result<Value, JobError> {
        (self.f)(payload).await
    }
}

struct TypedHandler<P, R, F> {
    f: F,
    _marker: PhantomData<fn(P) -> R>,
}

#[async_trait]
impl<P, R, F, Fut> JobHandler for TypedHandler<P, R, F>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, JobError>> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> Result<Value, JobError> {
        let input: P = serde_json::from_value(payload)?;
        let output = (self.f)(input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Collects handlers before the registry is frozen.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `job_type`, replacing any previous one.
    pub fn register(mut self, job_type: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        let job_type = job_type.into();
        if self
            .handlers
            .insert(job_type.clone(), Arc::new(handler))
            .is_some()
        {
            warn!(job_type = %job_type, "Replacing previously registered handler");
        } else {
            info!(job_type = %job_type, "Registered job handler");
        }
        self
    }

    /// Registers an async closure over the raw payload.
    pub fn register_fn<F, Fut>(self, job_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        self.register(job_type, handler_fn(f))
    }

    /// Registers an async closure over a typed payload.
    ///
    /// A payload that does not deserialize into `P` fails the job without retry.
    pub fn register_typed<P, R, F, Fut>(self, job_type: impl Into<String>, f: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, JobError>> + Send + 'static,
    {
        self.register(
            job_type,
            TypedHandler {
                f,
                _marker: PhantomData,
            },
        )
    }

    /// Freezes the registry.
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Immutable map from job type to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Starts a new builder.
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Handler for `job_type`.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Returns true if `job_type` has a handler.
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Number of registered job types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
