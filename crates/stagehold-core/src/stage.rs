//! # Stage Capability
//!
//! The [`Stage`] trait is the capability every held component must provide:
//! `init`, `process` and `destroy`. A [`StageClass`] is the Rust stand-in for
//! a bound class: a named factory that produces fresh instances on demand.
//!
//! Because `StageClass::of::<T>()` requires `T: Stage`, a class built from a
//! type can never fail the capability check. Only classes resolved by name
//! through a [`StageLoader`](crate::StageLoader) can.

use crate::holder::ConfigView;
use crate::{BoxError, DispatchContext};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// EXCHANGE
// =============================================================================

/// The request state a stage sees while processing.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Request path, relative to the pipeline root.
    pub path: String,
    /// Why the request reached this stage.
    pub dispatch: DispatchContext,
    /// Attributes shared between stages.
    pub attributes: BTreeMap<String, String>,
}

impl Exchange {
    /// Create an exchange for a direct request.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_dispatch(path, DispatchContext::Request)
    }

    /// Create an exchange for the given dispatch context.
    #[must_use]
    pub fn with_dispatch(path: impl Into<String>, dispatch: DispatchContext) -> Self {
        Self {
            path: path.into(),
            dispatch,
            attributes: BTreeMap::new(),
        }
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Outcome of [`Stage::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Hand the exchange to the next stage.
    Continue,
    /// Stop the chain here; the stage produced the response.
    Halt,
}

// =============================================================================
// STAGE TRAIT
// =============================================================================

/// A pluggable unit of request processing.
///
/// Stages are shared behind `Arc` and called through `&self`, so any state
/// they keep between `init` and `destroy` needs interior mutability.
pub trait Stage: Send + Sync {
    /// Prepare the stage. Called once per holder start, before any `process`.
    fn init(&self, config: &ConfigView) -> Result<(), BoxError>;

    /// Handle one exchange.
    fn process(&self, exchange: &mut Exchange) -> Result<Flow, BoxError>;

    /// Release resources. Called once per holder stop.
    fn destroy(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runtime type name, used to name holders bound to an instance.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

// =============================================================================
// STAGE CLASS
// =============================================================================

type Factory = dyn Fn() -> Result<Arc<dyn Stage>, BoxError> + Send + Sync;

/// A named stage factory.
#[derive(Clone)]
pub struct StageClass {
    name: String,
    factory: Arc<Factory>,
}

impl StageClass {
    /// Class for a default-constructible stage type, named after the type.
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: Stage + Default + 'static,
    {
        Self::from_fn(std::any::type_name::<T>(), || {
            Ok(Arc::new(T::default()) as Arc<dyn Stage>)
        })
    }

    /// Class with an explicit name and a fallible factory.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Stage>, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Produce a new instance.
    pub fn instantiate(&self) -> Result<Arc<dyn Stage>, BoxError> {
        (self.factory)()
    }
}

impl std::fmt::Debug for StageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageClass")
            .field("name", &self.name)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
