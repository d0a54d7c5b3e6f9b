//! # Pipeline Module
//!
//! The owning pipeline, seen from a holder.
//!
//! A holder needs four things from the pipeline that owns it:
//! - whether the pipeline has started (declarations close at start)
//! - the mapping table
//! - a loader for classes bound by name
//! - the decorate / undecorate hooks run around each stage instance
//!
//! [`Pipeline`] is that contract. [`LocalPipeline`] is a minimal
//! implementation for embedders that do not bring their own.

use crate::{BoxError, MappingTable, Stage, StageCatalog, StageLoader};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// DECORATOR
// =============================================================================

/// A hook that may wrap or observe stage instances (for injection,
/// instrumentation, ...).
pub trait StageDecorator: Send + Sync {
    /// Called on start, before `init`. The returned stage replaces the input.
    fn decorate(&self, stage: Arc<dyn Stage>) -> Result<Arc<dyn Stage>, BoxError>;

    /// Called on stop, after `destroy`.
    fn undecorate(&self, _stage: &Arc<dyn Stage>) -> Result<(), BoxError> {
        Ok(())
    }
}

// =============================================================================
// PIPELINE TRAIT
// =============================================================================

/// What a holder consumes from its owning pipeline.
pub trait Pipeline: Send + Sync {
    /// Whether the pipeline has started.
    fn is_started(&self) -> bool;

    /// The mapping table owned by this pipeline.
    fn mappings(&self) -> &MappingTable;

    /// The loader used for holders bound by class name.
    fn loader(&self) -> &dyn StageLoader;

    /// Customize a freshly obtained instance. Defaults to identity.
    fn decorate(&self, stage: Arc<dyn Stage>) -> Result<Arc<dyn Stage>, BoxError> {
        Ok(stage)
    }

    /// Undo [`Pipeline::decorate`] for an instance being torn down.
    fn undecorate(&self, _stage: &Arc<dyn Stage>) -> Result<(), BoxError> {
        Ok(())
    }
}

// =============================================================================
// LOCAL PIPELINE
// =============================================================================

/// A self-contained [`Pipeline`]: a started flag, a mapping table, a loader
/// and an ordered decorator list.
///
/// Decorators run in registration order on `decorate` and in reverse order
/// on `undecorate`. A failed `decorate` undecorates the ones that already ran.
pub struct LocalPipeline {
    started: AtomicBool,
    mappings: MappingTable,
    loader: Box<dyn StageLoader>,
    decorators: Vec<Arc<dyn StageDecorator>>,
}

impl Default for LocalPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPipeline {
    /// Create a stopped pipeline with an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::with_loader(StageCatalog::new())
    }

    /// Create a stopped pipeline resolving class names through `loader`.
    #[must_use]
    pub fn with_loader(loader: impl StageLoader + 'static) -> Self {
        Self {
            started: AtomicBool::new(false),
            mappings: MappingTable::new(),
            loader: Box::new(loader),
            decorators: Vec::new(),
        }
    }

    /// Add a decorator.
    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn StageDecorator>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Mark the pipeline started. Closes mapping declarations.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// Mark the pipeline stopped. Reopens mapping declarations.
    pub fn mark_stopped(&self) {
        self.started.store(false, Ordering::Release);
    }
}

impl Pipeline for LocalPipeline {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn mappings(&self) -> &MappingTable {
        &self.mappings
    }

    fn loader(&self) -> &dyn StageLoader {
        self.loader.as_ref()
    }

    fn decorate(&self, stage: Arc<dyn Stage>) -> Result<Arc<dyn Stage>, BoxError> {
        let mut stage = stage;
        for (applied, decorator) in self.decorators.iter().enumerate() {
            match decorator.decorate(Arc::clone(&stage)) {
                Ok(decorated) => stage = decorated,
                Err(e) => {
                    // Roll back the decorators that already ran.
                    for earlier in self.decorators.iter().take(applied).rev() {
                        if let Err(undo) = earlier.undecorate(&stage) {
                            tracing::warn!(
                                error = %undo,
                                "undecorate after failed decorate failed"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(stage)
    }

    fn undecorate(&self, stage: &Arc<dyn Stage>) -> Result<(), BoxError> {
        // Every decorator gets its call; the first failure is reported.
        let mut first_error = None;
        for decorator in self.decorators.iter().rev() {
            if let Err(e) = decorator.undecorate(stage) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for LocalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPipeline")
            .field("started", &self.is_started())
            .field("mappings", &self.mappings.len())
            .field("decorators", &self.decorators.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
