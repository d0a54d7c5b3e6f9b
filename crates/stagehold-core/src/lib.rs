//! # stagehold-core
//!
//! Lifecycle and dispatch-mapping registration for a single pluggable
//! request-processing stage ("filter") of a web dispatch pipeline.
//!
//! A [`StageHolder`] binds a stage (a [`StageClass`] to instantiate, or a
//! ready instance), drives its `init`/`destroy` transitions, hands it a
//! [`ConfigView`], and exposes a [`Registration`] through which setup code
//! declares the URL patterns and named targets the stage runs for.
//!
//! ## Boundaries
//!
//! The crate does NOT:
//! - execute the pipeline or combine stages for a request
//! - parse or match URL patterns
//! - perform I/O
//!
//! The owning pipeline is reached through the [`Pipeline`] trait; class
//! loading through [`StageLoader`]. [`LocalPipeline`] and [`StageCatalog`]
//! are in-memory implementations of both.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use stagehold_core::{
//!     BoxError, ConfigView, DispatchContext, Exchange, Flow, LocalPipeline, Placement, Stage,
//!     StageClass, StageHolder,
//! };
//!
//! #[derive(Default)]
//! struct Audit;
//!
//! impl Stage for Audit {
//!     fn init(&self, _config: &ConfigView) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//!
//!     fn process(&self, _exchange: &mut Exchange) -> Result<Flow, BoxError> {
//!         Ok(Flow::Continue)
//!     }
//! }
//!
//! let pipeline = Arc::new(LocalPipeline::new());
//! let holder = StageHolder::with_class(pipeline.clone(), StageClass::of::<Audit>());
//! holder.set_name("audit");
//! holder
//!     .registration()
//!     .add_mapping_for_url_patterns(DispatchContext::Request, Placement::Append, ["/api/*"])
//!     .expect("declare mapping");
//!
//! pipeline.mark_started();
//! holder.start().expect("start");
//! assert_eq!(holder.config().expect("config").stage_name(), "audit");
//! holder.stop();
//! ```

// =============================================================================
// MODULES
// =============================================================================

pub mod holder;
pub mod loader;
pub mod mapping;
pub mod pipeline;
pub mod stage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{BoxError, DispatchContext, DispatchSet, ErrorKind, HolderError, HolderId};

// =============================================================================
// RE-EXPORTS: Stage & Holder
// =============================================================================

pub use holder::{ConfigView, HolderState, Registration, StageHolder};
pub use stage::{Exchange, Flow, Stage, StageClass};

// =============================================================================
// RE-EXPORTS: Collaborators
// =============================================================================

pub use loader::{StageCatalog, StageLoader};
pub use mapping::{
    DeclaredTargets, MappingRecord, MappingTable, MappingTarget, Placement, TargetKind,
};
pub use pipeline::{LocalPipeline, Pipeline, StageDecorator};
