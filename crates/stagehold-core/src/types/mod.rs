//! # Core Type Definitions
//!
//! This module contains the value types shared by holders, mapping records
//! and the pipeline collaborators:
//! - Identifiers (`HolderId`)
//! - Dispatch contexts (`DispatchContext`, `DispatchSet`)
//! - Error types (`HolderError`, `ErrorKind`, `BoxError`)

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identity of a stage holder.
///
/// Mapping records point back at their holder through this id, never
/// through a reference, so the mapping table owns no holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HolderId(pub u64);

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

impl HolderId {
    /// Allocate a process-unique id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

// =============================================================================
// DISPATCH CONTEXTS
// =============================================================================

/// Why a request reached a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchContext {
    /// A request arriving directly from a client.
    Request,
    /// An internal forward to another target.
    Forward,
    /// An internal include of another target's output.
    Include,
    /// Error page handling.
    Error,
    /// Continuation of an asynchronous request.
    Async,
}

impl DispatchContext {
    /// Every context, in declaration order.
    pub const ALL: [DispatchContext; 5] = [
        DispatchContext::Request,
        DispatchContext::Forward,
        DispatchContext::Include,
        DispatchContext::Error,
        DispatchContext::Async,
    ];

    const fn bit(self) -> u8 {
        match self {
            DispatchContext::Request => 1,
            DispatchContext::Forward => 1 << 1,
            DispatchContext::Include => 1 << 2,
            DispatchContext::Error => 1 << 3,
            DispatchContext::Async => 1 << 4,
        }
    }
}

impl std::fmt::Display for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DispatchContext::Request => "REQUEST",
            DispatchContext::Forward => "FORWARD",
            DispatchContext::Include => "INCLUDE",
            DispatchContext::Error => "ERROR",
            DispatchContext::Async => "ASYNC",
        };
        f.write_str(name)
    }
}

/// A set of dispatch contexts, stored as a bit mask.
///
/// An empty set applies to [`DispatchContext::Request`] only, so a mapping
/// declared without contexts behaves like a plain request mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<DispatchContext>", into = "Vec<DispatchContext>")]
pub struct DispatchSet(u8);

impl DispatchSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// A set holding a single context.
    #[must_use]
    pub const fn only(context: DispatchContext) -> Self {
        Self(context.bit())
    }

    /// A set holding every context.
    #[must_use]
    pub fn all() -> Self {
        DispatchContext::ALL.into_iter().collect()
    }

    /// Return a copy of this set with `context` added.
    #[must_use]
    pub const fn with(self, context: DispatchContext) -> Self {
        Self(self.0 | context.bit())
    }

    /// Check whether `context` was declared explicitly.
    #[must_use]
    pub const fn contains(self, context: DispatchContext) -> bool {
        self.0 & context.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check whether a mapping with this set runs for `context`.
    ///
    /// Unlike [`DispatchSet::contains`], an empty set answers for `Request`.
    #[must_use]
    pub const fn applies_to(self, context: DispatchContext) -> bool {
        if self.is_empty() {
            matches!(context, DispatchContext::Request)
        } else {
            self.contains(context)
        }
    }

    /// Iterate the declared contexts in declaration order.
    pub fn iter(self) -> impl Iterator<Item = DispatchContext> {
        DispatchContext::ALL
            .into_iter()
            .filter(move |context| self.contains(*context))
    }
}

impl FromIterator<DispatchContext> for DispatchSet {
    fn from_iter<I: IntoIterator<Item = DispatchContext>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl From<Vec<DispatchContext>> for DispatchSet {
    fn from(contexts: Vec<DispatchContext>) -> Self {
        contexts.into_iter().collect()
    }
}

impl From<DispatchSet> for Vec<DispatchContext> {
    fn from(set: DispatchSet) -> Self {
        set.iter().collect()
    }
}

impl From<DispatchContext> for DispatchSet {
    fn from(context: DispatchContext) -> Self {
        Self::only(context)
    }
}

impl std::fmt::Display for DispatchSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, context) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{context}")?;
        }
        f.write_str("]")
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Error type returned by stage implementations and collaborator hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Broad category of a [`HolderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bound class is not a stage.
    TypeMismatch,
    /// Missing or inconsistent binding, or instantiation failure.
    Configuration,
    /// Mutation attempted on a started holder or pipeline.
    IllegalState,
    /// Malformed argument, such as an empty mapping.
    InvalidArgument,
    /// The stage itself (or a decorator) reported a failure.
    Stage,
}

/// Errors raised by holders, registrations and their collaborators.
///
/// - Start-time errors always reach the caller
/// - Stop-time errors are logged instead of returned
/// - Nothing in this crate retries
#[derive(Debug, Error)]
pub enum HolderError {
    /// A class resolved by name does not provide the stage capability.
    #[error("{class} is not a stage ({kind})")]
    TypeMismatch { class: String, kind: String },

    /// Start was requested with neither a class nor an instance bound.
    #[error("No class or instance bound for stage {holder}")]
    NotBound { holder: String },

    /// The loader does not know the bound class name.
    #[error("Class not found: {class}")]
    ClassNotFound { class: String },

    /// The stage factory failed to produce an instance.
    #[error("Failed to instantiate {class}: {source}")]
    Instantiation {
        class: String,
        #[source]
        source: BoxError,
    },

    /// The pipeline's decorate hook failed.
    #[error("Failed to decorate stage {stage}: {source}")]
    Decoration {
        stage: String,
        #[source]
        source: BoxError,
    },

    /// The stage's `init` failed.
    #[error("Stage {stage} failed to initialize: {source}")]
    Init {
        stage: String,
        #[source]
        source: BoxError,
    },

    /// The holder is started and cannot be rebound or restarted.
    #[error("Stage {holder} is already started")]
    HolderStarted { holder: String },

    /// The owning pipeline is started; declarations are closed.
    #[error("Pipeline already started, cannot modify stage {holder}")]
    PipelineStarted { holder: String },

    /// An argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl HolderError {
    /// Get the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            HolderError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            HolderError::NotBound { .. }
            | HolderError::ClassNotFound { .. }
            | HolderError::Instantiation { .. } => ErrorKind::Configuration,
            HolderError::HolderStarted { .. } | HolderError::PipelineStarted { .. } => {
                ErrorKind::IllegalState
            }
            HolderError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            HolderError::Decoration { .. } | HolderError::Init { .. } => ErrorKind::Stage,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
