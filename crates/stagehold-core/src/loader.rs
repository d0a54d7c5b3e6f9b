//! # Loader Module
//!
//! Class resolution for holders bound by class name.
//!
//! [`StageLoader`] is the seam where the surrounding framework plugs in its
//! own component registry. [`StageCatalog`] is the in-memory implementation.

use crate::{HolderError, Stage, StageClass};
use std::collections::BTreeMap;

/// Resolves class names to stage factories.
pub trait StageLoader: Send + Sync {
    /// Resolve `class_name`.
    ///
    /// Returns `HolderError::ClassNotFound` for unknown names and
    /// `HolderError::TypeMismatch` for known components that are not stages.
    fn load(&self, class_name: &str) -> Result<StageClass, HolderError>;
}

#[derive(Debug, Clone)]
enum CatalogEntry {
    Stage(StageClass),
    /// A component the framework knows about that is not a stage
    /// (an endpoint, a listener, ...).
    Component { kind: String },
}

/// In-memory class registry.
///
/// Uses BTreeMap so that iteration over registered names is ordered.
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl StageCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a default-constructible stage type under its type name.
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: Stage + Default + 'static,
    {
        self.register_class(StageClass::of::<T>())
    }

    /// Register a stage class under its own name, replacing any previous entry.
    pub fn register_class(&mut self, class: StageClass) -> &mut Self {
        self.entries
            .insert(class.name().to_string(), CatalogEntry::Stage(class));
        self
    }

    /// Register a non-stage component. Loading it fails with a type mismatch.
    pub fn register_component(
        &mut self,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> &mut Self {
        self.entries
            .insert(name.into(), CatalogEntry::Component { kind: kind.into() });
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterate registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl StageLoader for StageCatalog {
    fn load(&self, class_name: &str) -> Result<StageClass, HolderError> {
        match self.entries.get(class_name) {
            Some(CatalogEntry::Stage(class)) => Ok(class.clone()),
            Some(CatalogEntry::Component { kind }) => Err(HolderError::TypeMismatch {
                class: class_name.to_string(),
                kind: kind.clone(),
            }),
            None => Err(HolderError::ClassNotFound {
                class: class_name.to_string(),
            }),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
