//! # Mapping Module
//!
//! Mapping records and the table that owns them.
//!
//! ## Ordering
//!
//! The table is kept as two blocks:
//! - the front block holds prepended records, in the order they were prepended
//! - the back block holds appended records, in the order they were appended
//!
//! `all()` yields the front block followed by the back block. A prepend
//! therefore lands ahead of every appended record but behind earlier
//! prepends. Resolving precedence between stages is left to the pipeline.
//!
//! Records are also indexed by holder, so per-holder queries never scan the
//! records of other holders.

use crate::{DispatchContext, DispatchSet, HolderId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

// =============================================================================
// MAPPING RECORD
// =============================================================================

/// What a mapping record routes through its stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingTarget {
    /// Named targets (endpoints registered under a name).
    TargetNames(Vec<String>),
    /// URL patterns, kept verbatim.
    UrlPatterns(Vec<String>),
}

/// Which of the two target kinds a query selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    TargetNames,
    UrlPatterns,
}

impl MappingTarget {
    #[must_use]
    pub fn kind(&self) -> TargetKind {
        match self {
            MappingTarget::TargetNames(_) => TargetKind::TargetNames,
            MappingTarget::UrlPatterns(_) => TargetKind::UrlPatterns,
        }
    }

    /// The declared names or patterns.
    #[must_use]
    pub fn values(&self) -> &[String] {
        match self {
            MappingTarget::TargetNames(values) | MappingTarget::UrlPatterns(values) => values,
        }
    }
}

/// A declaration binding one stage to targets for a set of dispatch contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    /// The holder this record belongs to.
    pub holder: HolderId,
    /// Holder name at declaration time, for diagnostics.
    pub stage_name: String,
    /// Named targets or URL patterns.
    pub target: MappingTarget,
    /// Dispatch contexts the mapping applies to.
    pub dispatch: DispatchSet,
}

impl MappingRecord {
    /// Check whether this mapping runs for `context`.
    #[must_use]
    pub fn applies_to(&self, context: DispatchContext) -> bool {
        self.dispatch.applies_to(context)
    }

    /// The target names, if this is a named-target record.
    #[must_use]
    pub fn target_names(&self) -> Option<&[String]> {
        match &self.target {
            MappingTarget::TargetNames(names) => Some(names),
            MappingTarget::UrlPatterns(_) => None,
        }
    }

    /// The URL patterns, if this is a URL-pattern record.
    #[must_use]
    pub fn url_patterns(&self) -> Option<&[String]> {
        match &self.target {
            MappingTarget::UrlPatterns(patterns) => Some(patterns),
            MappingTarget::TargetNames(_) => None,
        }
    }

    /// Check whether this record names `target` (exact match, or `*` for all).
    #[must_use]
    pub fn matches_target_name(&self, target: &str) -> bool {
        self.target_names()
            .is_some_and(|names| names.iter().any(|n| n == target || n == "*"))
    }
}

impl std::fmt::Display for MappingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{:?}/{}=={}",
            match self.target.kind() {
                TargetKind::TargetNames => "names",
                TargetKind::UrlPatterns => "patterns",
            },
            self.target.values(),
            self.dispatch,
            self.stage_name
        )
    }
}

/// Where a new record goes in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// After every record declared so far.
    Append,
    /// Ahead of every appended record.
    Prepend,
}

// =============================================================================
// MAPPING TABLE
// =============================================================================

#[derive(Debug, Default)]
struct Blocks {
    front: Vec<Arc<MappingRecord>>,
    back: Vec<Arc<MappingRecord>>,
}

impl Blocks {
    fn push(&mut self, record: Arc<MappingRecord>, placement: Placement) {
        match placement {
            Placement::Append => self.back.push(record),
            Placement::Prepend => self.front.push(record),
        }
    }

    fn ordered(&self) -> Vec<Arc<MappingRecord>> {
        self.front.iter().chain(&self.back).cloned().collect()
    }

    fn len(&self) -> usize {
        self.front.len().saturating_add(self.back.len())
    }
}

#[derive(Debug, Default)]
struct TableInner {
    all: Blocks,
    by_holder: BTreeMap<HolderId, Blocks>,
}

/// The pipeline's mapping table.
///
/// Shared between the pipeline and every registration view; mutation goes
/// through `&self` behind a lock.
#[derive(Debug, Default)]
pub struct MappingTable {
    inner: RwLock<TableInner>,
}

impl MappingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record at the given placement.
    pub fn add(&self, record: MappingRecord, placement: Placement) {
        let record = Arc::new(record);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_holder
            .entry(record.holder)
            .or_default()
            .push(Arc::clone(&record), placement);
        inner.all.push(record, placement);
    }

    /// Every record, in table order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<MappingRecord>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all
            .ordered()
    }

    /// The records of one holder, in table order.
    #[must_use]
    pub fn for_holder(&self, holder: HolderId) -> Vec<Arc<MappingRecord>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_holder
            .get(&holder)
            .map(Blocks::ordered)
            .unwrap_or_default()
    }

    /// Drop every record of one holder. Returns how many were removed.
    pub fn remove_holder(&self, holder: HolderId) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(removed) = inner.by_holder.remove(&holder) else {
            return 0;
        };
        inner.all.front.retain(|r| r.holder != holder);
        inner.all.back.retain(|r| r.holder != holder);
        removed.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// DECLARED TARGETS
// =============================================================================

/// The names or patterns one holder declared, in table order.
///
/// Holds a snapshot of the holder's records and flattens them on each
/// iteration, so it can be walked any number of times.
#[derive(Debug, Clone)]
pub struct DeclaredTargets {
    records: Vec<Arc<MappingRecord>>,
    kind: TargetKind,
}

impl DeclaredTargets {
    pub(crate) fn new(records: Vec<Arc<MappingRecord>>, kind: TargetKind) -> Self {
        Self { records, kind }
    }

    /// Iterate the declared values.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(move |record| record.target.kind() == self.kind)
            .flat_map(|record| record.target.values().iter().map(String::as_str))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Collect into owned strings.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.iter().map(str::to_string).collect()
    }
}

impl<'a> IntoIterator for &'a DeclaredTargets {
    type Item = &'a str;
    type IntoIter = Box<dyn Iterator<Item = &'a str> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

// =============================================================================
// TESTS
// =============================================================================
