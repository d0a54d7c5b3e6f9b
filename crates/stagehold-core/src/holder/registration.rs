//! Declaration-time API for one holder.
//!
//! Every mutating call fails with `HolderError::PipelineStarted` once the
//! owning pipeline has started; the table is left untouched in that case.

use super::StageHolder;
use crate::{
    DeclaredTargets, DispatchSet, HolderError, MappingRecord, MappingTarget, Placement,
    TargetKind,
};
use std::collections::{BTreeMap, BTreeSet};

/// Registration view over a [`StageHolder`].
///
/// Obtained from [`StageHolder::registration`]. Mappings go into the owning
/// pipeline's table; queries read that table back, filtered to this holder.
#[derive(Debug, Clone, Copy)]
pub struct Registration<'a> {
    holder: &'a StageHolder,
}

impl<'a> Registration<'a> {
    pub(super) fn new(holder: &'a StageHolder) -> Self {
        Self { holder }
    }

    fn ensure_open(&self) -> Result<(), HolderError> {
        if self.holder.pipeline().is_started() {
            return Err(HolderError::PipelineStarted {
                holder: self.holder.lock().label(),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Mappings
    // -------------------------------------------------------------------------

    /// Route the named targets through this stage.
    pub fn add_mapping_for_target_names<I, S>(
        &self,
        dispatch: impl Into<DispatchSet>,
        placement: Placement,
        names: I,
    ) -> Result<(), HolderError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = collect_values(names, "target name")?;
        self.add_mapping(dispatch.into(), placement, MappingTarget::TargetNames(names))
    }

    /// Route the URL patterns through this stage. Patterns are stored as
    /// given; matching them is the pipeline's business.
    pub fn add_mapping_for_url_patterns<I, S>(
        &self,
        dispatch: impl Into<DispatchSet>,
        placement: Placement,
        patterns: I,
    ) -> Result<(), HolderError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = collect_values(patterns, "URL pattern")?;
        self.add_mapping(
            dispatch.into(),
            placement,
            MappingTarget::UrlPatterns(patterns),
        )
    }

    fn add_mapping(
        &self,
        dispatch: DispatchSet,
        placement: Placement,
        target: MappingTarget,
    ) -> Result<(), HolderError> {
        self.ensure_open()?;

        let record = MappingRecord {
            holder: self.holder.id(),
            stage_name: self.holder.lock().label(),
            target,
            dispatch,
        };
        tracing::info!(mapping = %record, ?placement, "stage mapping declared");
        self.holder.pipeline().mappings().add(record, placement);
        Ok(())
    }

    /// Every named target this holder is mapped to, in table order.
    #[must_use]
    pub fn target_name_mappings(&self) -> DeclaredTargets {
        self.declared(TargetKind::TargetNames)
    }

    /// Every URL pattern this holder is mapped to, in table order.
    #[must_use]
    pub fn url_pattern_mappings(&self) -> DeclaredTargets {
        self.declared(TargetKind::UrlPatterns)
    }

    fn declared(&self, kind: TargetKind) -> DeclaredTargets {
        let records = self
            .holder
            .pipeline()
            .mappings()
            .for_holder(self.holder.id());
        DeclaredTargets::new(records, kind)
    }

    // -------------------------------------------------------------------------
    // Holder attributes
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.holder.name()
    }

    #[must_use]
    pub fn class_name(&self) -> Option<String> {
        self.holder.class_name()
    }

    #[must_use]
    pub fn init_parameter(&self, key: &str) -> Option<String> {
        self.holder.init_parameter(key)
    }

    #[must_use]
    pub fn init_parameters(&self) -> BTreeMap<String, String> {
        self.holder.init_parameters()
    }

    /// Set an init parameter unless it already exists.
    ///
    /// Returns `false` (and changes nothing) if `name` is already set.
    pub fn set_init_parameter(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<bool, HolderError> {
        self.ensure_open()?;
        let name = name.into();
        if name.is_empty() {
            return Err(HolderError::InvalidArgument(
                "init parameter name must not be empty".to_string(),
            ));
        }

        let mut inner = self.holder.lock();
        if inner.init_params.contains_key(&name) {
            return Ok(false);
        }
        inner.init_params.insert(name, value.into());
        Ok(true)
    }

    /// Set several init parameters, all or nothing.
    ///
    /// Returns the names that were already set. If that set is non-empty,
    /// no parameter was changed.
    pub fn set_init_parameters(
        &self,
        params: BTreeMap<String, String>,
    ) -> Result<BTreeSet<String>, HolderError> {
        self.ensure_open()?;
        if params.keys().any(String::is_empty) {
            return Err(HolderError::InvalidArgument(
                "init parameter name must not be empty".to_string(),
            ));
        }

        let mut inner = self.holder.lock();
        let conflicts: BTreeSet<String> = params
            .keys()
            .filter(|name| inner.init_params.contains_key(*name))
            .cloned()
            .collect();
        if conflicts.is_empty() {
            inner.init_params.extend(params);
        }
        Ok(conflicts)
    }

    #[must_use]
    pub fn is_async_supported(&self) -> bool {
        self.holder.is_async_supported()
    }

    pub fn set_async_supported(&self, supported: bool) -> Result<(), HolderError> {
        self.ensure_open()?;
        self.holder.set_async_supported(supported);
        Ok(())
    }

    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.holder.display_name()
    }

    pub fn set_display_name(&self, display_name: impl Into<String>) -> Result<(), HolderError> {
        self.ensure_open()?;
        self.holder.set_display_name(display_name);
        Ok(())
    }

    pub fn set_description(&self, description: impl Into<String>) -> Result<(), HolderError> {
        self.ensure_open()?;
        self.holder.lock().description = Some(description.into());
        Ok(())
    }
}

fn collect_values<I, S>(values: I, what: &str) -> Result<Vec<String>, HolderError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let values: Vec<String> = values.into_iter().map(Into::into).collect();
    if values.is_empty() {
        return Err(HolderError::InvalidArgument(format!(
            "at least one {what} is required"
        )));
    }
    if values.iter().any(String::is_empty) {
        return Err(HolderError::InvalidArgument(format!(
            "{what} must not be empty"
        )));
    }
    Ok(values)
}

// =============================================================================
// TESTS
// =============================================================================
