use std::collections::BTreeMap;

/// The configuration a stage receives in [`Stage::init`](crate::Stage::init).
///
/// A snapshot of the holder's name and init parameters, taken at start.
/// Later changes to the holder do not show through; the next start builds
/// a new view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigView {
    stage_name: String,
    init_params: BTreeMap<String, String>,
}

impl ConfigView {
    pub(crate) fn new(stage_name: String, init_params: BTreeMap<String, String>) -> Self {
        Self {
            stage_name,
            init_params,
        }
    }

    /// The declared name of the stage.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Look up an init parameter. `None` for unknown keys.
    #[must_use]
    pub fn init_parameter(&self, key: &str) -> Option<&str> {
        self.init_params.get(key).map(String::as_str)
    }

    /// Iterate init parameter names in order.
    pub fn init_parameter_names(&self) -> impl Iterator<Item = &str> {
        self.init_params.keys().map(String::as_str)
    }
}
