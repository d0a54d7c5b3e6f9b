//! # Holder Module
//!
//! [`StageHolder`] owns the lifecycle of one stage.
//!
//! ## State Machine
//!
//! | From | Operation | To | Notes |
//! |------|-----------|----|-------|
//! | Unbound | `bind_*` | Bound | |
//! | Bound | `start` | Started | instantiate (class) or reuse (instance), decorate, init |
//! | Bound | `start` fails | Bound | error returned, start may be retried |
//! | Started | `stop` | Bound | destroy, undecorate; container instances released |
//! | Bound | `stop` | Bound | no-op |
//!
//! `start` and `stop` are serialized by the pipeline. The internal lock only
//! keeps binding and instance reads atomic; it is never held while stage or
//! collaborator code runs.

mod config;
mod registration;

pub use config::ConfigView;
pub use registration::Registration;

use crate::{HolderError, HolderId, Pipeline, Stage, StageClass};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// =============================================================================
// STATE
// =============================================================================

/// Externally observable lifecycle state of a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderState {
    /// Neither a class nor an instance is bound.
    Unbound,
    /// Bound and stopped.
    Bound,
    /// Started: an instance is live and a config view exists.
    Started,
}

/// What the holder runs.
#[derive(Clone)]
enum Source {
    Unbound,
    /// A class name, resolved through the pipeline's loader on each start.
    ClassName(String),
    /// A class; the container creates (and releases) instances.
    Class(StageClass),
    /// A caller-supplied instance; kept across restarts.
    Instance(Arc<dyn Stage>),
}

struct Inner {
    name: Option<String>,
    display_name: Option<String>,
    description: Option<String>,
    async_supported: bool,
    init_params: BTreeMap<String, String>,
    source: Source,
    /// The instance in use while started (after decoration).
    live: Option<Arc<dyn Stage>>,
    config: Option<Arc<ConfigView>>,
}

impl Inner {
    fn state(&self) -> HolderState {
        if self.config.is_some() {
            HolderState::Started
        } else if matches!(self.source, Source::Unbound) {
            HolderState::Unbound
        } else {
            HolderState::Bound
        }
    }

    fn label(&self) -> String {
        self.name.clone().unwrap_or_default()
    }

    fn set_class(&mut self, id: HolderId, source: Source, class_name: &str) {
        if self.name.is_none() {
            self.name = Some(format!("{class_name}-{id}"));
        }
        self.source = source;
    }

    fn set_instance(&mut self, stage: Arc<dyn Stage>) {
        if self.name.is_none() {
            self.name = Some(stage.type_name().to_string());
        }
        self.source = Source::Instance(stage);
    }
}

// =============================================================================
// STAGE HOLDER
// =============================================================================

/// Lifecycle owner of one stage within a pipeline.
pub struct StageHolder {
    id: HolderId,
    pipeline: Arc<dyn Pipeline>,
    inner: Mutex<Inner>,
}

impl StageHolder {
    /// Create an unbound holder attached to `pipeline`.
    #[must_use]
    pub fn new(pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            id: HolderId::next(),
            pipeline,
            inner: Mutex::new(Inner {
                name: None,
                display_name: None,
                description: None,
                async_supported: false,
                init_params: BTreeMap::new(),
                source: Source::Unbound,
                live: None,
                config: None,
            }),
        }
    }

    /// Create a holder bound to a class.
    #[must_use]
    pub fn with_class(pipeline: Arc<dyn Pipeline>, class: StageClass) -> Self {
        let holder = Self::new(pipeline);
        {
            let mut inner = holder.lock();
            let class_name = class.name().to_string();
            inner.set_class(holder.id, Source::Class(class), &class_name);
        }
        holder
    }

    /// Create a holder bound to an existing instance.
    #[must_use]
    pub fn with_instance(pipeline: Arc<dyn Pipeline>, stage: Arc<dyn Stage>) -> Self {
        let holder = Self::new(pipeline);
        holder.lock().set_instance(stage);
        holder
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_stopped(inner: &Inner) -> Result<(), HolderError> {
        if inner.state() == HolderState::Started {
            return Err(HolderError::HolderStarted {
                holder: inner.label(),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Binding
    // -------------------------------------------------------------------------

    /// Bind a class. Each start creates a fresh instance from it.
    ///
    /// Names the holder `<class>-<id>` if no name is set yet. Binding races
    /// with a concurrent `start`; the pipeline serializes the two, and a
    /// binding that lands mid-start takes effect on the next start.
    pub fn bind_class(&self, class: StageClass) -> Result<(), HolderError> {
        let mut inner = self.lock();
        Self::ensure_stopped(&inner)?;
        let class_name = class.name().to_string();
        inner.set_class(self.id, Source::Class(class), &class_name);
        Ok(())
    }

    /// Bind a class by name, resolved through the pipeline's loader at start.
    pub fn bind_class_name(&self, class_name: impl Into<String>) -> Result<(), HolderError> {
        let class_name = class_name.into();
        let mut inner = self.lock();
        Self::ensure_stopped(&inner)?;
        inner.set_class(self.id, Source::ClassName(class_name.clone()), &class_name);
        Ok(())
    }

    /// Bind a caller-supplied instance.
    ///
    /// The instance is external: it survives stop and is reused by every
    /// later start. Names the holder after the instance's type if no name
    /// is set yet.
    pub fn bind_instance(&self, stage: Arc<dyn Stage>) -> Result<(), HolderError> {
        let mut inner = self.lock();
        Self::ensure_stopped(&inner)?;
        inner.set_instance(stage);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the stage: obtain an instance, decorate it, build the config
    /// view and call `init`.
    ///
    /// On any error the holder stays stopped.
    pub fn start(&self) -> Result<(), HolderError> {
        let (source, name, init_params) = {
            let inner = self.lock();
            Self::ensure_stopped(&inner)?;
            (inner.source.clone(), inner.label(), inner.init_params.clone())
        };

        tracing::debug!(stage = %name, "starting stage");

        let stage = match source {
            Source::Unbound => return Err(HolderError::NotBound { holder: name }),
            Source::Instance(stage) => stage,
            Source::ClassName(class_name) => {
                let class = self.pipeline.loader().load(&class_name)?;
                Self::instantiate(&class)?
            }
            Source::Class(class) => Self::instantiate(&class)?,
        };

        let stage = self
            .pipeline
            .decorate(stage)
            .map_err(|source| HolderError::Decoration {
                stage: name.clone(),
                source,
            })?;

        let config = Arc::new(ConfigView::new(name.clone(), init_params));
        if let Err(source) = stage.init(&config) {
            if let Err(e) = self.pipeline.undecorate(&stage) {
                tracing::warn!(stage = %name, error = %e, "undecorate after failed init failed");
            }
            return Err(HolderError::Init {
                stage: name,
                source,
            });
        }

        let mut inner = self.lock();
        inner.live = Some(stage);
        inner.config = Some(config);
        tracing::debug!(stage = %name, "stage started");
        Ok(())
    }

    fn instantiate(class: &StageClass) -> Result<Arc<dyn Stage>, HolderError> {
        class
            .instantiate()
            .map_err(|source| HolderError::Instantiation {
                class: class.name().to_string(),
                source,
            })
    }

    /// Stop the stage: call `destroy`, undecorate, drop the config view.
    ///
    /// Failures from `destroy` or undecorate are logged, never returned.
    /// Stopping a stopped holder does nothing.
    pub fn stop(&self) {
        let (stage, name) = {
            let mut inner = self.lock();
            inner.config = None;
            match inner.live.take() {
                Some(stage) => (stage, inner.label()),
                None => return,
            }
        };

        tracing::debug!(stage = %name, "stopping stage");

        if let Err(e) = stage.destroy() {
            tracing::warn!(stage = %name, error = %e, "stage destroy failed");
        }
        if let Err(e) = self.pipeline.undecorate(&stage) {
            tracing::warn!(stage = %name, error = %e, "stage undecorate failed");
        }

        tracing::debug!(stage = %name, "stage stopped");
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> HolderId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> HolderState {
        self.lock().state()
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state() == HolderState::Started
    }

    /// The current instance.
    ///
    /// While started this is the live (possibly decorated) instance. While
    /// stopped it is the bound external instance, or `None` for class
    /// bindings.
    #[must_use]
    pub fn instance(&self) -> Option<Arc<dyn Stage>> {
        let inner = self.lock();
        inner.live.clone().or_else(|| match &inner.source {
            Source::Instance(stage) => Some(Arc::clone(stage)),
            _ => None,
        })
    }

    /// The config view of the running stage, `None` while stopped.
    #[must_use]
    pub fn config(&self) -> Option<Arc<ConfigView>> {
        self.lock().config.clone()
    }

    /// A registration view bound to this holder.
    #[must_use]
    pub fn registration(&self) -> Registration<'_> {
        Registration::new(self)
    }

    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.lock().name.clone()
    }

    /// Set the declared name. A running stage keeps the name it started with.
    pub fn set_name(&self, name: impl Into<String>) {
        self.lock().name = Some(name.into());
    }

    /// Name of the bound class, or the type name of a bound instance.
    #[must_use]
    pub fn class_name(&self) -> Option<String> {
        match &self.lock().source {
            Source::Unbound => None,
            Source::ClassName(name) => Some(name.clone()),
            Source::Class(class) => Some(class.name().to_string()),
            Source::Instance(stage) => Some(stage.type_name().to_string()),
        }
    }

    /// Whether the bound stage was supplied by the caller.
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self.lock().source, Source::Instance(_))
    }

    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.lock().display_name.clone()
    }

    pub fn set_display_name(&self, display_name: impl Into<String>) {
        self.lock().display_name = Some(display_name.into());
    }

    #[must_use]
    pub fn description(&self) -> Option<String> {
        self.lock().description.clone()
    }

    #[must_use]
    pub fn is_async_supported(&self) -> bool {
        self.lock().async_supported
    }

    pub fn set_async_supported(&self, supported: bool) {
        self.lock().async_supported = supported;
    }

    #[must_use]
    pub fn init_parameter(&self, key: &str) -> Option<String> {
        self.lock().init_params.get(key).cloned()
    }

    #[must_use]
    pub fn init_parameters(&self) -> BTreeMap<String, String> {
        self.lock().init_params.clone()
    }

    /// Set one init parameter, replacing any previous value.
    pub fn set_init_parameter(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().init_params.insert(key.into(), value.into());
    }

    /// Replace all init parameters.
    pub fn set_init_parameters(&self, params: BTreeMap<String, String>) {
        self.lock().init_params = params;
    }

    pub(crate) fn pipeline(&self) -> &dyn Pipeline {
        self.pipeline.as_ref()
    }
}

impl std::fmt::Display for StageHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.lock().label())
    }
}

impl std::fmt::Debug for StageHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StageHolder")
            .field("id", &self.id)
            .field("name", &inner.name)
            .field("state", &inner.state())
            .field("init_params", &inner.init_params)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
