//! # Lifecycle Tier Tests (T0-T4)
//!
//! ## Tiers
//! - T0: Binding
//! - T1: Start / Stop
//! - T2: Decoration
//! - T3: Teardown Failures
//! - T4: Registration

use stagehold_core::{
    BoxError, ConfigView, DispatchContext, DispatchSet, ErrorKind, Exchange, Flow, HolderState,
    LocalPipeline, MappingTarget, Pipeline, Placement, Stage, StageCatalog, StageClass,
    StageDecorator, StageHolder,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// FIXTURES
// =============================================================================

/// A stage that counts its lifecycle calls and remembers the name it was
/// initialized with.
#[derive(Default)]
struct Probe {
    inits: AtomicUsize,
    destroys: AtomicUsize,
    seen_name: Mutex<Option<String>>,
}

impl Stage for Probe {
    fn init(&self, config: &ConfigView) -> Result<(), BoxError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        *self.seen_name.lock().expect("name lock") = Some(config.stage_name().to_string());
        Ok(())
    }

    fn process(&self, exchange: &mut Exchange) -> Result<Flow, BoxError> {
        exchange.set_attribute("probe", "seen");
        Ok(Flow::Continue)
    }

    fn destroy(&self) -> Result<(), BoxError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FailingInit {
    destroys: AtomicUsize,
}

impl Stage for FailingInit {
    fn init(&self, _config: &ConfigView) -> Result<(), BoxError> {
        Err("missing credentials".into())
    }

    fn process(&self, _exchange: &mut Exchange) -> Result<Flow, BoxError> {
        Ok(Flow::Halt)
    }

    fn destroy(&self) -> Result<(), BoxError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FailingDestroy {
    destroys: AtomicUsize,
}

impl Stage for FailingDestroy {
    fn init(&self, _config: &ConfigView) -> Result<(), BoxError> {
        Ok(())
    }

    fn process(&self, _exchange: &mut Exchange) -> Result<Flow, BoxError> {
        Ok(Flow::Continue)
    }

    fn destroy(&self) -> Result<(), BoxError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Err("socket already closed".into())
    }
}

fn pipeline() -> Arc<LocalPipeline> {
    Arc::new(LocalPipeline::new())
}

/// Run `f` under a subscriber that writes into a buffer; return the output.
fn capture_logs<F: FnOnce()>(f: F) -> String {
    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("log lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().expect("log lock").clone();
    String::from_utf8(bytes).expect("utf8 log output")
}

// =============================================================================
// TIER T0: BINDING
// =============================================================================

mod t0_binding {
    use super::*;

    /// T0.1: A bound instance is reused, never re-instantiated.
    #[test]
    fn bound_instance_is_returned_unchanged() {
        let stage = Arc::new(Probe::default());
        let holder = StageHolder::new(pipeline());
        holder.bind_instance(stage.clone()).expect("bind");

        holder.start().expect("start");
        let live = holder.instance().expect("instance");
        let expected: Arc<dyn Stage> = stage.clone();

        assert!(Arc::ptr_eq(&live, &expected));
        assert_eq!(stage.inits.load(Ordering::SeqCst), 1);
    }

    /// T0.2: Binding an instance names the holder after its type.
    #[test]
    fn instance_binding_sets_default_name() {
        let holder = StageHolder::with_instance(pipeline(), Arc::new(Probe::default()));
        assert!(holder.name().expect("name").ends_with("Probe"));
        assert_eq!(holder.state(), HolderState::Bound);
    }

    /// T0.3: An explicit name survives later binding.
    #[test]
    fn explicit_name_wins() {
        let holder = StageHolder::new(pipeline());
        holder.set_name("audit");
        holder.bind_class(StageClass::of::<Probe>()).expect("bind");
        assert_eq!(holder.to_string(), "audit");
    }

    /// T0.4: Binding is rejected while started.
    #[test]
    fn rebinding_started_holder_fails() {
        let holder = StageHolder::with_class(pipeline(), StageClass::of::<Probe>());
        holder.start().expect("start");

        let err = holder
            .bind_class(StageClass::of::<Probe>())
            .err()
            .expect("should fail");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert!(holder.is_started());
    }
}

// =============================================================================
// TIER T1: START / STOP
// =============================================================================

mod t1_start_stop {
    use super::*;

    /// T1.1: Start then stop restores the pre-start observable state.
    #[test]
    fn round_trip_container_instance() {
        let holder = StageHolder::with_class(pipeline(), StageClass::of::<Probe>());
        let before = (holder.state(), holder.instance().is_none(), holder.config().is_none());

        holder.start().expect("start");
        assert_eq!(holder.state(), HolderState::Started);
        assert!(holder.instance().is_some());
        assert!(holder.config().is_some());

        holder.stop();
        let after = (holder.state(), holder.instance().is_none(), holder.config().is_none());
        assert_eq!(before, after);
    }

    /// T1.2: External instances are retained across stop.
    #[test]
    fn round_trip_external_instance() {
        let stage = Arc::new(Probe::default());
        let holder = StageHolder::with_instance(pipeline(), stage.clone());

        holder.start().expect("start");
        holder.stop();

        let retained = holder.instance().expect("retained");
        let expected: Arc<dyn Stage> = stage.clone();
        assert!(Arc::ptr_eq(&retained, &expected));
        assert_eq!(stage.destroys.load(Ordering::SeqCst), 1);
        assert!(holder.config().is_none());
    }

    /// T1.3: A name that resolves to a non-stage component is a type mismatch.
    #[test]
    fn non_stage_class_is_type_mismatch() {
        let mut catalog = StageCatalog::new();
        catalog.register_component("StatusEndpoint", "endpoint");
        let holder = StageHolder::new(Arc::new(LocalPipeline::with_loader(catalog)));
        holder.bind_class_name("StatusEndpoint").expect("bind");

        let err = holder.start().err().expect("should fail");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(holder.state(), HolderState::Bound);
    }

    /// T1.4: An unknown class name is a configuration error.
    #[test]
    fn unknown_class_is_configuration_error() {
        let holder = StageHolder::new(pipeline());
        holder.bind_class_name("com.example.Missing").expect("bind");

        let err = holder.start().err().expect("should fail");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!holder.is_started());
    }

    /// T1.5: Instantiation failure leaves the holder stopped; a retry can succeed.
    #[test]
    fn instantiation_failure_is_retryable() {
        let ready = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&ready);
        let class = StageClass::from_fn("gated", move || {
            if gate.load(Ordering::SeqCst) {
                Ok(Arc::new(Probe::default()) as Arc<dyn Stage>)
            } else {
                Err("database unavailable".into())
            }
        });
        let holder = StageHolder::with_class(pipeline(), class);

        let err = holder.start().err().expect("should fail");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("database unavailable"));
        assert_eq!(holder.state(), HolderState::Bound);
        assert!(holder.instance().is_none());

        ready.store(true, Ordering::SeqCst);
        holder.start().expect("retry");
        assert!(holder.is_started());
    }

    /// T1.6: A failing init propagates and the holder is not started.
    #[test]
    fn init_failure_propagates() {
        let holder = StageHolder::with_instance(pipeline(), Arc::new(FailingInit::default()));

        let err = holder.start().err().expect("should fail");
        assert_eq!(err.kind(), ErrorKind::Stage);
        assert!(std::error::Error::source(&err).is_some());
        assert!(!holder.is_started());
        assert!(holder.config().is_none());
    }

    /// T1.7: Init sees the declared name and parameters.
    #[test]
    fn init_receives_config_view() {
        let stage = Arc::new(Probe::default());
        let holder = StageHolder::with_instance(pipeline(), stage.clone());
        holder.set_name("audit");
        holder.set_init_parameter("sink", "stdout");

        holder.start().expect("start");

        assert_eq!(
            stage.seen_name.lock().expect("name lock").as_deref(),
            Some("audit")
        );
        let config = holder.config().expect("config");
        assert_eq!(config.init_parameter("sink"), Some("stdout"));
        assert_eq!(config.init_parameter("absent"), None);
    }
}

// =============================================================================
// TIER T2: DECORATION
// =============================================================================

mod t2_decoration {
    use super::*;

    /// Wraps a stage and tags every exchange it processes.
    struct Tagged {
        inner: Arc<dyn Stage>,
    }

    impl Stage for Tagged {
        fn init(&self, config: &ConfigView) -> Result<(), BoxError> {
            self.inner.init(config)
        }

        fn process(&self, exchange: &mut Exchange) -> Result<Flow, BoxError> {
            exchange.set_attribute("tagged", "yes");
            self.inner.process(exchange)
        }

        fn destroy(&self) -> Result<(), BoxError> {
            self.inner.destroy()
        }
    }

    #[derive(Default)]
    struct Tagger {
        undecorated: AtomicUsize,
    }

    impl StageDecorator for Tagger {
        fn decorate(&self, stage: Arc<dyn Stage>) -> Result<Arc<dyn Stage>, BoxError> {
            Ok(Arc::new(Tagged { inner: stage }))
        }

        fn undecorate(&self, _stage: &Arc<dyn Stage>) -> Result<(), BoxError> {
            self.undecorated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Refuser;

    impl StageDecorator for Refuser {
        fn decorate(&self, _stage: Arc<dyn Stage>) -> Result<Arc<dyn Stage>, BoxError> {
            Err("injection target missing".into())
        }
    }

    /// T2.1: The decorated instance is the live one while started.
    #[test]
    fn decorated_instance_is_live() {
        let tagger = Arc::new(Tagger::default());
        let pipeline = Arc::new(LocalPipeline::new().with_decorator(tagger.clone()));
        let stage = Arc::new(Probe::default());
        let holder = StageHolder::with_instance(pipeline, stage.clone());

        holder.start().expect("start");
        let live = holder.instance().expect("instance");
        let mut exchange = Exchange::new("/api/items");
        assert_eq!(live.process(&mut exchange).expect("process"), Flow::Continue);
        assert_eq!(exchange.attribute("tagged"), Some("yes"));
        assert_eq!(exchange.attribute("probe"), Some("seen"));
        assert_eq!(stage.inits.load(Ordering::SeqCst), 1);

        holder.stop();
        assert_eq!(tagger.undecorated.load(Ordering::SeqCst), 1);
        assert_eq!(stage.destroys.load(Ordering::SeqCst), 1);

        // The undecorated original is what survives the stop.
        let retained = holder.instance().expect("retained");
        let expected: Arc<dyn Stage> = stage.clone();
        assert!(Arc::ptr_eq(&retained, &expected));
    }

    /// T2.2: A restart decorates the original again, not the old wrapper.
    #[test]
    fn restart_does_not_stack_wrappers() {
        let pipeline =
            Arc::new(LocalPipeline::new().with_decorator(Arc::new(Tagger::default())));
        let stage = Arc::new(Probe::default());
        let holder = StageHolder::with_instance(pipeline, stage.clone());

        holder.start().expect("start");
        holder.stop();
        holder.start().expect("restart");

        assert_eq!(stage.inits.load(Ordering::SeqCst), 2);
        let live = holder.instance().expect("instance");
        let expected: Arc<dyn Stage> = stage.clone();
        assert!(!Arc::ptr_eq(&live, &expected));
    }

    /// T2.3: A failing decorator aborts the start.
    #[test]
    fn decorator_failure_aborts_start() {
        let pipeline = Arc::new(LocalPipeline::new().with_decorator(Arc::new(Refuser)));
        let stage = Arc::new(Probe::default());
        let holder = StageHolder::with_instance(pipeline, stage.clone());

        let err = holder.start().err().expect("should fail");
        assert_eq!(err.kind(), ErrorKind::Stage);
        assert_eq!(stage.inits.load(Ordering::SeqCst), 0);
        assert!(!holder.is_started());
    }

    /// T2.4: Decorators that ran before a failing one are undone.
    #[test]
    fn partial_decoration_is_rolled_back() {
        let tagger = Arc::new(Tagger::default());
        let pipeline = Arc::new(
            LocalPipeline::new()
                .with_decorator(tagger.clone())
                .with_decorator(Arc::new(Refuser)),
        );
        let holder = StageHolder::with_instance(pipeline, Arc::new(Probe::default()));

        assert!(holder.start().is_err());
        assert_eq!(tagger.undecorated.load(Ordering::SeqCst), 1);

        holder.stop();
        assert_eq!(tagger.undecorated.load(Ordering::SeqCst), 1);
    }
}

// =============================================================================
// TIER T3: TEARDOWN FAILURES
// =============================================================================

mod t3_teardown_failures {
    use super::*;

    /// Passes stages through; counts undecorations and may refuse them.
    #[derive(Default)]
    struct Sticky {
        undecorated: AtomicUsize,
        refuse: bool,
    }

    impl StageDecorator for Sticky {
        fn decorate(&self, stage: Arc<dyn Stage>) -> Result<Arc<dyn Stage>, BoxError> {
            Ok(stage)
        }

        fn undecorate(&self, _stage: &Arc<dyn Stage>) -> Result<(), BoxError> {
            self.undecorated.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err("injection still referenced".into());
            }
            Ok(())
        }
    }

    /// T3.1: A failing destroy is logged; stop still completes.
    #[test]
    fn destroy_failure_is_logged_not_returned() {
        let holder =
            StageHolder::with_class(pipeline(), StageClass::of::<FailingDestroy>());
        holder.set_name("flaky");
        holder.start().expect("start");

        let logs = capture_logs(|| holder.stop());

        assert!(logs.contains("stage destroy failed"));
        assert!(logs.contains("socket already closed"));
        assert!(logs.contains("flaky"));
        assert!(holder.instance().is_none());
        assert!(holder.config().is_none());
        assert_eq!(holder.state(), HolderState::Bound);
    }

    /// T3.2: A failing destroy does not block the next start.
    #[test]
    fn restart_after_destroy_failure() {
        let stage = Arc::new(FailingDestroy::default());
        let holder = StageHolder::with_instance(pipeline(), stage.clone());

        holder.start().expect("start");
        holder.stop();
        holder.start().expect("restart");
        holder.stop();

        assert_eq!(stage.destroys.load(Ordering::SeqCst), 2);
    }

    /// T3.3: Lifecycle transitions are logged at debug level.
    #[test]
    fn lifecycle_is_logged() {
        let holder = StageHolder::with_class(pipeline(), StageClass::of::<Probe>());
        holder.set_name("audit");

        let logs = capture_logs(|| {
            holder.start().expect("start");
            holder.stop();
        });

        assert!(logs.contains("stage started"));
        assert!(logs.contains("stage stopped"));
    }

    /// T3.4: A failing undecorate is logged; stop still completes.
    #[test]
    fn undecorate_failure_is_logged_not_returned() {
        let sticky = Arc::new(Sticky {
            undecorated: AtomicUsize::new(0),
            refuse: true,
        });
        let pipeline = Arc::new(LocalPipeline::new().with_decorator(sticky.clone()));
        let holder = StageHolder::with_class(pipeline, StageClass::of::<Probe>());
        holder.set_name("injected");
        holder.start().expect("start");

        let logs = capture_logs(|| holder.stop());

        assert!(logs.contains("stage undecorate failed"));
        assert!(logs.contains("injection still referenced"));
        assert!(logs.contains("injected"));
        assert_eq!(sticky.undecorated.load(Ordering::SeqCst), 1);
        assert!(holder.instance().is_none());
        assert!(holder.config().is_none());
        assert_eq!(holder.state(), HolderState::Bound);
    }

    /// T3.5: A failed init undoes decoration once and never calls destroy.
    #[test]
    fn init_failure_undecorates_without_destroy() {
        let sticky = Arc::new(Sticky::default());
        let pipeline = Arc::new(LocalPipeline::new().with_decorator(sticky.clone()));
        let stage = Arc::new(FailingInit::default());
        let holder = StageHolder::with_instance(pipeline, stage.clone());

        let err = holder.start().err().expect("should fail");
        assert_eq!(err.kind(), ErrorKind::Stage);
        assert_eq!(sticky.undecorated.load(Ordering::SeqCst), 1);
        assert_eq!(stage.destroys.load(Ordering::SeqCst), 0);

        holder.stop();
        assert_eq!(sticky.undecorated.load(Ordering::SeqCst), 1);
        assert_eq!(stage.destroys.load(Ordering::SeqCst), 0);
    }
}

// =============================================================================
// TIER T4: REGISTRATION
// =============================================================================

mod t4_registration {
    use super::*;

    /// T4.1: Declarations after pipeline start fail and change nothing.
    #[test]
    fn mapping_after_start_is_illegal() {
        let pipeline = pipeline();
        let holder = StageHolder::with_class(pipeline.clone(), StageClass::of::<Probe>());
        holder
            .registration()
            .add_mapping_for_target_names(DispatchContext::Request, Placement::Append, ["api"])
            .expect("before start");

        pipeline.mark_started();
        holder.start().expect("start");

        let err = holder
            .registration()
            .add_mapping_for_target_names(DispatchContext::Request, Placement::Append, ["late"])
            .err()
            .expect("should fail");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert_eq!(pipeline.mappings().len(), 1);
        assert_eq!(
            holder.registration().target_name_mappings().to_vec(),
            vec!["api"]
        );
    }

    /// T4.2: Prepended mappings precede appended ones; appends keep call order.
    #[test]
    fn prepend_precedes_append() {
        let pipeline = pipeline();
        let holder = StageHolder::with_class(pipeline.clone(), StageClass::of::<Probe>());
        let reg = holder.registration();

        reg.add_mapping_for_target_names(DispatchSet::empty(), Placement::Append, ["first"])
            .expect("add");
        reg.add_mapping_for_target_names(DispatchSet::empty(), Placement::Append, ["second"])
            .expect("add");
        reg.add_mapping_for_target_names(DispatchSet::empty(), Placement::Prepend, ["urgent"])
            .expect("add");

        assert_eq!(
            reg.target_name_mappings().to_vec(),
            vec!["urgent", "first", "second"]
        );
    }

    /// T4.3: URL-pattern queries only see this holder's pattern records.
    #[test]
    fn url_patterns_filtered_to_holder() {
        let pipeline = pipeline();
        let mine = StageHolder::with_class(pipeline.clone(), StageClass::of::<Probe>());
        let other = StageHolder::with_class(pipeline.clone(), StageClass::of::<Probe>());

        for i in 0..20 {
            other
                .registration()
                .add_mapping_for_url_patterns(
                    DispatchContext::Request,
                    Placement::Append,
                    [format!("/other/{i}")],
                )
                .expect("add");
        }
        mine.registration()
            .add_mapping_for_target_names(DispatchContext::Request, Placement::Append, ["named"])
            .expect("add");
        mine.registration()
            .add_mapping_for_url_patterns(DispatchContext::Error, Placement::Prepend, ["/err/*"])
            .expect("add");

        assert_eq!(
            mine.registration().url_pattern_mappings().to_vec(),
            vec!["/err/*"]
        );
        assert_eq!(pipeline.mappings().len(), 22);
    }

    /// T4.4: The restart scenario keeps the name and does not duplicate mappings.
    #[test]
    fn restart_keeps_name_and_mappings() {
        let pipeline = pipeline();
        let holder = StageHolder::with_class(pipeline.clone(), StageClass::of::<Probe>());
        holder.set_name("audit");
        holder
            .registration()
            .add_mapping_for_url_patterns(
                DispatchSet::only(DispatchContext::Request),
                Placement::Append,
                ["/api/*"],
            )
            .expect("add");

        pipeline.mark_started();
        holder.start().expect("start");
        holder.stop();
        holder.start().expect("restart");

        assert_eq!(holder.config().expect("config").stage_name(), "audit");
        assert_eq!(pipeline.mappings().len(), 1);
        assert_eq!(
            holder.registration().url_pattern_mappings().to_vec(),
            vec!["/api/*"]
        );
    }

    /// T4.5: Removing a holder's records leaves the others in place.
    #[test]
    fn remove_holder_records() {
        let pipeline = pipeline();
        let a = StageHolder::with_class(pipeline.clone(), StageClass::of::<Probe>());
        let b = StageHolder::with_class(pipeline.clone(), StageClass::of::<Probe>());
        a.registration()
            .add_mapping_for_url_patterns(DispatchContext::Request, Placement::Append, ["/a"])
            .expect("add");
        b.registration()
            .add_mapping_for_url_patterns(DispatchContext::Request, Placement::Append, ["/b"])
            .expect("add");

        assert_eq!(pipeline.mappings().remove_holder(a.id()), 1);
        assert!(a.registration().url_pattern_mappings().is_empty());
        assert_eq!(b.registration().url_pattern_mappings().to_vec(), vec!["/b"]);
    }
}

// =============================================================================
// DECLARATIONS FROM TOML
// =============================================================================

mod declarations {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Deserialize)]
    struct StageDeclaration {
        name: String,
        #[serde(default)]
        init: BTreeMap<String, String>,
        #[serde(default)]
        mappings: Vec<MappingDeclaration>,
    }

    #[derive(Debug, Deserialize)]
    struct MappingDeclaration {
        #[serde(default)]
        dispatch: DispatchSet,
        placement: Placement,
        target: MappingTarget,
    }

    const DECLARATION: &str = r#"
        name = "audit"

        [init]
        sink = "stdout"

        [[mappings]]
        dispatch = ["request", "forward"]
        placement = "append"
        target = { url_patterns = ["/api/*"] }

        [[mappings]]
        placement = "prepend"
        target = { target_names = ["admin"] }
    "#;

    /// A declaration loaded by the framework drives holder setup.
    #[test]
    fn apply_declaration() {
        let declaration: StageDeclaration = toml::from_str(DECLARATION).expect("parse");
        let pipeline = pipeline();
        let holder = StageHolder::with_class(pipeline.clone(), StageClass::of::<Probe>());
        holder.set_name(declaration.name.clone());
        holder.set_init_parameters(declaration.init);

        for mapping in declaration.mappings {
            let reg = holder.registration();
            let declared = match mapping.target {
                MappingTarget::UrlPatterns(patterns) => {
                    reg.add_mapping_for_url_patterns(mapping.dispatch, mapping.placement, patterns)
                }
                MappingTarget::TargetNames(names) => {
                    reg.add_mapping_for_target_names(mapping.dispatch, mapping.placement, names)
                }
            };
            declared.expect("declare");
        }

        let records = pipeline.mappings().all();
        assert_eq!(records.len(), 2);
        assert!(records[0].matches_target_name("admin"));
        assert!(records[0].applies_to(DispatchContext::Request));
        assert!(records[1].applies_to(DispatchContext::Forward));
        assert!(!records[1].applies_to(DispatchContext::Include));

        holder.start().expect("start");
        let config = holder.config().expect("config");
        assert_eq!(config.stage_name(), "audit");
        assert_eq!(config.init_parameter("sink"), Some("stdout"));
    }
}
