//! Integration tests for the environment kernel: identity, relations,
//! transform resolution, update propagation, and event delivery.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use veldt_core::{
    output_as_mut, unique_input, unique_output_id, CartesianMap, EnvError, Event, EventHandler,
    Frame, HandlerError, Item, ItemCore, ItemId, Layer, LayerState, LinkChange, Operator,
    OperatorContext, OperatorError, StorageError,
};
use veldt_env::Environment;
use veldt_transform::translation;

// ── Test items ─────────────────────────────────────────────────

/// A plain layer holding nothing but its flags.
struct TestLayer {
    core: ItemCore,
    state: LayerState,
}

impl TestLayer {
    fn new(id: &str) -> Box<Self> {
        Box::new(Self {
            core: ItemCore::new(id),
            state: LayerState::new(),
        })
    }
}

impl Item for TestLayer {
    fn core(&self) -> &ItemCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }
    fn class_tag(&self) -> &'static str {
        "test::Layer"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn as_layer(&self) -> Option<&dyn Layer> {
        Some(self)
    }
    fn as_layer_mut(&mut self) -> Option<&mut dyn Layer> {
        Some(self)
    }
    fn serialize(&self, _sink: &mut dyn veldt_core::ItemSink) -> Result<(), StorageError> {
        Ok(())
    }
}

impl Layer for TestLayer {
    fn layer_state(&self) -> &LayerState {
        &self.state
    }
    fn layer_state_mut(&mut self) -> &mut LayerState {
        &mut self.state
    }
}

/// A cartesian map holding a vector of samples.
struct TestMap {
    core: ItemCore,
    state: LayerState,
    requested_frame: Option<ItemId>,
    values: Vec<f64>,
}

impl TestMap {
    fn new(id: &str) -> Box<Self> {
        Box::new(Self {
            core: ItemCore::new(id),
            state: LayerState::new(),
            requested_frame: None,
            values: Vec::new(),
        })
    }

    fn with_frame(id: &str, frame: &ItemId) -> Box<Self> {
        let mut map = Self::new(id);
        map.requested_frame = Some(frame.clone());
        map
    }

    fn with_values(id: &str, values: Vec<f64>) -> Box<Self> {
        let mut map = Self::new(id);
        map.values = values;
        map
    }
}

impl Item for TestMap {
    fn core(&self) -> &ItemCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }
    fn class_tag(&self) -> &'static str {
        "test::Map"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn as_layer(&self) -> Option<&dyn Layer> {
        Some(self)
    }
    fn as_layer_mut(&mut self) -> Option<&mut dyn Layer> {
        Some(self)
    }
    fn serialize(&self, _sink: &mut dyn veldt_core::ItemSink) -> Result<(), StorageError> {
        Ok(())
    }
}

impl Layer for TestMap {
    fn layer_state(&self) -> &LayerState {
        &self.state
    }
    fn layer_state_mut(&mut self) -> &mut LayerState {
        &mut self.state
    }
    fn as_cartesian(&self) -> Option<&dyn CartesianMap> {
        Some(self)
    }
    fn as_cartesian_mut(&mut self) -> Option<&mut dyn CartesianMap> {
        Some(self)
    }
}

impl CartesianMap for TestMap {
    fn dimension(&self) -> u32 {
        3
    }
    fn requested_frame(&self) -> Option<&ItemId> {
        self.requested_frame.as_ref()
    }
}

/// Sums the unique `TestMap` input into the unique `TestMap` output and
/// counts its own invocations.
struct SumOperator {
    core: ItemCore,
    runs: usize,
}

impl SumOperator {
    fn new(id: &str) -> Box<Self> {
        Box::new(Self {
            core: ItemCore::new(id),
            runs: 0,
        })
    }
}

impl Item for SumOperator {
    fn core(&self) -> &ItemCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }
    fn class_tag(&self) -> &'static str {
        "test::SumOperator"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn as_operator(&self) -> Option<&dyn Operator> {
        Some(self)
    }
    fn as_operator_mut(&mut self) -> Option<&mut dyn Operator> {
        Some(self)
    }
    fn serialize(&self, _sink: &mut dyn veldt_core::ItemSink) -> Result<(), StorageError> {
        Ok(())
    }
}

impl Operator for SumOperator {
    fn input_arity(&self) -> usize {
        1
    }
    fn output_arity(&self) -> usize {
        1
    }
    fn update(&mut self, ctx: &mut dyn OperatorContext) -> Result<(), OperatorError> {
        self.runs += 1;
        let total: f64 = unique_input::<TestMap>(ctx)?.values.iter().sum();
        let out_id = unique_output_id::<TestMap>(ctx)?;
        output_as_mut::<TestMap>(ctx, &out_id)?.values = vec![total];
        Ok(())
    }
}

/// An operator whose hook always fails.
struct FailingOperator {
    core: ItemCore,
}

impl FailingOperator {
    fn new(id: &str) -> Box<Self> {
        Box::new(Self {
            core: ItemCore::new(id),
        })
    }
}

impl Item for FailingOperator {
    fn core(&self) -> &ItemCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }
    fn class_tag(&self) -> &'static str {
        "test::FailingOperator"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn as_operator(&self) -> Option<&dyn Operator> {
        Some(self)
    }
    fn as_operator_mut(&mut self) -> Option<&mut dyn Operator> {
        Some(self)
    }
    fn serialize(&self, _sink: &mut dyn veldt_core::ItemSink) -> Result<(), StorageError> {
        Ok(())
    }
}

impl Operator for FailingOperator {
    fn update(&mut self, _ctx: &mut dyn OperatorContext) -> Result<(), OperatorError> {
        Err(OperatorError::ExecutionFailed {
            reason: "always fails".to_owned(),
        })
    }
}

/// Records every event it sees into a shared buffer.
struct Recorder {
    seen: Rc<RefCell<Vec<Event>>>,
}

impl EventHandler for Recorder {
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        self.seen.borrow_mut().push(event.clone());
        Ok(())
    }
}

fn recorder() -> (Box<Recorder>, Rc<RefCell<Vec<Event>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    (
        Box::new(Recorder { seen: seen.clone() }),
        seen,
    )
}

// ── Identity ───────────────────────────────────────────────────

#[test]
fn trailing_slash_ids_get_increasing_suffixes() {
    let mut env = Environment::new();
    let a = env.attach(TestMap::new("cloud/")).unwrap();
    let b = env.attach(TestMap::new("cloud/")).unwrap();
    assert_eq!(a.as_str(), "/cloud0");
    assert_eq!(b.as_str(), "/cloud1");
    assert!(a.numeric_suffix().unwrap() < b.numeric_suffix().unwrap());
}

#[test]
fn verbatim_id_collision_is_rejected() {
    let mut env = Environment::new();
    env.attach(TestLayer::new("grid")).unwrap();
    let err = env.attach(TestLayer::new("grid")).unwrap_err();
    assert!(matches!(err, EnvError::DuplicateId { .. }));
    // The failed attach left the environment unchanged.
    assert_eq!(env.item_count(), 2); // root + grid
}

#[test]
fn prefix_is_normalized_and_prepended() {
    let mut env = Environment::with_prefix("scan");
    assert_eq!(env.prefix(), "/scan/");
    let id = env.attach(TestLayer::new("grid")).unwrap();
    assert_eq!(id.as_str(), "/scan/grid");
    assert_eq!(env.root_frame().as_str(), "/scan/root");
}

#[test]
fn every_attached_item_is_reachable_by_its_id() {
    let mut env = Environment::new();
    let ids = vec![
        env.attach(TestLayer::new("a")).unwrap(),
        env.attach(TestMap::new("b/")).unwrap(),
        env.attach(SumOperator::new("op")).unwrap(),
    ];
    for id in &ids {
        let item = env.get_item(id).unwrap();
        assert_eq!(item.core().id(), Some(id));
    }
}

#[test]
fn detach_returns_ownership_and_clears_relations() {
    let mut env = Environment::new();
    let map = env.attach(TestMap::new("m")).unwrap();
    assert!(env.frame_of_map(&map).is_some());
    let item = env.detach(&map).unwrap();
    assert!(!item.core().is_attached());
    assert!(env.get_item(&map).is_none());
    assert!(env.frame_of_map(&map).is_none());
}

#[test]
fn reattach_after_detach_keeps_the_assigned_id() {
    let mut env = Environment::new();
    let id = env.attach(TestLayer::new("grid")).unwrap();
    let item = env.detach(&id).unwrap();
    let back = env.attach(item).unwrap();
    assert_eq!(back, id);
}

// ── Typed lookup ───────────────────────────────────────────────

#[test]
fn singleton_lookup_finds_unique_match() {
    let mut env = Environment::new();
    env.attach(TestLayer::new("only")).unwrap();
    assert!(env.get::<TestLayer>().is_ok());
}

#[test]
fn singleton_lookup_rejects_ambiguity_and_absence() {
    let mut env = Environment::new();
    assert!(matches!(
        env.get::<TestLayer>(),
        Err(EnvError::NotFound { .. })
    ));
    env.attach(TestLayer::new("a")).unwrap();
    env.attach(TestLayer::new("b")).unwrap();
    assert!(matches!(
        env.get::<TestLayer>(),
        Err(EnvError::AmbiguousLookup { .. })
    ));
}

#[test]
fn get_with_id_checks_the_class() {
    let mut env = Environment::new();
    let id = env.attach(TestLayer::new("a")).unwrap();
    assert!(env.get_with_id::<TestLayer>(&id).is_some());
    assert!(env.get_with_id::<TestMap>(&id).is_none());
}

// ── Frame tree ─────────────────────────────────────────────────

fn three_frame_env() -> (Environment, ItemId, ItemId) {
    let mut env = Environment::new();
    let root = env.root_frame().clone();
    let a = env
        .attach(Box::new(Frame::with_transform("a", translation(1.0, 0.0, 0.0))))
        .unwrap();
    let b = env
        .attach(Box::new(Frame::with_transform("b", translation(0.0, 2.0, 0.0))))
        .unwrap();
    env.add_frame_child(&root, &a).unwrap();
    env.add_frame_child(&a, &b).unwrap();
    (env, a, b)
}

#[test]
fn relative_transform_composes_through_the_lca() {
    let (env, _a, b) = three_frame_env();
    let root = env.root_frame().clone();
    let t = env.relative_transform(&b, &root).unwrap();
    let v = t.translation.vector;
    assert!((v.x - 1.0).abs() < 1e-12);
    assert!((v.y - 2.0).abs() < 1e-12);
    assert!(v.z.abs() < 1e-12);
}

#[test]
fn relative_transform_to_self_is_identity() {
    let (env, a, _b) = three_frame_env();
    let t = env.relative_transform(&a, &a).unwrap();
    assert!(t.translation.vector.norm() < 1e-12);
}

#[test]
fn relative_transform_is_transitive() {
    let (env, a, b) = three_frame_env();
    let root = env.root_frame().clone();
    let ab = env.relative_transform(&b, &a).unwrap();
    let a_root = env.relative_transform(&a, &root).unwrap();
    let direct = env.relative_transform(&b, &root).unwrap();
    let composed = a_root * ab;
    assert!((composed.translation.vector - direct.translation.vector).norm() < 1e-12);
}

#[test]
fn relative_transform_between_sibling_branches() {
    let mut env = Environment::new();
    let root = env.root_frame().clone();
    let left = env
        .attach(Box::new(Frame::with_transform("l", translation(1.0, 0.0, 0.0))))
        .unwrap();
    let right = env
        .attach(Box::new(Frame::with_transform("r", translation(0.0, 3.0, 0.0))))
        .unwrap();
    env.add_frame_child(&root, &left).unwrap();
    env.add_frame_child(&root, &right).unwrap();
    // left -> root is (1,0,0); root -> right is -(0,3,0).
    let t = env.relative_transform(&left, &right).unwrap();
    let v = t.translation.vector;
    assert!((v.x - 1.0).abs() < 1e-12);
    assert!((v.y + 3.0).abs() < 1e-12);
}

#[test]
fn relative_transform_picks_up_covariance_along_the_chain() {
    use veldt_transform::{Covariance, TransformWithUncertainty};

    let mut env = Environment::new();
    let root = env.root_frame().clone();
    let mut cov = Covariance::zeros();
    cov[(3, 3)] = 0.1;
    let a = env
        .attach(Box::new(Frame::with_uncertain_transform(
            "a",
            TransformWithUncertainty::with_covariance(translation(1.0, 0.0, 0.0), cov),
        )))
        .unwrap();
    let b = env
        .attach(Box::new(Frame::with_transform("b", translation(0.0, 1.0, 0.0))))
        .unwrap();
    env.add_frame_child(&root, &a).unwrap();
    env.add_frame_child(&a, &b).unwrap();

    // The b -> a hop carries no covariance: fast path, zero returned.
    let certain = env.relative_transform_with_uncertainty(&b, &a).unwrap();
    assert!(!certain.has_covariance());
    assert_eq!(certain.covariance_or_zero(), Covariance::zeros());

    // Going through a's link picks its covariance up.
    let uncertain = env.relative_transform_with_uncertainty(&b, &root).unwrap();
    assert!(uncertain.has_covariance());
    assert!((uncertain.covariance().unwrap()[(3, 3)] - 0.1).abs() < 1e-12);
}

#[test]
fn frame_cycle_is_rejected() {
    let (mut env, a, b) = three_frame_env();
    let err = env.add_frame_child(&b, &a).unwrap_err();
    assert!(matches!(err, EnvError::WouldCycle { .. }));
    let root = env.root_frame().clone();
    let err = env.add_frame_child(&a, &root).unwrap_err();
    assert!(matches!(err, EnvError::WouldCycle { .. }));
}

#[test]
fn set_transform_marks_bound_maps_dirty() {
    let (mut env, a, b) = three_frame_env();
    let map = env.attach_map(TestMap::new("m"), Some(&b)).unwrap();
    assert!(!env.is_dirty(&map).unwrap());
    env.set_transform(&a, translation(5.0, 0.0, 0.0)).unwrap();
    assert!(env.is_dirty(&map).unwrap());
}

#[test]
fn deep_detach_removes_subtree_and_maps_post_order() {
    let (mut env, a, b) = three_frame_env();
    let map = env.attach_map(TestMap::new("m"), Some(&b)).unwrap();
    let (handler, seen) = recorder();
    env.add_event_handler(handler);
    seen.borrow_mut().clear();

    let detached = env.detach_deep(&a).unwrap();
    let order: Vec<&ItemId> = detached
        .iter()
        .filter_map(|item| item.core().id())
        .collect();
    // Post-order: deepest first, the requested frame last.
    assert_eq!(order, vec![&map, &b, &a]);
    assert!(env.get_item(&a).is_none());
    assert!(env.get_item(&b).is_none());
    assert!(env.get_item(&map).is_none());

    // The detach events arrive in the same post-order.
    let detaches: Vec<ItemId> = seen
        .borrow()
        .iter()
        .filter_map(|e| match e {
            Event::ItemDetached { id } => Some(id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(detaches, vec![map, b, a]);
}

// ── Cartesian binding ──────────────────────────────────────────

#[test]
fn maps_bind_to_root_by_default() {
    let mut env = Environment::new();
    let map = env.attach(TestMap::new("m")).unwrap();
    assert_eq!(env.frame_of_map(&map), Some(env.root_frame()));
}

#[test]
fn maps_bind_to_their_requested_frame() {
    let (mut env, a, _b) = three_frame_env();
    let map = env.attach(TestMap::with_frame("m", &a)).unwrap();
    assert_eq!(env.frame_of_map(&map), Some(&a));
}

#[test]
fn rebinding_replaces_and_notifies() {
    let (mut env, a, b) = three_frame_env();
    let map = env.attach_map(TestMap::new("m"), Some(&a)).unwrap();
    let (handler, seen) = recorder();
    env.add_event_handler(handler);
    seen.borrow_mut().clear();
    env.bind_frame(&map, &b).unwrap();
    assert_eq!(env.frame_of_map(&map), Some(&b));
    assert_eq!(
        seen.borrow().as_slice(),
        &[Event::MapFrameChanged {
            map: map.clone(),
            frame: Some(b.clone()),
        }]
    );
}

// ── Layer hierarchy and flags ──────────────────────────────────

#[test]
fn layer_links_allow_multiple_parents_but_no_cycles() {
    let mut env = Environment::new();
    let p1 = env.attach(TestLayer::new("p1")).unwrap();
    let p2 = env.attach(TestLayer::new("p2")).unwrap();
    let child = env.attach(TestLayer::new("c")).unwrap();
    env.add_layer_child(&p1, &child).unwrap();
    env.add_layer_child(&p2, &child).unwrap();
    assert_eq!(env.layer_parents(&child), vec![p1.clone(), p2.clone()]);
    let err = env.add_layer_child(&child, &p1).unwrap_err();
    assert!(matches!(err, EnvError::WouldCycle { .. }));
}

#[test]
fn immutability_latches_and_blocks_local_mutation() {
    let mut env = Environment::new();
    let layer = env.attach(TestLayer::new("l")).unwrap();
    env.set_immutable(&layer).unwrap();
    assert!(env.is_immutable(&layer).unwrap());
    // Upstream dirtiness still flows.
    env.set_dirty(&layer).unwrap();
    assert!(env.is_dirty(&layer).unwrap());
    // Local mutation does not.
    assert!(matches!(
        env.reset_dirty(&layer),
        Err(EnvError::ImmutableLayer { .. })
    ));
    assert!(matches!(
        env.set_metadata(&layer, "k", 1_u32),
        Err(EnvError::ImmutableLayer { .. })
    ));
}

#[test]
fn metadata_roundtrip_and_type_mismatch() {
    let mut env = Environment::new();
    let layer = env.attach(TestLayer::new("l")).unwrap();
    env.set_metadata(&layer, "resolution", 0.05_f64).unwrap();
    assert_eq!(*env.metadata::<f64>(&layer, "resolution").unwrap(), 0.05);
    assert!(matches!(
        env.metadata::<u32>(&layer, "resolution"),
        Err(EnvError::MetadataTypeMismatch { .. })
    ));
    assert!(env.remove_metadata(&layer, "resolution").unwrap());
    assert!(!env.has_metadata(&layer, "resolution").unwrap());
}

// ── Operator graph ─────────────────────────────────────────────

#[test]
fn input_arity_is_enforced_and_set_input_replaces() {
    let mut env = Environment::new();
    let l1 = env.attach(TestLayer::new("l1")).unwrap();
    let l2 = env.attach(TestLayer::new("l2")).unwrap();
    let op = env.attach(SumOperator::new("op")).unwrap();

    env.add_input(&op, &l1).unwrap();
    let err = env.add_input(&op, &l2).unwrap_err();
    assert!(matches!(err, EnvError::ArityExceeded { arity: 1, .. }));

    env.set_input(&op, &l2).unwrap();
    assert_eq!(env.inputs(&op).unwrap(), &[l2.clone()]);
}

#[test]
fn single_writer_is_enforced() {
    let mut env = Environment::new();
    let layer = env.attach(TestLayer::new("l")).unwrap();
    let op1 = env.attach(SumOperator::new("op1")).unwrap();
    let op2 = env.attach(SumOperator::new("op2")).unwrap();
    env.add_output(&op1, &layer).unwrap();
    let err = env.add_output(&op2, &layer).unwrap_err();
    match err {
        EnvError::AlreadyGenerated { operator, .. } => assert_eq!(operator, op1),
        other => panic!("expected AlreadyGenerated, got {other:?}"),
    }
}

#[test]
fn detach_from_generator_cuts_the_edge_only() {
    let mut env = Environment::new();
    let layer = env.attach(TestLayer::new("l")).unwrap();
    let op = env.attach(SumOperator::new("op")).unwrap();
    env.add_output(&op, &layer).unwrap();
    assert_eq!(env.generator_of(&layer), Some(op.clone()));
    let former = env.detach_from_generator(&layer).unwrap();
    assert_eq!(former, Some(op.clone()));
    assert_eq!(env.generator_of(&layer), None);
    assert!(env.get_item(&op).is_some());
    assert!(env.get_item(&layer).is_some());
}

#[test]
fn update_all_runs_each_dirty_operator_once() {
    let mut env = Environment::new();
    let input = env.attach(TestMap::with_values("in", vec![1.0, 2.0, 3.0])).unwrap();
    let output = env.attach(TestMap::new("out")).unwrap();
    let op = env.attach(SumOperator::new("op")).unwrap();
    env.add_input(&op, &input).unwrap();
    env.add_output(&op, &output).unwrap();
    env.set_dirty(&output).unwrap();

    env.update_all().unwrap();

    assert!(!env.is_dirty(&output).unwrap());
    let op_item = env.get_with_id::<SumOperator>(&op).unwrap();
    assert_eq!(op_item.runs, 1);
    let out_map = env.get_with_id::<TestMap>(&output).unwrap();
    assert_eq!(out_map.values, vec![6.0]);
}

#[test]
fn update_all_resolves_chains_in_dependency_order() {
    let mut env = Environment::new();
    let source = env.attach(TestMap::with_values("src", vec![2.0, 3.0])).unwrap();
    let mid = env.attach(TestMap::new("mid")).unwrap();
    let sink = env.attach(TestMap::new("sink")).unwrap();
    let op1 = env.attach(SumOperator::new("op1")).unwrap();
    let op2 = env.attach(SumOperator::new("op2")).unwrap();
    env.add_input(&op1, &source).unwrap();
    env.add_output(&op1, &mid).unwrap();
    env.add_input(&op2, &mid).unwrap();
    env.add_output(&op2, &sink).unwrap();

    // Only the head of the chain is marked; propagation reaches the tail.
    env.set_dirty(&mid).unwrap();
    env.update_all().unwrap();

    assert!(!env.is_dirty(&mid).unwrap());
    assert!(!env.is_dirty(&sink).unwrap());
    assert_eq!(env.get_with_id::<TestMap>(&mid).unwrap().values, vec![5.0]);
    assert_eq!(env.get_with_id::<TestMap>(&sink).unwrap().values, vec![5.0]);
    assert_eq!(env.get_with_id::<SumOperator>(&op1).unwrap().runs, 1);
    assert_eq!(env.get_with_id::<SumOperator>(&op2).unwrap().runs, 1);
}

#[test]
fn dirty_source_inputs_still_let_consumers_run() {
    let mut env = Environment::new();
    let source = env.attach(TestMap::with_values("src", vec![1.0, 1.5])).unwrap();
    let out = env.attach(TestMap::new("out")).unwrap();
    let op = env.attach(SumOperator::new("op")).unwrap();
    env.add_input(&op, &source).unwrap();
    env.add_output(&op, &out).unwrap();

    // A modified source map is dirty ground truth, not a blocker.
    env.set_dirty(&source).unwrap();
    env.update_all().unwrap();

    assert_eq!(env.get_with_id::<SumOperator>(&op).unwrap().runs, 1);
    assert!(!env.is_dirty(&out).unwrap());
    // Nothing generates the source, so its flag is the caller's to reset.
    assert!(env.is_dirty(&source).unwrap());
    env.reset_dirty(&source).unwrap();
    assert!(!env.is_dirty(&source).unwrap());
}

#[test]
fn update_all_reports_cycles_and_leaves_them_dirty() {
    let mut env = Environment::new();
    let l1 = env.attach(TestMap::new("l1")).unwrap();
    let l2 = env.attach(TestMap::new("l2")).unwrap();
    let op1 = env.attach(SumOperator::new("op1")).unwrap();
    let op2 = env.attach(SumOperator::new("op2")).unwrap();
    env.add_input(&op1, &l1).unwrap();
    env.add_output(&op1, &l2).unwrap();
    env.add_input(&op2, &l2).unwrap();
    env.add_output(&op2, &l1).unwrap();
    env.set_dirty(&l1).unwrap();

    let err = env.update_all().unwrap_err();
    match err {
        EnvError::OperatorCycle { operators } => {
            assert_eq!(operators, vec![op1.clone(), op2.clone()]);
        }
        other => panic!("expected OperatorCycle, got {other:?}"),
    }
    // The cyclic subgraph was left untouched.
    assert!(env.is_dirty(&l1).unwrap());
    assert_eq!(env.get_with_id::<SumOperator>(&op1).unwrap().runs, 0);
    assert_eq!(env.get_with_id::<SumOperator>(&op2).unwrap().runs, 0);
}

#[test]
fn failing_hook_surfaces_and_keeps_outputs_dirty() {
    let mut env = Environment::new();
    let out = env.attach(TestMap::new("out")).unwrap();
    let op = env.attach(FailingOperator::new("op")).unwrap();
    env.add_output(&op, &out).unwrap();
    env.set_dirty(&out).unwrap();

    let err = env.update_all().unwrap_err();
    assert!(matches!(err, EnvError::OperatorFailed { .. }));
    assert!(env.is_dirty(&out).unwrap());
}

#[test]
fn update_from_operator_refreshes_one_chain() {
    let mut env = Environment::new();
    let source = env.attach(TestMap::with_values("src", vec![4.0])).unwrap();
    let out = env.attach(TestMap::new("out")).unwrap();
    let op = env.attach(SumOperator::new("op")).unwrap();
    env.add_input(&op, &source).unwrap();
    env.add_output(&op, &out).unwrap();
    env.set_dirty(&out).unwrap();

    env.update_from_operator(&out).unwrap();
    assert!(!env.is_dirty(&out).unwrap());
    assert_eq!(env.get_with_id::<TestMap>(&out).unwrap().values, vec![4.0]);
}

// ── Events ─────────────────────────────────────────────────────

#[test]
fn attach_link_transform_events_arrive_in_order() {
    let mut env = Environment::new();
    let root = env.root_frame().clone();
    let (handler, seen) = recorder();
    env.add_event_handler(handler);
    seen.borrow_mut().clear();

    let c = env.attach(Box::new(Frame::new("c"))).unwrap();
    env.add_frame_child(&root, &c).unwrap();
    env.set_transform(&c, translation(0.0, 0.0, 1.0)).unwrap();

    let events = seen.borrow();
    assert!(matches!(&events[0], Event::ItemAttached { id } if *id == c));
    assert!(matches!(
        &events[1],
        Event::FrameTreeChanged { parent, child, link: LinkChange::Added }
            if *parent == root && *child == c
    ));
    assert!(matches!(&events[2], Event::FrameChanged { frame, .. } if *frame == c));
}

#[test]
fn subscribe_replays_the_current_state() {
    let (mut env, a, b) = three_frame_env();
    let map = env.attach_map(TestMap::new("m"), Some(&b)).unwrap();
    let layer = env.attach(TestLayer::new("l")).unwrap();
    let op = env.attach(SumOperator::new("op")).unwrap();
    env.add_input(&op, &layer).unwrap();
    env.add_output(&op, &map).unwrap();

    let (handler, seen) = recorder();
    env.add_event_handler(handler);

    let events = seen.borrow();
    let root = env.root_frame().clone();
    let attached: Vec<ItemId> = events
        .iter()
        .filter_map(|e| match e {
            Event::ItemAttached { id } => Some(id.clone()),
            _ => None,
        })
        .collect();
    // Frames pre-order from root, then layers by id, then operators.
    assert_eq!(
        attached,
        vec![
            root.clone(),
            a.clone(),
            b.clone(),
            layer.clone(),
            map.clone(),
            op.clone(),
        ]
    );
    // Parent links arrive after the respective attach.
    let link_pos = events
        .iter()
        .position(|e| {
            matches!(e, Event::FrameTreeChanged { child, link: LinkChange::Added, .. } if *child == a)
        })
        .unwrap();
    let attach_pos = events
        .iter()
        .position(|e| matches!(e, Event::ItemAttached { id } if *id == a))
        .unwrap();
    assert!(attach_pos < link_pos);
    // The binding comes last.
    assert!(matches!(
        events.last().unwrap(),
        Event::MapFrameChanged { map: m, frame: Some(f) } if *m == map && *f == b
    ));
}

#[test]
fn unsubscribe_replays_the_inverse_sequence() {
    let (mut env, _a, b) = three_frame_env();
    env.attach_map(TestMap::new("m"), Some(&b)).unwrap();
    let (handler, seen) = recorder();
    let id = env.add_event_handler(handler);
    let subscribe_len = seen.borrow().len();

    env.remove_event_handler(id).unwrap();
    let events = seen.borrow();
    let teardown = &events[subscribe_len..];
    // The teardown starts by unbinding the map and ends by detaching the
    // root, mirroring the subscribe replay in reverse.
    assert!(matches!(
        teardown.first().unwrap(),
        Event::MapFrameChanged { frame: None, .. }
    ));
    assert!(matches!(
        teardown.last().unwrap(),
        Event::ItemDetached { id } if id == env.root_frame()
    ));
    let detaches = teardown
        .iter()
        .filter(|e| matches!(e, Event::ItemDetached { .. }))
        .count();
    assert_eq!(detaches, env.item_count());
}

#[test]
fn failing_handler_does_not_block_delivery_or_mutation() {
    let mut env = Environment::new();
    let failing = Box::new(|_event: &Event| -> Result<(), HandlerError> {
        Err(HandlerError::new("mirror out of sync"))
    });
    env.add_event_handler(failing);
    let (handler, seen) = recorder();
    env.add_event_handler(handler);
    seen.borrow_mut().clear();

    let id = env.attach(TestLayer::new("l")).unwrap();
    // The mutation committed and the second handler still saw the event.
    assert!(env.get_item(&id).is_some());
    assert_eq!(seen.borrow().len(), 1);
}
