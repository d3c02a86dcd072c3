//! End-to-end scenarios across the whole workspace: build a world, run
//! operators, round-trip it through disk and through an event stream.

use nalgebra::Point3;

use veldt::maps::registry;
use veldt::prelude::*;
use veldt::storage::{apply_events, record_environment};

/// Root -> a (1,0,0) -> b (0,2,0), per the canonical frame scenario.
fn frame_world() -> (Environment, ItemId, ItemId) {
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
fn chained_frames_resolve_to_the_summed_translation() {
    let (env, _a, b) = frame_world();
    let root = env.root_frame().clone();
    let t = env.relative_transform(&b, &root).unwrap();
    assert_eq!(t.translation.vector, nalgebra::Vector3::new(1.0, 2.0, 0.0));
}

#[test]
fn repeated_cloud_requests_get_numbered_ids() {
    let mut env = Environment::new();
    let first = env.attach(Box::new(Pointcloud::new("cloud/"))).unwrap();
    let second = env.attach(Box::new(Pointcloud::new("cloud/"))).unwrap();
    assert_eq!(first.as_str(), "/cloud0");
    assert_eq!(second.as_str(), "/cloud1");
}

#[test]
fn serialized_world_reloads_identically() {
    let (mut env, a, b) = frame_world();
    let cloud_id = {
        let mut cloud = Pointcloud::with_frame("cloud/", &b);
        cloud.vertices = vec![Point3::new(0.5, 1.0 / 3.0, -2.0)];
        env.attach(Box::new(cloud)).unwrap()
    };
    env.set_label(&cloud_id, "front scan").unwrap();

    let dir = tempfile::tempdir().unwrap();
    serialize_environment(&env, dir.path()).unwrap();
    let reloaded = unserialize_environment(dir.path(), &registry()).unwrap();

    // Same ids, labels, class tags.
    let mut original_ids: Vec<&ItemId> = env.ids().collect();
    let mut reloaded_ids: Vec<&ItemId> = reloaded.ids().collect();
    original_ids.sort();
    reloaded_ids.sort();
    assert_eq!(original_ids, reloaded_ids);
    for id in original_ids {
        let before = env.get_item(id).unwrap();
        let after = reloaded.get_item(id).unwrap();
        assert_eq!(before.class_tag(), after.class_tag());
        assert_eq!(before.core().label(), after.core().label());
    }

    // Transforms are bit-exact.
    for frame in [&a, &b] {
        assert_eq!(
            env.get_transform(frame).unwrap().transform(),
            reloaded.get_transform(frame).unwrap().transform(),
        );
    }

    // Relation edges and payload survive.
    assert_eq!(env.frame_edges(), reloaded.frame_edges());
    assert_eq!(env.cartesian_binding_edges(), reloaded.cartesian_binding_edges());
    assert_eq!(
        reloaded.get_with_id::<Pointcloud>(&cloud_id).unwrap().vertices,
        vec![Point3::new(0.5, 1.0 / 3.0, -2.0)],
    );

    // The id counter survived: the next cloud/ request does not collide.
    let mut reloaded = reloaded;
    let next = reloaded.attach(Box::new(Pointcloud::new("cloud/"))).unwrap();
    assert_eq!(next.as_str(), "/cloud1");
}

#[test]
fn unknown_class_fails_the_reload() {
    let (env, _a, _b) = frame_world();
    let dir = tempfile::tempdir().unwrap();
    serialize_environment(&env, dir.path()).unwrap();
    // A registry that never learned about frames.
    let empty = Registry::empty();
    let err = unserialize_environment(dir.path(), &empty).unwrap_err();
    assert!(matches!(
        err,
        veldt::core::StorageError::UnknownClass { .. }
    ));
}

#[test]
fn slope_pipeline_survives_serialization_and_still_updates() {
    let mut env = Environment::new();
    let mut heights = ScalarGrid::new("heights", 4, 4, 0.5);
    for r in 0..4 {
        for c in 0..4 {
            heights.set(r, c, r as f64 * 0.5);
        }
    }
    let input = env.attach(Box::new(heights)).unwrap();
    let output = env.attach(Box::new(ScalarGrid::new("slope", 4, 4, 0.5))).unwrap();
    let op = env.attach(Box::new(SlopeOperator::new("slope-op"))).unwrap();
    env.add_input(&op, &input).unwrap();
    env.add_output(&op, &output).unwrap();

    let dir = tempfile::tempdir().unwrap();
    serialize_environment(&env, dir.path()).unwrap();
    let mut reloaded = unserialize_environment(dir.path(), &registry()).unwrap();

    assert_eq!(reloaded.inputs(&op).unwrap(), &[input.clone()]);
    assert_eq!(reloaded.generator_of(&output), Some(op.clone()));

    reloaded.set_dirty(&output).unwrap();
    reloaded.update_all().unwrap();
    let slope = reloaded.get_with_id::<ScalarGrid>(&output).unwrap();
    // Height rises 0.5 per 0.5-sized row cell: unit slope inside.
    assert!((slope.get(1, 1) - 1.0).abs() < 1e-12);
    assert!(!reloaded.is_dirty(&output).unwrap());
}

#[test]
fn event_stream_rebuilds_the_world_in_a_fresh_environment() {
    let (mut env, a, b) = frame_world();
    let cloud_id = {
        let mut cloud = Pointcloud::with_frame("cloud/", &b);
        cloud.vertices = vec![Point3::new(1.0, 2.0, 3.0)];
        env.attach(Box::new(cloud)).unwrap()
    };

    let events = record_environment(&env).unwrap();
    let mut mirror = Environment::restore(env.prefix(), env.next_suffix(), env.root_frame().clone());
    apply_events(&mut mirror, &events, &registry()).unwrap();

    assert_eq!(mirror.item_count(), env.item_count());
    assert_eq!(mirror.frame_edges(), env.frame_edges());
    assert_eq!(mirror.cartesian_binding_edges(), env.cartesian_binding_edges());
    let t = mirror.relative_transform(&b, &a).unwrap();
    assert_eq!(t.translation.vector, nalgebra::Vector3::new(0.0, 2.0, 0.0));
    assert_eq!(
        mirror.get_with_id::<Pointcloud>(&cloud_id).unwrap().vertices,
        vec![Point3::new(1.0, 2.0, 3.0)],
    );
}

#[test]
fn copy_from_reprojects_between_frames() {
    let (mut env, a, b) = frame_world();
    let src = env
        .attach({
            let mut cloud = Pointcloud::with_frame("src", &b);
            cloud.vertices = vec![Point3::new(0.0, 0.0, 0.0)];
            Box::new(cloud)
        })
        .unwrap();
    let dst = env.attach(Box::new(Pointcloud::with_frame("dst", &a))).unwrap();

    Pointcloud::copy_from(&mut env, &dst, &src, true).unwrap();
    // b's origin sits at (0,2,0) in a's frame.
    assert_eq!(
        env.get_with_id::<Pointcloud>(&dst).unwrap().vertices,
        vec![Point3::new(0.0, 2.0, 0.0)],
    );
}

#[test]
fn to_map_and_from_map_are_inverse_directions() {
    let (mut env, _a, b) = frame_world();
    let cloud_id = env.attach(Box::new(Pointcloud::with_frame("c", &b))).unwrap();
    let cloud = env.get_with_id::<Pointcloud>(&cloud_id).unwrap();

    let p = Point3::new(0.0, 0.0, 0.0);
    // The root origin, seen from the cloud's frame.
    let in_map = cloud.to_map_from_root(&env, p).unwrap();
    assert_eq!(in_map, Point3::new(-1.0, -2.0, 0.0));
    // And back out again.
    let back = cloud.from_map_to_root(&env, in_map).unwrap();
    assert_eq!(back, p);
}
