//! Rebuild an environment from a serialized directory.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use veldt_core::{ItemId, StorageError};
use veldt_env::Environment;

use crate::manifest::{Manifest, MANIFEST_NAME};
use crate::registry::Registry;
use crate::store::DirItemSource;

/// Read the environment serialized at `path`.
///
/// Every item record is handed to its class factory (failing with an
/// unknown-class error for unregistered tags), then the relation tables
/// are replayed through the normal kernel entry points so every
/// invariant is checked again on the way in.
pub fn unserialize_environment(path: &Path, registry: &Registry) -> Result<Environment, StorageError> {
    let file = File::open(path.join(MANIFEST_NAME))?;
    let manifest = Manifest::parse(BufReader::new(file))?;

    let mut env = Environment::restore(
        &manifest.prefix,
        manifest.counter,
        ItemId::new(manifest.root.clone()),
    );

    for record in &manifest.items {
        let id = ItemId::new(record.id.clone());
        let mut source = DirItemSource::new(path, &id, record.attrs.clone());
        let mut item = registry.create(&record.class_tag, &mut source)?;
        item.core_mut().set_label(&record.label);
        env.attach_with_id(item, id)?;
    }

    for (child, parent) in &manifest.frame_edges {
        env.add_frame_child(&ItemId::new(parent.clone()), &ItemId::new(child.clone()))?;
    }
    for (child, parent) in &manifest.layer_edges {
        env.add_layer_child(&ItemId::new(parent.clone()), &ItemId::new(child.clone()))?;
    }
    for (operator, layer) in &manifest.input_edges {
        env.add_input(&ItemId::new(operator.clone()), &ItemId::new(layer.clone()))?;
    }
    for (operator, layer) in &manifest.output_edges {
        env.add_output(&ItemId::new(operator.clone()), &ItemId::new(layer.clone()))?;
    }
    for (map, frame) in &manifest.binding_edges {
        env.bind_frame(&ItemId::new(map.clone()), &ItemId::new(frame.clone()))?;
    }

    Ok(env)
}
