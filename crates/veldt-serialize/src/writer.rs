//! Serialize an environment into a directory.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use veldt_core::{ItemId, StorageError};
use veldt_env::Environment;

use crate::manifest::{Manifest, ManifestItem, MANIFEST_NAME};
use crate::store::DirItemSink;

/// Write `env` to `path` as a manifest plus per-item side-files.
///
/// Items are walked in id order; each serialize hook writes attributes
/// into the item's manifest record and blobs into side-files. The four
/// relation tables follow as edge lists.
pub fn serialize_environment(env: &Environment, path: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(path)?;

    let mut manifest = Manifest {
        prefix: env.prefix().to_owned(),
        counter: env.next_suffix(),
        root: env.root_frame().to_string(),
        ..Manifest::default()
    };

    let mut ids: Vec<&ItemId> = env.ids().collect();
    ids.sort();
    for id in ids {
        let Some(item) = env.get_item(id) else {
            continue;
        };
        let mut sink = DirItemSink::new(path, id);
        item.serialize(&mut sink)?;
        manifest.items.push(ManifestItem {
            class_tag: item.class_tag().to_owned(),
            id: id.to_string(),
            label: item.core().label().to_owned(),
            attrs: sink.into_attrs(),
        });
    }

    manifest.frame_edges = stringify(env.frame_edges());
    manifest.layer_edges = stringify(env.layer_edges());
    manifest.input_edges = stringify(env.operator_input_edges());
    manifest.output_edges = stringify(env.operator_output_edges());
    manifest.binding_edges = stringify(env.cartesian_binding_edges());

    let file = File::create(path.join(MANIFEST_NAME))?;
    let mut writer = BufWriter::new(file);
    manifest.render(&mut writer)?;
    writer.flush()?;
    Ok(())
}

fn stringify(edges: Vec<(ItemId, ItemId)>) -> Vec<(String, String)> {
    edges
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}
