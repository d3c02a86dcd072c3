//! Binary event streams: recording environment changes and applying them
//! to another environment.
//!
//! All integers are little-endian; strings, byte arrays, and lists are
//! length-prefixed with a `u32`. The stream starts with the `b"VELD"`
//! magic and a format version byte, followed by tag-dispatched event
//! frames until end of stream. Applying a stream is semantically
//! equivalent to invoking the corresponding kernel mutators in order;
//! attach frames embed the item's full serialized form so the receiving
//! side can rebuild it through the factory registry.

use std::io::{ErrorKind, Read, Write};

use veldt_core::{Event, ItemId, MemSink, MemSource, StorageError};
use veldt_env::Environment;
use veldt_transform::{
    quaternion_wijk, transform_from_parts, translation_xyz, Covariance, TransformWithUncertainty,
};

use crate::registry::Registry;

/// Stream magic bytes.
pub const MAGIC: &[u8; 4] = b"VELD";

/// Stream format version.
pub const FORMAT_VERSION: u8 = 1;

const TAG_ITEM_ATTACHED: u8 = 1;
const TAG_ITEM_DETACHED: u8 = 2;
const TAG_ITEM_MODIFIED: u8 = 3;
const TAG_FRAME_TREE: u8 = 4;
const TAG_FRAME_CHANGED: u8 = 5;
const TAG_LAYER_TREE: u8 = 6;
const TAG_OPERATOR_INPUT: u8 = 7;
const TAG_OPERATOR_OUTPUT: u8 = 8;
const TAG_MAP_FRAME: u8 = 9;

/// A self-contained, serializable environment change.
///
/// Unlike the kernel's [`Event`], a wire event carries everything needed
/// to re-apply it elsewhere: attach frames embed the item's serialized
/// attributes and blobs.
#[derive(Clone, Debug, PartialEq)]
pub enum WireEvent {
    /// An item entered the environment, with its serialized form.
    ItemAttached {
        /// The assigned id.
        id: String,
        /// Class tag for the factory registry.
        class_tag: String,
        /// The item's label.
        label: String,
        /// Keyed attributes from the item's serialize hook.
        attrs: Vec<(String, String)>,
        /// Named binary blobs from the item's serialize hook.
        blobs: Vec<(String, Vec<u8>)>,
    },
    /// An item left the environment.
    ItemDetached {
        /// The id it had while attached.
        id: String,
    },
    /// An attached item changed in place.
    ItemModified {
        /// The modified item.
        id: String,
    },
    /// A frame parent link was added or removed.
    FrameTreeChanged {
        /// The parent frame.
        parent: String,
        /// The child frame.
        child: String,
        /// `true` for added, `false` for removed.
        added: bool,
    },
    /// A frame's transform was updated.
    FrameChanged {
        /// The frame.
        frame: String,
        /// The new child-to-parent transform.
        transform: TransformWithUncertainty,
    },
    /// A layer parent link was added or removed.
    LayerTreeChanged {
        /// The parent layer.
        parent: String,
        /// The child layer.
        child: String,
        /// `true` for added, `false` for removed.
        added: bool,
    },
    /// An operator input edge was added or removed.
    OperatorInputChanged {
        /// The operator.
        operator: String,
        /// The input layer.
        layer: String,
        /// `true` for added, `false` for removed.
        added: bool,
    },
    /// An operator output edge was added or removed.
    OperatorOutputChanged {
        /// The operator.
        operator: String,
        /// The output layer.
        layer: String,
        /// `true` for added, `false` for removed.
        added: bool,
    },
    /// A cartesian map's frame binding changed.
    MapFrameChanged {
        /// The map.
        map: String,
        /// The new frame, or `None` when the binding went away.
        frame: Option<String>,
    },
}

// ── Primitive writers ───────────────────────────────────────────

fn write_u8(w: &mut dyn Write, v: u8) -> Result<(), StorageError> {
    w.write_all(&[v])?;
    Ok(())
}

fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), StorageError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f64_le(w: &mut dyn Write, v: f64) -> Result<(), StorageError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_str(w: &mut dyn Write, s: &str) -> Result<(), StorageError> {
    write_u32_le(w, s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn write_bytes(w: &mut dyn Write, b: &[u8]) -> Result<(), StorageError> {
    write_u32_le(w, b.len() as u32)?;
    w.write_all(b)?;
    Ok(())
}

fn write_transform(w: &mut dyn Write, t: &TransformWithUncertainty) -> Result<(), StorageError> {
    for v in translation_xyz(t.transform()) {
        write_f64_le(w, v)?;
    }
    for v in quaternion_wijk(t.transform()) {
        write_f64_le(w, v)?;
    }
    match t.covariance() {
        Some(cov) => {
            write_u8(w, 1)?;
            for row in cov.row_iter() {
                for v in row.iter() {
                    write_f64_le(w, *v)?;
                }
            }
        }
        None => write_u8(w, 0)?,
    }
    Ok(())
}

// ── Primitive readers ───────────────────────────────────────────

fn read_u8(r: &mut dyn Read) -> Result<u8, StorageError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32_le(r: &mut dyn Read) -> Result<u32, StorageError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f64_le(r: &mut dyn Read) -> Result<f64, StorageError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_str(r: &mut dyn Read) -> Result<String, StorageError> {
    let len = read_u32_le(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| StorageError::MalformedEvent {
        detail: format!("invalid UTF-8 string: {e}"),
    })
}

fn read_bytes(r: &mut dyn Read) -> Result<Vec<u8>, StorageError> {
    let len = read_u32_le(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_transform(r: &mut dyn Read) -> Result<TransformWithUncertainty, StorageError> {
    let xyz = [read_f64_le(r)?, read_f64_le(r)?, read_f64_le(r)?];
    let wijk = [
        read_f64_le(r)?,
        read_f64_le(r)?,
        read_f64_le(r)?,
        read_f64_le(r)?,
    ];
    let transform = transform_from_parts(xyz, wijk);
    match read_u8(r)? {
        0 => Ok(TransformWithUncertainty::certain(transform)),
        1 => {
            let mut values = [0.0f64; 36];
            for v in values.iter_mut() {
                *v = read_f64_le(r)?;
            }
            Ok(TransformWithUncertainty::with_covariance(
                transform,
                Covariance::from_row_slice(&values),
            ))
        }
        other => Err(StorageError::MalformedEvent {
            detail: format!("bad covariance flag {other}"),
        }),
    }
}

// ── Stream writer ───────────────────────────────────────────────

/// Writes wire events to a byte stream.
///
/// Generic over `W: Write` so tests can use `Vec<u8>` and production
/// code can use `BufWriter<File>`. The header is written on construction.
pub struct EventStreamWriter<W: Write> {
    writer: W,
    events_written: u64,
}

impl<W: Write> EventStreamWriter<W> {
    /// Create a writer, immediately emitting the stream header.
    pub fn new(mut writer: W) -> Result<Self, StorageError> {
        writer.write_all(MAGIC)?;
        write_u8(&mut writer, FORMAT_VERSION)?;
        Ok(Self {
            writer,
            events_written: 0,
        })
    }

    /// Append one event frame.
    pub fn write_event(&mut self, event: &WireEvent) -> Result<(), StorageError> {
        let w: &mut dyn Write = &mut self.writer;
        match event {
            WireEvent::ItemAttached {
                id,
                class_tag,
                label,
                attrs,
                blobs,
            } => {
                write_u8(w, TAG_ITEM_ATTACHED)?;
                write_str(w, id)?;
                write_str(w, class_tag)?;
                write_str(w, label)?;
                write_u32_le(w, attrs.len() as u32)?;
                for (key, value) in attrs {
                    write_str(w, key)?;
                    write_str(w, value)?;
                }
                write_u32_le(w, blobs.len() as u32)?;
                for (suffix, data) in blobs {
                    write_str(w, suffix)?;
                    write_bytes(w, data)?;
                }
            }
            WireEvent::ItemDetached { id } => {
                write_u8(w, TAG_ITEM_DETACHED)?;
                write_str(w, id)?;
            }
            WireEvent::ItemModified { id } => {
                write_u8(w, TAG_ITEM_MODIFIED)?;
                write_str(w, id)?;
            }
            WireEvent::FrameTreeChanged {
                parent,
                child,
                added,
            } => {
                write_u8(w, TAG_FRAME_TREE)?;
                write_str(w, parent)?;
                write_str(w, child)?;
                write_u8(w, u8::from(*added))?;
            }
            WireEvent::FrameChanged { frame, transform } => {
                write_u8(w, TAG_FRAME_CHANGED)?;
                write_str(w, frame)?;
                write_transform(w, transform)?;
            }
            WireEvent::LayerTreeChanged {
                parent,
                child,
                added,
            } => {
                write_u8(w, TAG_LAYER_TREE)?;
                write_str(w, parent)?;
                write_str(w, child)?;
                write_u8(w, u8::from(*added))?;
            }
            WireEvent::OperatorInputChanged {
                operator,
                layer,
                added,
            } => {
                write_u8(w, TAG_OPERATOR_INPUT)?;
                write_str(w, operator)?;
                write_str(w, layer)?;
                write_u8(w, u8::from(*added))?;
            }
            WireEvent::OperatorOutputChanged {
                operator,
                layer,
                added,
            } => {
                write_u8(w, TAG_OPERATOR_OUTPUT)?;
                write_str(w, operator)?;
                write_str(w, layer)?;
                write_u8(w, u8::from(*added))?;
            }
            WireEvent::MapFrameChanged { map, frame } => {
                write_u8(w, TAG_MAP_FRAME)?;
                write_str(w, map)?;
                match frame {
                    Some(frame) => {
                        write_u8(w, 1)?;
                        write_str(w, frame)?;
                    }
                    None => write_u8(w, 0)?,
                }
            }
        }
        self.events_written += 1;
        Ok(())
    }

    /// Number of events written so far.
    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// Consume the writer and return the underlying sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ── Stream reader ───────────────────────────────────────────────

/// Reads wire events from a byte stream.
pub struct EventStreamReader<R: Read> {
    reader: R,
}

impl<R: Read> EventStreamReader<R> {
    /// Open a stream, validating the magic and version.
    pub fn open(mut reader: R) -> Result<Self, StorageError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(StorageError::MalformedEvent {
                detail: "bad magic bytes".to_owned(),
            });
        }
        let version = read_u8(&mut reader)?;
        if version != FORMAT_VERSION {
            return Err(StorageError::MalformedEvent {
                detail: format!("unsupported format version {version}"),
            });
        }
        Ok(Self { reader })
    }

    /// Read the next event, or `None` at a clean end of stream.
    pub fn next_event(&mut self) -> Result<Option<WireEvent>, StorageError> {
        let mut tag = [0u8; 1];
        match self.reader.read_exact(&mut tag) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let r: &mut dyn Read = &mut self.reader;
        let event = match tag[0] {
            TAG_ITEM_ATTACHED => {
                let id = read_str(r)?;
                let class_tag = read_str(r)?;
                let label = read_str(r)?;
                let attr_count = read_u32_le(r)? as usize;
                let mut attrs = Vec::with_capacity(attr_count);
                for _ in 0..attr_count {
                    let key = read_str(r)?;
                    let value = read_str(r)?;
                    attrs.push((key, value));
                }
                let blob_count = read_u32_le(r)? as usize;
                let mut blobs = Vec::with_capacity(blob_count);
                for _ in 0..blob_count {
                    let suffix = read_str(r)?;
                    let data = read_bytes(r)?;
                    blobs.push((suffix, data));
                }
                WireEvent::ItemAttached {
                    id,
                    class_tag,
                    label,
                    attrs,
                    blobs,
                }
            }
            TAG_ITEM_DETACHED => WireEvent::ItemDetached { id: read_str(r)? },
            TAG_ITEM_MODIFIED => WireEvent::ItemModified { id: read_str(r)? },
            TAG_FRAME_TREE => WireEvent::FrameTreeChanged {
                parent: read_str(r)?,
                child: read_str(r)?,
                added: read_u8(r)? != 0,
            },
            TAG_FRAME_CHANGED => WireEvent::FrameChanged {
                frame: read_str(r)?,
                transform: read_transform(r)?,
            },
            TAG_LAYER_TREE => WireEvent::LayerTreeChanged {
                parent: read_str(r)?,
                child: read_str(r)?,
                added: read_u8(r)? != 0,
            },
            TAG_OPERATOR_INPUT => WireEvent::OperatorInputChanged {
                operator: read_str(r)?,
                layer: read_str(r)?,
                added: read_u8(r)? != 0,
            },
            TAG_OPERATOR_OUTPUT => WireEvent::OperatorOutputChanged {
                operator: read_str(r)?,
                layer: read_str(r)?,
                added: read_u8(r)? != 0,
            },
            TAG_MAP_FRAME => {
                let map = read_str(r)?;
                let frame = match read_u8(r)? {
                    0 => None,
                    _ => Some(read_str(r)?),
                };
                WireEvent::MapFrameChanged { map, frame }
            }
            other => {
                return Err(StorageError::MalformedEvent {
                    detail: format!("unknown event tag {other}"),
                })
            }
        };
        Ok(Some(event))
    }

    /// Drain the remaining events into a vector.
    pub fn collect_events(mut self) -> Result<Vec<WireEvent>, StorageError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }
}

// ── Recording ───────────────────────────────────────────────────

/// Convert a live kernel event into its wire form, serializing the item
/// for attach and modify frames.
pub fn wire_event(env: &Environment, event: &Event) -> Result<WireEvent, StorageError> {
    Ok(match event {
        Event::ItemAttached { id } => wire_attach(env, id)?,
        Event::ItemDetached { id } => WireEvent::ItemDetached { id: id.to_string() },
        Event::ItemModified { id } => WireEvent::ItemModified { id: id.to_string() },
        Event::FrameTreeChanged {
            parent,
            child,
            link,
        } => WireEvent::FrameTreeChanged {
            parent: parent.to_string(),
            child: child.to_string(),
            added: *link == veldt_core::LinkChange::Added,
        },
        Event::FrameChanged { frame, transform } => WireEvent::FrameChanged {
            frame: frame.to_string(),
            transform: transform.clone(),
        },
        Event::LayerTreeChanged {
            parent,
            child,
            link,
        } => WireEvent::LayerTreeChanged {
            parent: parent.to_string(),
            child: child.to_string(),
            added: *link == veldt_core::LinkChange::Added,
        },
        Event::OperatorInputChanged {
            operator,
            layer,
            link,
        } => WireEvent::OperatorInputChanged {
            operator: operator.to_string(),
            layer: layer.to_string(),
            added: *link == veldt_core::LinkChange::Added,
        },
        Event::OperatorOutputChanged {
            operator,
            layer,
            link,
        } => WireEvent::OperatorOutputChanged {
            operator: operator.to_string(),
            layer: layer.to_string(),
            added: *link == veldt_core::LinkChange::Added,
        },
        Event::MapFrameChanged { map, frame } => WireEvent::MapFrameChanged {
            map: map.to_string(),
            frame: frame.as_ref().map(ItemId::to_string),
        },
    })
}

fn wire_attach(env: &Environment, id: &ItemId) -> Result<WireEvent, StorageError> {
    let item = env.get_item(id).ok_or_else(|| StorageError::MalformedEvent {
        detail: format!("attach event for unknown item '{id}'"),
    })?;
    let mut sink = MemSink::default();
    item.serialize(&mut sink)?;
    let (attrs, blobs) = sink.into_parts();
    Ok(WireEvent::ItemAttached {
        id: id.to_string(),
        class_tag: item.class_tag().to_owned(),
        label: item.core().label().to_owned(),
        attrs,
        blobs,
    })
}

/// Record the whole environment as a wire-event sequence: the subscribe
/// replay with every attach frame carrying the item's serialized form.
pub fn record_environment(env: &Environment) -> Result<Vec<WireEvent>, StorageError> {
    env.attach_replay()
        .iter()
        .map(|event| wire_event(env, event))
        .collect()
}

// ── Applying ────────────────────────────────────────────────────

/// Apply a wire-event sequence to an environment by invoking the
/// corresponding kernel mutators in order.
pub fn apply_events(
    env: &mut Environment,
    events: &[WireEvent],
    registry: &Registry,
) -> Result<(), StorageError> {
    for event in events {
        apply_event(env, event, registry)?;
    }
    Ok(())
}

fn apply_event(
    env: &mut Environment,
    event: &WireEvent,
    registry: &Registry,
) -> Result<(), StorageError> {
    match event {
        WireEvent::ItemAttached {
            id,
            class_tag,
            label,
            attrs,
            blobs,
        } => {
            let mut source = MemSource::new(attrs.clone(), blobs.clone());
            let mut item = registry.create(class_tag, &mut source)?;
            item.core_mut().set_label(label);
            env.attach_with_id(item, ItemId::new(id.clone()))?;
        }
        WireEvent::ItemDetached { id } => {
            env.detach(&ItemId::new(id.clone()))?;
        }
        WireEvent::ItemModified { id } => {
            env.mark_modified(&ItemId::new(id.clone()))?;
        }
        WireEvent::FrameTreeChanged {
            parent,
            child,
            added,
        } => {
            let parent = ItemId::new(parent.clone());
            let child = ItemId::new(child.clone());
            if *added {
                env.add_frame_child(&parent, &child)?;
            } else {
                env.remove_frame_child(&parent, &child)?;
            }
        }
        WireEvent::FrameChanged { frame, transform } => {
            env.set_transform_with_uncertainty(&ItemId::new(frame.clone()), transform.clone())?;
        }
        WireEvent::LayerTreeChanged {
            parent,
            child,
            added,
        } => {
            let parent = ItemId::new(parent.clone());
            let child = ItemId::new(child.clone());
            if *added {
                env.add_layer_child(&parent, &child)?;
            } else {
                env.remove_layer_child(&parent, &child)?;
            }
        }
        WireEvent::OperatorInputChanged {
            operator,
            layer,
            added,
        } => {
            let operator = ItemId::new(operator.clone());
            let layer = ItemId::new(layer.clone());
            if *added {
                env.add_input(&operator, &layer)?;
            } else {
                env.remove_input(&operator, &layer)?;
            }
        }
        WireEvent::OperatorOutputChanged {
            operator,
            layer,
            added,
        } => {
            let operator = ItemId::new(operator.clone());
            let layer = ItemId::new(layer.clone());
            if *added {
                env.add_output(&operator, &layer)?;
            } else {
                env.remove_output(&operator, &layer)?;
            }
        }
        WireEvent::MapFrameChanged { map, frame } => {
            match frame {
                Some(frame) => {
                    env.bind_frame(&ItemId::new(map.clone()), &ItemId::new(frame.clone()))?;
                }
                // A binding removal only ever accompanies a detach, which
                // already cleared it.
                None => {}
            }
        }
    }
    Ok(())
}
