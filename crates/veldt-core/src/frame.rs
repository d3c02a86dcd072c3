//! The [`Frame`] item: a node in the coordinate frame tree.

use std::any::Any;

use veldt_transform::{
    transform_from_parts, translation_xyz, quaternion_wijk, Covariance, Transform,
    TransformWithUncertainty,
};

use crate::error::StorageError;
use crate::item::{Item, ItemCore};
use crate::storage::{ItemSink, ItemSinkExt, ItemSource, ItemSourceExt};

/// A coordinate frame.
///
/// The stored transform maps coordinates in this frame into the parent
/// frame; the parent link itself lives in the environment's frame tree.
/// Transform updates on attached frames are routed through the
/// environment so dirtiness fans out to the maps bound underneath and a
/// frame-changed event is emitted.
#[derive(Debug)]
pub struct Frame {
    core: ItemCore,
    transform: TransformWithUncertainty,
}

impl Frame {
    /// Class tag for the factory registry.
    pub const CLASS_TAG: &'static str = "veldt::Frame";

    /// A frame with the identity transform to its parent.
    pub fn new(requested_id: impl Into<String>) -> Self {
        Self::with_uncertain_transform(requested_id, TransformWithUncertainty::identity())
    }

    /// A frame with a known, certain transform to its parent.
    pub fn with_transform(requested_id: impl Into<String>, transform: Transform) -> Self {
        Self::with_uncertain_transform(requested_id, TransformWithUncertainty::certain(transform))
    }

    /// A frame with a transform carrying uncertainty.
    pub fn with_uncertain_transform(
        requested_id: impl Into<String>,
        transform: TransformWithUncertainty,
    ) -> Self {
        Self {
            core: ItemCore::new(requested_id),
            transform,
        }
    }

    /// The child-to-parent transform, with whatever uncertainty it carries.
    pub fn transform(&self) -> &TransformWithUncertainty {
        &self.transform
    }

    /// Replace the transform. Called by the environment's `set_transform`.
    pub fn set_transform(&mut self, transform: TransformWithUncertainty) {
        self.transform = transform;
    }

    /// Rebuild a frame from its serialized record.
    pub fn from_source(src: &mut dyn ItemSource) -> Result<Self, StorageError> {
        let xyz = [src.attr_f64("tx")?, src.attr_f64("ty")?, src.attr_f64("tz")?];
        let wijk = [
            src.attr_f64("qw")?,
            src.attr_f64("qi")?,
            src.attr_f64("qj")?,
            src.attr_f64("qk")?,
        ];
        let transform = transform_from_parts(xyz, wijk);
        let transform = if src.has_attr("covariance") {
            let cov = parse_covariance(src.attr("covariance")?)?;
            TransformWithUncertainty::with_covariance(transform, cov)
        } else {
            TransformWithUncertainty::certain(transform)
        };
        Ok(Self::with_uncertain_transform("", transform))
    }
}

fn parse_covariance(raw: &str) -> Result<Covariance, StorageError> {
    let mut values = [0.0_f64; 36];
    let mut count = 0;
    for (i, part) in raw.split(';').enumerate() {
        if i >= 36 {
            count = i + 1;
            break;
        }
        values[i] = part.parse().map_err(|e| StorageError::MalformedAttribute {
            key: "covariance".to_owned(),
            detail: format!("element {i}: {e}"),
        })?;
        count = i + 1;
    }
    if count != 36 {
        return Err(StorageError::MalformedAttribute {
            key: "covariance".to_owned(),
            detail: format!("expected 36 elements, got {count}"),
        });
    }
    Ok(Covariance::from_row_slice(&values))
}

impl Item for Frame {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }

    fn class_tag(&self) -> &'static str {
        Self::CLASS_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_frame(&self) -> Option<&Frame> {
        Some(self)
    }

    fn as_frame_mut(&mut self) -> Option<&mut Frame> {
        Some(self)
    }

    fn serialize(&self, sink: &mut dyn ItemSink) -> Result<(), StorageError> {
        let t = self.transform.transform();
        let [x, y, z] = translation_xyz(t);
        sink.write_f64("tx", x)?;
        sink.write_f64("ty", y)?;
        sink.write_f64("tz", z)?;
        let [w, i, j, k] = quaternion_wijk(t);
        sink.write_f64("qw", w)?;
        sink.write_f64("qi", i)?;
        sink.write_f64("qj", j)?;
        sink.write_f64("qk", k)?;
        if let Some(cov) = self.transform.covariance() {
            let joined: Vec<String> = cov
                .row_iter()
                .flat_map(|row| row.iter().map(|v| format!("{v}")).collect::<Vec<_>>())
                .collect();
            sink.write_attr("covariance", &joined.join(";"))?;
        }
        Ok(())
    }
}
