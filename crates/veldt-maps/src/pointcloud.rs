//! A 3-D point cloud map, serialized as an ASCII PLY side-file.

use std::any::Any;
use std::io::{BufRead, BufReader, Write};

use nalgebra::Point3;

use veldt_core::{
    CartesianMap, EnvError, Item, ItemCore, ItemId, ItemSink, ItemSinkExt, ItemSource,
    ItemSourceExt, Layer, LayerState, StorageError,
};
use veldt_env::Environment;
use veldt_transform::{quaternion_wijk, transform_from_parts, translation_xyz, Transform};

/// A cartesian map holding raw 3-D points.
///
/// The sensor origin records where the points were captured from,
/// relative to the cloud's own frame. Point data round-trips through an
/// ASCII PLY side-file.
#[derive(Debug)]
pub struct Pointcloud {
    core: ItemCore,
    state: LayerState,
    requested_frame: Option<ItemId>,
    sensor_origin: Transform,
    /// The raw points, in the cloud's own frame.
    pub vertices: Vec<Point3<f64>>,
}

impl Pointcloud {
    /// Class tag for the factory registry.
    pub const CLASS_TAG: &'static str = "veldt::Pointcloud";

    /// An empty cloud that will bind to the root frame on attach.
    pub fn new(requested_id: impl Into<String>) -> Self {
        Self {
            core: ItemCore::new(requested_id),
            state: LayerState::new(),
            requested_frame: None,
            sensor_origin: Transform::identity(),
            vertices: Vec::new(),
        }
    }

    /// An empty cloud that will bind to `frame` on attach.
    pub fn with_frame(requested_id: impl Into<String>, frame: &ItemId) -> Self {
        let mut cloud = Self::new(requested_id);
        cloud.requested_frame = Some(frame.clone());
        cloud
    }

    /// Where the points were captured from, in the cloud's frame.
    pub fn sensor_origin(&self) -> &Transform {
        &self.sensor_origin
    }

    /// Record the capture pose.
    pub fn set_sensor_origin(&mut self, origin: Transform) {
        self.sensor_origin = origin;
    }

    /// The frame this cloud is bound to in `env`.
    fn bound_frame(&self, env: &Environment) -> Result<ItemId, EnvError> {
        let id = self.core.id().ok_or_else(|| EnvError::Unattached {
            id: self.core.display_id(),
        })?;
        env.frame_of_map(id).cloned().ok_or_else(|| EnvError::NotFound {
            what: format!("frame binding of '{id}'"),
        })
    }

    /// Transform a point from `frame` into this cloud's own frame.
    pub fn to_map(
        &self,
        env: &Environment,
        point: Point3<f64>,
        frame: &ItemId,
    ) -> Result<Point3<f64>, EnvError> {
        let own = self.bound_frame(env)?;
        Ok(env.relative_transform(frame, &own)? * point)
    }

    /// Transform a point from the root frame into this cloud's frame.
    pub fn to_map_from_root(
        &self,
        env: &Environment,
        point: Point3<f64>,
    ) -> Result<Point3<f64>, EnvError> {
        let root = env.root_frame().clone();
        self.to_map(env, point, &root)
    }

    /// Transform a point from this cloud's own frame into `frame`.
    pub fn from_map(
        &self,
        env: &Environment,
        point: Point3<f64>,
        frame: &ItemId,
    ) -> Result<Point3<f64>, EnvError> {
        let own = self.bound_frame(env)?;
        Ok(env.relative_transform(&own, frame)? * point)
    }

    /// Transform a point from this cloud's own frame into the root frame.
    pub fn from_map_to_root(
        &self,
        env: &Environment,
        point: Point3<f64>,
    ) -> Result<Point3<f64>, EnvError> {
        let root = env.root_frame().clone();
        self.from_map(env, point, &root)
    }

    /// Replace `dst`'s points with `src`'s, reprojecting through the
    /// relative transform of the two clouds' frames when `reproject` is
    /// set.
    pub fn copy_from(
        env: &mut Environment,
        dst: &ItemId,
        src: &ItemId,
        reproject: bool,
    ) -> Result<(), EnvError> {
        let src_frame = env.frame_of_map(src).cloned().ok_or_else(|| EnvError::NotFound {
            what: format!("frame binding of '{src}'"),
        })?;
        let dst_frame = env.frame_of_map(dst).cloned().ok_or_else(|| EnvError::NotFound {
            what: format!("frame binding of '{dst}'"),
        })?;
        let relative = env.relative_transform(&src_frame, &dst_frame)?;

        let source = env
            .get_with_id::<Pointcloud>(src)
            .ok_or_else(|| EnvError::NotFound {
                what: format!("point cloud '{src}'"),
            })?;
        let vertices: Vec<Point3<f64>> = if reproject {
            source.vertices.iter().map(|p| relative * p).collect()
        } else {
            source.vertices.clone()
        };
        env.with_item_mut::<Pointcloud, _>(dst, |cloud| cloud.vertices = vertices)?;
        Ok(())
    }

    fn write_ply(&self, w: &mut dyn Write) -> Result<(), StorageError> {
        writeln!(w, "ply")?;
        writeln!(w, "format ascii 1.0")?;
        writeln!(w, "element vertex {}", self.vertices.len())?;
        writeln!(w, "property double x")?;
        writeln!(w, "property double y")?;
        writeln!(w, "property double z")?;
        writeln!(w, "end_header")?;
        for v in &self.vertices {
            writeln!(w, "{} {} {}", v.x, v.y, v.z)?;
        }
        Ok(())
    }

    fn read_ply(r: &mut dyn std::io::Read) -> Result<Vec<Point3<f64>>, StorageError> {
        let reader = BufReader::new(r);
        let mut expected = 0usize;
        let mut in_header = true;
        let mut vertices = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if in_header {
                if let Some(rest) = line.strip_prefix("element vertex ") {
                    expected = rest.parse().map_err(|e| StorageError::MalformedAttribute {
                        key: "element vertex".to_owned(),
                        detail: format!("{e}"),
                    })?;
                }
                if line == "end_header" {
                    in_header = false;
                }
                continue;
            }
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let mut next = || -> Result<f64, StorageError> {
                parts
                    .next()
                    .ok_or_else(|| StorageError::MalformedAttribute {
                        key: "vertex".to_owned(),
                        detail: "short vertex line".to_owned(),
                    })?
                    .parse()
                    .map_err(|e| StorageError::MalformedAttribute {
                        key: "vertex".to_owned(),
                        detail: format!("{e}"),
                    })
            };
            let (x, y, z) = (next()?, next()?, next()?);
            vertices.push(Point3::new(x, y, z));
        }
        if vertices.len() != expected {
            return Err(StorageError::MalformedAttribute {
                key: "element vertex".to_owned(),
                detail: format!("declared {expected} vertices, found {}", vertices.len()),
            });
        }
        Ok(vertices)
    }

    /// Rebuild a cloud from its serialized record.
    pub fn from_source(src: &mut dyn ItemSource) -> Result<Self, StorageError> {
        let mut cloud = Self::new("");
        if src.has_attr("sx") {
            let xyz = [src.attr_f64("sx")?, src.attr_f64("sy")?, src.attr_f64("sz")?];
            let wijk = [
                src.attr_f64("sqw")?,
                src.attr_f64("sqi")?,
                src.attr_f64("sqj")?,
                src.attr_f64("sqk")?,
            ];
            cloud.sensor_origin = transform_from_parts(xyz, wijk);
        }
        let mut vertices = Vec::new();
        src.read_blob("ply", &mut |r| {
            vertices = Self::read_ply(r)?;
            Ok(())
        })?;
        cloud.vertices = vertices;
        Ok(cloud)
    }
}

impl Item for Pointcloud {
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

    fn as_layer(&self) -> Option<&dyn Layer> {
        Some(self)
    }

    fn as_layer_mut(&mut self) -> Option<&mut dyn Layer> {
        Some(self)
    }

    fn serialize(&self, sink: &mut dyn ItemSink) -> Result<(), StorageError> {
        let [x, y, z] = translation_xyz(&self.sensor_origin);
        sink.write_f64("sx", x)?;
        sink.write_f64("sy", y)?;
        sink.write_f64("sz", z)?;
        let [w, i, j, k] = quaternion_wijk(&self.sensor_origin);
        sink.write_f64("sqw", w)?;
        sink.write_f64("sqi", i)?;
        sink.write_f64("sqj", j)?;
        sink.write_f64("sqk", k)?;
        sink.write_blob("ply", &mut |w| self.write_ply(w))
    }
}

impl Layer for Pointcloud {
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

impl CartesianMap for Pointcloud {
    fn dimension(&self) -> u32 {
        3
    }

    fn requested_frame(&self) -> Option<&ItemId> {
        self.requested_frame.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veldt_core::MemSink;

    #[test]
    fn ply_roundtrip_is_exact() {
        let mut cloud = Pointcloud::new("cloud/");
        cloud.vertices = vec![
            Point3::new(0.1, -2.0, 1.0 / 3.0),
            Point3::new(1e-300, 2e17, -0.0),
        ];
        let mut sink = MemSink::default();
        cloud.serialize(&mut sink).unwrap();
        let mut src = sink.into_source();
        let rebuilt = Pointcloud::from_source(&mut src).unwrap();
        assert_eq!(rebuilt.vertices, cloud.vertices);
    }

    #[test]
    fn vertex_count_mismatch_is_rejected() {
        let mut sink = MemSink::default();
        sink.write_blob("ply", &mut |w| {
            writeln!(w, "ply")?;
            writeln!(w, "format ascii 1.0")?;
            writeln!(w, "element vertex 2")?;
            writeln!(w, "end_header")?;
            writeln!(w, "0 0 0")?;
            Ok(())
        })
        .unwrap();
        let mut src = sink.into_source();
        assert!(Pointcloud::from_source(&mut src).is_err());
    }
}
