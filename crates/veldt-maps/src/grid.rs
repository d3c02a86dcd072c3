//! A 2-D scalar grid map with a binary side-file payload.

use std::any::Any;
use std::io::{Read, Write};

use veldt_core::{
    CartesianMap, Item, ItemCore, ItemId, ItemSink, ItemSinkExt, ItemSource, ItemSourceExt, Layer,
    LayerState, StorageError,
};

/// A row-major grid of `f64` cells covering a square patch per cell.
///
/// Cell `(row, col)` lives at index `row * cols + col`. The payload goes
/// into a little-endian binary side-file: two `u32` dimensions followed
/// by the cells.
#[derive(Debug)]
pub struct ScalarGrid {
    core: ItemCore,
    state: LayerState,
    requested_frame: Option<ItemId>,
    rows: u32,
    cols: u32,
    cell_size: f64,
    cells: Vec<f64>,
}

impl ScalarGrid {
    /// Class tag for the factory registry.
    pub const CLASS_TAG: &'static str = "veldt::ScalarGrid";

    /// A zero-filled grid that will bind to the root frame on attach.
    pub fn new(requested_id: impl Into<String>, rows: u32, cols: u32, cell_size: f64) -> Self {
        Self {
            core: ItemCore::new(requested_id),
            state: LayerState::new(),
            requested_frame: None,
            rows,
            cols,
            cell_size,
            cells: vec![0.0; rows as usize * cols as usize],
        }
    }

    /// A zero-filled grid that will bind to `frame` on attach.
    pub fn with_frame(
        requested_id: impl Into<String>,
        rows: u32,
        cols: u32,
        cell_size: f64,
        frame: &ItemId,
    ) -> Self {
        let mut grid = Self::new(requested_id, rows, cols, cell_size);
        grid.requested_frame = Some(frame.clone());
        grid
    }

    /// Number of rows.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Edge length of one cell, in the map frame's units.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// The cell at `(row, col)`.
    pub fn get(&self, row: u32, col: u32) -> f64 {
        self.cells[row as usize * self.cols as usize + col as usize]
    }

    /// Overwrite the cell at `(row, col)`.
    ///
    /// While attached, route through the environment's
    /// `with_item_mut` so an item-modified event is emitted.
    pub fn set(&mut self, row: u32, col: u32, value: f64) {
        self.cells[row as usize * self.cols as usize + col as usize] = value;
    }

    /// The raw cells, row-major.
    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    /// Rebuild a grid from its serialized record.
    pub fn from_source(src: &mut dyn ItemSource) -> Result<Self, StorageError> {
        let cell_size = src.attr_f64("cell_size")?;
        let mut grid = Self::new("", 0, 0, cell_size);
        src.read_blob("grid", &mut |r| {
            let rows = read_u32(r)?;
            let cols = read_u32(r)?;
            let mut cells = vec![0.0f64; rows as usize * cols as usize];
            for cell in cells.iter_mut() {
                let mut buf = [0u8; 8];
                r.read_exact(&mut buf)?;
                *cell = f64::from_le_bytes(buf);
            }
            grid.rows = rows;
            grid.cols = cols;
            grid.cells = cells;
            Ok(())
        })?;
        Ok(grid)
    }
}

fn read_u32(r: &mut dyn Read) -> Result<u32, StorageError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

impl Item for ScalarGrid {
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
        sink.write_f64("cell_size", self.cell_size)?;
        sink.write_blob("grid", &mut |w: &mut dyn Write| {
            w.write_all(&self.rows.to_le_bytes())?;
            w.write_all(&self.cols.to_le_bytes())?;
            for cell in &self.cells {
                w.write_all(&cell.to_le_bytes())?;
            }
            Ok(())
        })
    }
}

impl Layer for ScalarGrid {
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

impl CartesianMap for ScalarGrid {
    fn dimension(&self) -> u32 {
        2
    }

    fn requested_frame(&self) -> Option<&ItemId> {
        self.requested_frame.as_ref()
    }
}
