//! Slope extraction over scalar grids.

use std::any::Any;

use veldt_core::{
    output_as_mut, unique_input, unique_output_id, Item, ItemCore, ItemSink, ItemSource, Operator,
    OperatorContext, OperatorError, StorageError,
};

use crate::grid::ScalarGrid;

/// Computes the central-difference slope magnitude of a height grid.
///
/// Reads the unique [`ScalarGrid`] input and writes
/// `sqrt(gx² + gy²)` per cell into the unique [`ScalarGrid`] output,
/// where the gradients are central differences scaled by the cell size.
/// Cells past the border fall back to the center value, degrading to a
/// one-sided difference at the edges.
#[derive(Debug)]
pub struct SlopeOperator {
    core: ItemCore,
}

impl SlopeOperator {
    /// Class tag for the factory registry.
    pub const CLASS_TAG: &'static str = "veldt::SlopeOperator";

    /// A slope operator awaiting one input and one output grid.
    pub fn new(requested_id: impl Into<String>) -> Self {
        Self {
            core: ItemCore::new(requested_id),
        }
    }

    /// Rebuild the operator from its serialized record.
    pub fn from_source(_src: &mut dyn ItemSource) -> Result<Self, StorageError> {
        Ok(Self::new(""))
    }
}

impl Item for SlopeOperator {
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

    fn as_operator(&self) -> Option<&dyn Operator> {
        Some(self)
    }

    fn as_operator_mut(&mut self) -> Option<&mut dyn Operator> {
        Some(self)
    }

    fn serialize(&self, _sink: &mut dyn ItemSink) -> Result<(), StorageError> {
        Ok(())
    }
}

impl Operator for SlopeOperator {
    fn input_arity(&self) -> usize {
        1
    }

    fn output_arity(&self) -> usize {
        1
    }

    fn update(&mut self, ctx: &mut dyn OperatorContext) -> Result<(), OperatorError> {
        let (rows, cols, cell_size, heights) = {
            let input = unique_input::<ScalarGrid>(ctx)?;
            (
                input.rows(),
                input.cols(),
                input.cell_size(),
                input.cells().to_vec(),
            )
        };
        if cell_size <= 0.0 {
            return Err(OperatorError::ExecutionFailed {
                reason: format!("input cell size must be positive, got {cell_size}"),
            });
        }

        let out_id = unique_output_id::<ScalarGrid>(ctx)?;
        let output = output_as_mut::<ScalarGrid>(ctx, &out_id)?;
        if output.rows() != rows || output.cols() != cols {
            return Err(OperatorError::MissingOutput {
                detail: format!(
                    "output grid is {}x{}, input is {rows}x{cols}",
                    output.rows(),
                    output.cols(),
                ),
            });
        }

        let at = |r: i64, c: i64, center: f64| -> f64 {
            if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
                center
            } else {
                heights[r as usize * cols as usize + c as usize]
            }
        };
        for r in 0..rows {
            for c in 0..cols {
                let center = heights[r as usize * cols as usize + c as usize];
                let (ri, ci) = (r as i64, c as i64);
                let gx = (at(ri, ci + 1, center) - at(ri, ci - 1, center)) / (2.0 * cell_size);
                let gy = (at(ri + 1, ci, center) - at(ri - 1, ci, center)) / (2.0 * cell_size);
                output.set(r, c, (gx * gx + gy * gy).sqrt());
            }
        }
        Ok(())
    }
}
