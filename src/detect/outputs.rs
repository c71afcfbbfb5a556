use anyhow::{anyhow, Result};

/// Column where per-class scores start in a darknet-style output row.
///
/// Rows are laid out as `[center_x, center_y, width, height, objectness, score_0, score_1, ...]`
/// with box fields normalized to the model input.
pub const CLASS_SCORES_OFFSET: usize = 5;

/// One 2-D output tensor: `rows` candidate boxes of `cols` values each.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputTensor {
    cols: usize,
    data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if cols <= CLASS_SCORES_OFFSET {
            return Err(anyhow!(
                "output rows need more than {} columns, got {}",
                CLASS_SCORES_OFFSET,
                cols
            ));
        }
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| anyhow!("output tensor shape overflows"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "output tensor length mismatch: {}x{} needs {}, got {}",
                rows,
                cols,
                expected,
                data.len()
            ));
        }
        Ok(Self { cols, data })
    }

    /// Build a tensor from already-shaped rows. All rows must have the same width.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(CLASS_SCORES_OFFSET + 1);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(anyhow!("ragged output rows: {} vs {}", row.len(), cols));
            }
            data.extend_from_slice(row);
        }
        Self::new(rows.len(), cols, data)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn num_rows(&self) -> usize {
        self.data.len() / self.cols
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.cols)
    }
}

/// Complete network output for one frame (one tensor per output layer).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawOutputs {
    tensors: Vec<OutputTensor>,
}

impl RawOutputs {
    pub fn new(tensors: Vec<OutputTensor>) -> Self {
        Self { tensors }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tensors(&self) -> &[OutputTensor] {
        &self.tensors
    }

    /// Iterate every candidate row across all output layers, in layer order.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.tensors.iter().flat_map(OutputTensor::rows)
    }

    pub fn num_rows(&self) -> usize {
        self.tensors.iter().map(OutputTensor::num_rows).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_shape_is_validated() {
        assert!(OutputTensor::new(2, 6, vec![0.0; 12]).is_ok());
        assert!(OutputTensor::new(2, 6, vec![0.0; 11]).is_err());
        assert!(OutputTensor::new(1, 5, vec![0.0; 5]).is_err());
        assert!(OutputTensor::from_rows(&[vec![0.0; 6], vec![0.0; 7]]).is_err());
    }

    #[test]
    fn rows_span_all_layers_in_order() {
        let a = OutputTensor::from_rows(&[vec![1.0; 6]]).unwrap();
        let b = OutputTensor::from_rows(&[vec![2.0; 6], vec![3.0; 6]]).unwrap();
        let outputs = RawOutputs::new(vec![a, b]);
        let firsts: Vec<f32> = outputs.rows().map(|row| row[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 3.0]);
        assert_eq!(outputs.num_rows(), 3);
    }

    #[test]
    fn empty_tensor_has_no_rows() {
        let tensor = OutputTensor::from_rows(&[]).unwrap();
        assert_eq!(tensor.num_rows(), 0);
        assert_eq!(RawOutputs::empty().rows().count(), 0);
    }
}
