use anyhow::{anyhow, Result};

/// Network input: a single image in NCHW order, `f32` values.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        let expected = channels * height * width;
        if data.len() != expected {
            return Err(anyhow!(
                "input tensor length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Shape as `[batch, channels, height, width]`.
    pub fn shape(&self) -> [usize; 4] {
        [1, self.channels, self.height, self.width]
    }
}

/// One output layer's result, row-major.
///
/// Each row is one candidate box: `[cx, cy, w, h, objectness, class scores...]`
/// with coordinates as fractions of the network input.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(anyhow!(
                "output tensor {}x{} does not match {} values",
                rows,
                cols,
                data.len()
            ));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from explicit rows. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|row| row.len() != cols) {
            return Err(anyhow!("output rows have different lengths"));
        }
        Self::new(rows.len(), cols, rows.concat())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        Some(&self.data[start..start + self.cols])
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(self.cols.max(1)).take(self.rows)
    }
}

/// Inference backend trait.
///
/// A backend owns the network weights and runs forward passes. Backends are
/// not assumed to be reentrant: `forward` takes `&mut self`, so callers
/// serialize inference through exclusive ownership of the model.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the network on `input` and return one tensor per output layer.
    ///
    /// `output_layers` names the layers resolved from the network config.
    /// Backends that cannot address layers by name return the graph outputs
    /// in declaration order.
    fn forward(
        &mut self,
        input: &InputTensor,
        output_layers: &[String],
    ) -> Result<Vec<OutputTensor>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_rows_are_sliced_by_cols() -> Result<()> {
        let tensor = OutputTensor::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]])?;
        assert_eq!(tensor.rows(), 2);
        assert_eq!(tensor.row(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(tensor.row(2), None);
        assert_eq!(tensor.iter_rows().count(), 2);
        Ok(())
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        assert!(OutputTensor::new(2, 3, vec![0.0; 5]).is_err());
        assert!(OutputTensor::from_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
        assert!(InputTensor::new(3, 2, 2, vec![0.0; 11]).is_err());
    }
}
