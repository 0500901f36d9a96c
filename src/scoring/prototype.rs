use std::path::Path;

use crate::error::EngineError;

/// Per-vocabulary prototype rows the expected-token sequence is built
/// from: `vocab_size` rows of `hidden_dim` f32 values, row-major.
pub struct PrototypeMatrix {
    vocab_size: usize,
    hidden_dim: usize,
    data: Vec<f32>,
}

impl PrototypeMatrix {
    pub fn new(vocab_size: usize, hidden_dim: usize, data: Vec<f32>) -> Result<Self, EngineError> {
        if vocab_size == 0 || hidden_dim == 0 {
            return Err(EngineError::invalid_input(
                "prototype matrix dimensions must be positive",
            ));
        }
        if data.len() != vocab_size * hidden_dim {
            return Err(EngineError::invalid_input(format!(
                "prototype matrix data length {} does not match {}x{}",
                data.len(),
                vocab_size,
                hidden_dim
            )));
        }
        Ok(Self {
            vocab_size,
            hidden_dim,
            data,
        })
    }

    /// Loads the sidecar pair written by the extraction tool: a plain-text
    /// shape file (`"<vocab_size> <hidden_dim>"`) and a raw little-endian
    /// f32 blob of exactly `vocab_size * hidden_dim * 4` bytes.
    pub fn load(shape_path: &Path, matrix_path: &Path) -> Result<Self, EngineError> {
        let shape_text = std::fs::read_to_string(shape_path)
            .map_err(|e| EngineError::io("read prototype shape file", e))?;
        let mut parts = shape_text.split_whitespace();
        let vocab_size: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| EngineError::invalid_input("malformed prototype shape file"))?;
        let hidden_dim: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| EngineError::invalid_input("malformed prototype shape file"))?;

        let bytes = std::fs::read(matrix_path)
            .map_err(|e| EngineError::io("read prototype matrix file", e))?;
        let expected = vocab_size * hidden_dim * 4;
        if bytes.len() != expected {
            return Err(EngineError::invalid_input(format!(
                "prototype matrix blob is {} bytes, expected {expected} for {vocab_size}x{hidden_dim}",
                bytes.len()
            )));
        }

        let data: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        tracing::info!(vocab_size, hidden_dim, "prototype matrix loaded");
        Self::new(vocab_size, hidden_dim, data)
    }

    /// Deterministic synthetic matrix for environments without a sidecar
    /// file. Values are a hash-derived fill in [-1, 1). Scoring quality
    /// degrades substantially; never ship this path to production.
    pub fn synthetic(vocab_size: usize, hidden_dim: usize) -> Self {
        let mut data = Vec::with_capacity(vocab_size * hidden_dim);
        for index in 0..vocab_size * hidden_dim {
            data.push(splitmix_unit(index as u64));
        }
        Self {
            vocab_size,
            hidden_dim,
            data,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Row for a token id; out-of-range ids clamp to the last row.
    pub fn row(&self, token_id: usize) -> &[f32] {
        let id = token_id.min(self.vocab_size - 1);
        &self.data[id * self.hidden_dim..(id + 1) * self.hidden_dim]
    }
}

fn splitmix_unit(index: u64) -> f32 {
    let mut z = index.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 40) as f32 / (1u64 << 23) as f32 * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_round_trips_sidecar_files() {
        let dir = tempfile::tempdir().unwrap();
        let shape_path = dir.path().join("matrix_shape.txt");
        let matrix_path = dir.path().join("prototype_matrix.bin");

        std::fs::write(&shape_path, "2 3").unwrap();
        let values = [1.0f32, 2.0, 3.0, -1.0, -2.0, -3.0];
        let mut file = std::fs::File::create(&matrix_path).unwrap();
        for v in values {
            file.write_all(&v.to_le_bytes()).unwrap();
        }

        let matrix = PrototypeMatrix::load(&shape_path, &matrix_path).unwrap();
        assert_eq!(matrix.vocab_size(), 2);
        assert_eq!(matrix.hidden_dim(), 3);
        assert_eq!(matrix.row(0), &[1.0, 2.0, 3.0]);
        assert_eq!(matrix.row(1), &[-1.0, -2.0, -3.0]);
    }

    #[test]
    fn load_rejects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let shape_path = dir.path().join("matrix_shape.txt");
        let matrix_path = dir.path().join("prototype_matrix.bin");
        std::fs::write(&shape_path, "4 4").unwrap();
        std::fs::write(&matrix_path, [0u8; 12]).unwrap();
        assert!(PrototypeMatrix::load(&shape_path, &matrix_path).is_err());
    }

    #[test]
    fn load_rejects_malformed_shape() {
        let dir = tempfile::tempdir().unwrap();
        let shape_path = dir.path().join("matrix_shape.txt");
        let matrix_path = dir.path().join("prototype_matrix.bin");
        std::fs::write(&shape_path, "not numbers").unwrap();
        std::fs::write(&matrix_path, [0u8; 4]).unwrap();
        assert!(PrototypeMatrix::load(&shape_path, &matrix_path).is_err());
    }

    #[test]
    fn synthetic_matrix_is_deterministic_and_bounded() {
        let a = PrototypeMatrix::synthetic(8, 16);
        let b = PrototypeMatrix::synthetic(8, 16);
        for id in 0..8 {
            assert_eq!(a.row(id), b.row(id));
            assert!(a.row(id).iter().all(|v| (-1.0..1.0).contains(v)));
        }
        // Rows differ from one another, so distinct tokens stay separable.
        assert_ne!(a.row(0), a.row(1));
    }

    #[test]
    fn out_of_range_row_clamps() {
        let matrix = PrototypeMatrix::new(2, 2, vec![0.0, 0.0, 1.0, 1.0]).unwrap();
        assert_eq!(matrix.row(99), matrix.row(1));
    }
}
