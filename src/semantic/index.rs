//! Flat, exact nearest-neighbor index over place-review embeddings.
//!
//! Rows keep the order of the index file. Row `i` pairs with
//! row `i` of the places table; see [`crate::semantic::PlaceCatalog`].

/// Read-only vector index searched by squared euclidean distance.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    /// Row-major storage, `len * dimensions` floats
    data: Vec<f32>,
    /// Embedding dimensions
    dimensions: usize,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Vector contains NaN or infinite values")]
    NonFiniteVector,
}

impl VectorIndex {
    /// Build an index from flat row-major data.
    pub fn from_flat(dimensions: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dimensions == 0 || data.len() % dimensions != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: data.len(),
            });
        }
        Ok(Self { data, dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of rows in the index.
    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over all rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions.max(1))
    }

    /// Search for the `k` rows closest to `query`.
    ///
    /// Returns `(row, squared_l2_distance)` pairs sorted by ascending
    /// distance. Equal distances keep row order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        if k == 0 || self.is_empty() {
            return Ok(vec![]);
        }

        let mut results: Vec<(usize, f32)> = self
            .rows()
            .enumerate()
            .map(|(row, target)| (row, squared_l2(query, target)))
            .collect();

        // stable sort keeps row order on ties; NaN distances sort last
        results.sort_by(|a, b| {
            a.1.is_nan()
                .cmp(&b.1.is_nan())
                .then_with(|| a.1.total_cmp(&b.1))
        });
        results.truncate(k);

        Ok(results)
    }
}

/// Squared euclidean distance between two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place.
pub fn normalize(v: &mut [f32]) -> Result<(), IndexError> {
    let norm = l2_norm(v);
    if !norm.is_finite() {
        return Err(IndexError::NonFiniteVector);
    }
    if norm < f32::EPSILON {
        return Err(IndexError::ZeroNormVector);
    }
    v.iter_mut().for_each(|x| *x /= norm);
    Ok(())
}
