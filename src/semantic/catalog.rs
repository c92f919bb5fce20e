//! Row-aligned pairing of the vector index and the places table.
//!
//! Neither file carries a key: row `i` of the index was embedded from row
//! `i` of the table. The catalog checks that both sides have the same row
//! count when it is built and only ever hands out joined records.

use std::path::Path;

use crate::places::{PlaceRecord, PlaceTable, PlaceTableError};
use crate::semantic::index::{IndexError, VectorIndex};
use crate::semantic::storage::{VectorStorage, VectorStorageError};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("vector index has {index} rows but places table has {metadata}; both must be built from the same reviews")]
    RowCountMismatch { index: usize, metadata: usize },

    #[error("vector index has {index} dimensions but the embedding provider produces {provider}")]
    DimensionMismatch { index: usize, provider: usize },

    #[error("failed to load vector index: {0}")]
    Index(#[from] VectorStorageError),

    #[error("failed to load places table: {0}")]
    Places(#[from] PlaceTableError),
}

/// A search hit joined with its place record.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub place: &'a PlaceRecord,
    /// Squared euclidean distance to the query
    pub distance: f32,
}

#[derive(Debug)]
pub struct PlaceCatalog {
    index: VectorIndex,
    places: PlaceTable,
}

impl PlaceCatalog {
    /// Load the index and places table from disk and validate alignment.
    ///
    /// `expected_dimensions` is the embedding provider's output size when
    /// known up front.
    pub fn open(
        index_path: &Path,
        places_path: &Path,
        expected_dimensions: Option<usize>,
    ) -> Result<Self, CatalogError> {
        let index = VectorStorage::new(index_path.to_path_buf()).load()?;
        let places = PlaceTable::load(places_path)?;

        if let Some(provider) = expected_dimensions {
            if provider != index.dimensions() {
                return Err(CatalogError::DimensionMismatch {
                    index: index.dimensions(),
                    provider,
                });
            }
        }

        let catalog = Self::from_parts(index, places)?;
        if catalog.is_empty() {
            log::warn!("catalog is empty, every query will return no places");
        }
        log::info!(
            "catalog ready: {} places, {} dimensions",
            catalog.len(),
            catalog.dimensions()
        );
        Ok(catalog)
    }

    pub fn from_parts(index: VectorIndex, places: PlaceTable) -> Result<Self, CatalogError> {
        if index.len() != places.len() {
            return Err(CatalogError::RowCountMismatch {
                index: index.len(),
                metadata: places.len(),
            });
        }
        Ok(Self { index, places })
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.index.dimensions()
    }

    /// Find the `k` places whose embeddings are closest to `query`,
    /// nearest first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor<'_>>, IndexError> {
        let hits = self.index.search(query, k)?;

        Ok(hits
            .into_iter()
            .filter_map(|(row, distance)| {
                self.places
                    .get(row)
                    .map(|place| Neighbor { place, distance })
            })
            .collect())
    }
}
