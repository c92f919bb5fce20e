//! Places table loaded from the reviews CSV.
//!
//! Row order is significant: row `i` describes the review whose embedding
//! sits at row `i` of the vector index.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Columns every places table must carry.
pub const REQUIRED_COLUMNS: [&str; 3] = ["name", "address", "review_text"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub name: String,
    pub address: String,
    pub review_text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaceTableError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("places table is missing column '{0}'")]
    MissingColumn(&'static str),
}

/// Immutable, row-ordered collection of place records.
#[derive(Debug, Clone, Default)]
pub struct PlaceTable {
    records: Vec<PlaceRecord>,
}

impl PlaceTable {
    pub fn new(records: Vec<PlaceRecord>) -> Self {
        Self { records }
    }

    /// Read a places CSV. Extra columns (e.g. a stored `embedding`
    /// column) are ignored.
    pub fn load(path: &Path) -> Result<Self, PlaceTableError> {
        let now = Instant::now();
        let reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let table = Self::from_reader(reader)?;

        log::debug!(
            "loaded {} places from {} in {:?}",
            table.len(),
            path.display(),
            now.elapsed()
        );

        Ok(table)
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self, PlaceTableError> {
        let headers = reader.headers()?.clone();
        let mut positions = [0usize; 3];
        for (slot, column) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = headers
                .iter()
                .position(|h| h.trim() == column)
                .ok_or(PlaceTableError::MissingColumn(column))?;
        }
        let [name, address, review_text] = positions;

        let mut records = vec![];
        for record in reader.records() {
            let record = record?;
            let cell = |idx: usize| record.get(idx).unwrap_or_default().to_string();
            records.push(PlaceRecord {
                name: cell(name),
                address: cell(address),
                review_text: cell(review_text),
            });
        }

        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&PlaceRecord> {
        self.records.get(row)
    }
}
