//! Reader for the place-review vector index.
//!
//! The index is a FAISS `IndexFlatL2` as produced by `faiss.write_index`:
//! - fourcc b"IxF2", d: i32, ntotal: i64, two i64 placeholders,
//!   is_trained: u8, metric_type: i32
//! - a u64 float count followed by `ntotal * d` little-endian f32 values,
//!   one row per place in catalog order.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use crate::semantic::index::VectorIndex;

pub const FAISS_FLAT_L2: &[u8; 4] = b"IxF2";
const FAISS_FLAT_IP: &[u8; 4] = b"IxFI";

/// FAISS `MetricType::METRIC_L2`
pub const FAISS_METRIC_L2: i32 = 1;

/// Bytes before the float payload: fourcc, d, ntotal, two placeholders,
/// is_trained, metric_type and the float count.
const FAISS_HEADER_SIZE: u64 = 4 + 4 + 8 + 8 + 8 + 1 + 4 + 8;

/// Errors that can occur while loading the index file.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported index metric: {0} (only squared L2 flat indexes are supported)")]
    UnsupportedMetric(String),
}

/// Read-only access to the vector index file.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(truncated)?;

        match &magic {
            FAISS_FLAT_L2 => Self::read_faiss_flat(&mut reader, file_len),
            FAISS_FLAT_IP => Err(VectorStorageError::UnsupportedMetric(
                "inner product".to_string(),
            )),
            other => Err(VectorStorageError::InvalidFormat(format!(
                "unknown file signature {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn read_faiss_flat<R: Read>(
        reader: &mut R,
        file_len: u64,
    ) -> Result<VectorIndex, VectorStorageError> {
        let dimensions = read_i32(reader)?;
        let ntotal = read_i64(reader)?;
        let _dummy = read_i64(reader)?;
        let _dummy = read_i64(reader)?;
        let mut is_trained = [0u8; 1];
        reader.read_exact(&mut is_trained).map_err(truncated)?;
        let metric = read_i32(reader)?;

        if metric != FAISS_METRIC_L2 {
            return Err(VectorStorageError::UnsupportedMetric(format!(
                "faiss metric type {metric}"
            )));
        }
        if dimensions <= 0 || ntotal < 0 {
            return Err(VectorStorageError::InvalidFormat(format!(
                "faiss header d={dimensions} ntotal={ntotal}"
            )));
        }

        let float_count = read_i64(reader)? as u64;
        let expected = (dimensions as u64).checked_mul(ntotal as u64);
        if expected != Some(float_count) {
            return Err(VectorStorageError::InvalidFormat(format!(
                "faiss payload has {float_count} floats, header says {ntotal} x {dimensions}"
            )));
        }

        let payload = file_len.saturating_sub(FAISS_HEADER_SIZE);
        match float_count.checked_mul(4) {
            Some(bytes) if bytes <= payload => {}
            _ => {
                return Err(VectorStorageError::InvalidFormat(format!(
                    "faiss header promises {float_count} floats but the file holds {} bytes of rows",
                    payload
                )))
            }
        }

        let data = read_floats(reader, float_count as usize)?;
        VectorIndex::from_flat(dimensions as usize, data)
            .map_err(|e| VectorStorageError::InvalidFormat(e.to_string()))
    }
}

fn truncated(e: std::io::Error) -> VectorStorageError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            VectorStorageError::InvalidFormat("file ends before the header is complete".into())
        }
        _ => VectorStorageError::Io(e),
    }
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32, VectorStorageError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes).map_err(truncated)?;
    Ok(i32::from_le_bytes(bytes))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64, VectorStorageError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes).map_err(truncated)?;
    Ok(i64::from_le_bytes(bytes))
}

/// `count` must already be bounded by the file length.
fn read_floats<R: Read>(reader: &mut R, count: usize) -> Result<Vec<f32>, VectorStorageError> {
    let mut data = Vec::with_capacity(count);
    let mut float_bytes = [0u8; 4];
    for _ in 0..count {
        reader.read_exact(&mut float_bytes).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                VectorStorageError::InvalidFormat("file ends before all rows were read".into())
            }
            _ => VectorStorageError::Io(e),
        })?;
        data.push(f32::from_le_bytes(float_bytes));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{faiss_flat_bytes, write_faiss_flat};

    #[test]
    fn test_load_faiss_flat_l2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss_index.bin");
        write_faiss_flat(&path, 2, &[vec![1.0, 0.0], vec![0.0, 1.0]], FAISS_METRIC_L2);

        let index = VectorStorage::new(path).load().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.dimensions(), 2);
        let rows: Vec<&[f32]> = index.rows().collect();
        assert_eq!(rows, vec![&[1.0, 0.0][..], &[0.0, 1.0][..]]);
    }

    #[test]
    fn test_load_empty_faiss_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss_index.bin");
        write_faiss_flat(&path, 384, &[], FAISS_METRIC_L2);

        let index = VectorStorage::new(path).load().unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), 384);
    }

    #[test]
    fn test_faiss_non_l2_metric_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss_index.bin");
        write_faiss_flat(&path, 2, &[vec![1.0, 0.0]], 0);

        let result = VectorStorage::new(path).load();
        assert!(matches!(result, Err(VectorStorageError::UnsupportedMetric(_))));
    }

    #[test]
    fn test_faiss_inner_product_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss_index.bin");
        let mut bytes = faiss_flat_bytes(2, &[vec![1.0, 0.0]], FAISS_METRIC_L2);
        bytes[..4].copy_from_slice(FAISS_FLAT_IP);
        std::fs::write(&path, bytes).unwrap();

        let result = VectorStorage::new(path).load();
        assert!(matches!(result, Err(VectorStorageError::UnsupportedMetric(_))));
    }

    #[test]
    fn test_truncated_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss_index.bin");
        let bytes = faiss_flat_bytes(3, &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]], FAISS_METRIC_L2);
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let result = VectorStorage::new(path).load();
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_truncated_header_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss_index.bin");
        std::fs::write(&path, b"IxF2\x02\x00").unwrap();

        let result = VectorStorage::new(path).load();
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_float_count_must_match_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss_index.bin");
        let mut bytes = faiss_flat_bytes(2, &[vec![1.0, 0.0]], FAISS_METRIC_L2);
        // float count sits right after the metric
        bytes[37..45].copy_from_slice(&3u64.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let result = VectorStorage::new(path).load();
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_faiss_oversized_header_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss_index.bin");
        let mut bytes = faiss_flat_bytes(2, &[], FAISS_METRIC_L2);
        bytes[8..16].copy_from_slice(&(1i64 << 61).to_le_bytes());
        bytes[37..45].copy_from_slice(&(1u64 << 62).to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let result = VectorStorage::new(path).load();
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_overflowing_row_count_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss_index.bin");
        let mut bytes = faiss_flat_bytes(4, &[], FAISS_METRIC_L2);
        bytes[8..16].copy_from_slice(&i64::MAX.to_le_bytes());
        bytes[37..45].copy_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let result = VectorStorage::new(path).load();
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_unknown_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"IwHNxxxxxxxx").unwrap();

        let result = VectorStorage::new(path).load();
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = VectorStorage::new(dir.path().join("missing.bin")).load();
        assert!(matches!(result, Err(VectorStorageError::Io(_))));
    }
}
