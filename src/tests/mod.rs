//! Shared fixtures for unit and pipeline tests.


use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;

use crate::geocode::{Coordinates, GeocodeError, GeocodingProvider, Sleeper};
use crate::places::{PlaceRecord, PlaceTable};
use crate::semantic::catalog::PlaceCatalog;
use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::index::VectorIndex;
use crate::semantic::storage::FAISS_FLAT_L2;
use crate::semantic::{EmbeddingProvider, ScoredCandidate};

/// Serve `router` on an ephemeral localhost port from a background thread.
/// The server lives until the test process exits.
pub fn spawn_stub(router: Router) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind stub");
    listener
        .set_nonblocking(true)
        .expect("failed to set nonblocking");
    let addr = listener.local_addr().expect("no local addr");

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build stub runtime");
        rt.block_on(async move {
            let listener =
                tokio::net::TcpListener::from_std(listener).expect("failed to adopt listener");
            axum::serve(listener, router).await.expect("stub server failed");
        });
    });

    addr
}

/// Returns the same vector for every text.
pub struct FixedEmbedder {
    vector: Vec<f32>,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

impl EmbeddingProvider for FixedEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.vector.len())
    }
}

/// Behaves like a hosted provider rejecting the API key.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Api {
            status: 401,
            message: "invalid api key".to_string(),
        })
    }

    fn name(&self) -> &str {
        "failing"
    }
}

pub fn place(name: &str) -> PlaceRecord {
    PlaceRecord {
        name: name.to_string(),
        address: format!("{name} street"),
        review_text: format!("review of {name}"),
    }
}

/// Catalog whose row `i` ("place-{i}") sits at squared distance
/// `distances[i]` from the returned unit query vector.
///
/// The query is `e0`; row `i` is `e0 + sqrt(d_i) * e_{i+1}`.
pub fn catalog_with_distances(distances: &[f32]) -> (PlaceCatalog, Vec<f32>) {
    let dims = distances.len() + 1;
    let mut data = vec![0.0; dims * distances.len()];
    for (i, d) in distances.iter().enumerate() {
        let row = &mut data[i * dims..(i + 1) * dims];
        row[0] = 1.0;
        row[i + 1] = d.sqrt();
    }
    let index = VectorIndex::from_flat(dims, data).expect("rows have index dimensions");

    let places = PlaceTable::new(
        (0..distances.len())
            .map(|i| place(&format!("place-{i}")))
            .collect(),
    );

    let mut query = vec![0.0; dims];
    query[0] = 1.0;

    let catalog = PlaceCatalog::from_parts(index, places).expect("aligned catalog");
    (catalog, query)
}

/// Bytes of a FAISS IndexFlatL2 file holding `rows`.
pub fn faiss_flat_bytes(dimensions: i32, rows: &[Vec<f32>], metric: i32) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(FAISS_FLAT_L2);
    bytes.extend_from_slice(&dimensions.to_le_bytes());
    bytes.extend_from_slice(&(rows.len() as i64).to_le_bytes());
    bytes.extend_from_slice(&(1i64 << 20).to_le_bytes());
    bytes.extend_from_slice(&(1i64 << 20).to_le_bytes());
    bytes.push(1);
    bytes.extend_from_slice(&metric.to_le_bytes());
    let floats: Vec<f32> = rows.iter().flatten().copied().collect();
    bytes.extend_from_slice(&(floats.len() as u64).to_le_bytes());
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

pub fn write_faiss_flat(path: &Path, dimensions: i32, rows: &[Vec<f32>], metric: i32) {
    std::fs::write(path, faiss_flat_bytes(dimensions, rows, metric)).unwrap();
}

pub fn candidate(name: &str, similarity: f32) -> ScoredCandidate {
    ScoredCandidate {
        place: place(name),
        distance: 2.0 * (1.0 - similarity),
        similarity,
    }
}

type Script = VecDeque<Result<Option<Coordinates>, GeocodeError>>;

/// Geocoder answering from a per-place script. Clones share state so
/// tests can count calls after handing a clone to the resolver.
/// Unknown or exhausted places return no match.
#[derive(Clone, Default)]
pub struct ScriptedGeocoder {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl ScriptedGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, answers: Vec<Result<Option<Coordinates>, GeocodeError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), answers.into());
        self
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl GeocodingProvider for ScriptedGeocoder {
    fn lookup(&self, name: &str, _address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        *self.calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
        self.scripts
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(|script| script.pop_front())
            .unwrap_or(Ok(None))
    }
}

/// Records requested pauses instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
