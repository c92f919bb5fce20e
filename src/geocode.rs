//! Geocoding: place name + address to coordinates.
//!
//! [`GoogleGeocoder`] talks to the Geocoding API. [`GeocodeResolver`]
//! wraps any provider with a fixed-backoff retry policy and turns every
//! failure into a per-place [`LocationUnavailable`].

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::semantic::ScoredCandidate;

pub const DEFAULT_GEOCODE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GeocodeError {
    /// Network failure, non-2xx HTTP status or an undecodable body;
    /// worth retrying.
    #[error("geocoding request failed: {0}")]
    Transient(String),

    /// Provider answered with an error status such as `REQUEST_DENIED`.
    #[error("geocoding provider error: {0}")]
    Api(String),
}

impl GeocodeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GeocodeError::Transient(_))
    }
}

/// A place could not be put on the map. Not fatal for the query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("location unavailable for '{name}, {address}': {reason}")]
pub struct LocationUnavailable {
    pub name: String,
    pub address: String,
    pub reason: String,
}

pub trait GeocodingProvider: Send + Sync {
    /// Look up a place. `Ok(None)` means the provider found no match.
    fn lookup(&self, name: &str, address: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Deserialize)]
struct Geometry {
    location: Coordinates,
}

pub struct GoogleGeocoder {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl GoogleGeocoder {
    pub fn new(endpoint: &str, api_key: String, timeout: Option<Duration>) -> Result<Self, GeocodeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .build()
            .map_err(|e| GeocodeError::Transient(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }

    fn parse(resp: GeocodeResponse) -> Result<Option<Coordinates>, GeocodeError> {
        match resp.status.as_str() {
            "OK" => Ok(resp.results.into_iter().next().map(|r| r.geometry.location)),
            "ZERO_RESULTS" => Ok(None),
            status => Err(GeocodeError::Api(match resp.error_message {
                Some(message) => format!("{status}: {message}"),
                None => status.to_string(),
            })),
        }
    }
}

impl GeocodingProvider for GoogleGeocoder {
    fn lookup(&self, name: &str, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let query = format!("{name}, {address}");

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("address", query.as_str()), ("key", self.api_key.as_str())])
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| GeocodeError::Transient(e.without_url().to_string()))?;

        let body = resp
            .json::<GeocodeResponse>()
            .map_err(|e| GeocodeError::Transient(e.without_url().to_string()))?;

        Self::parse(body)
    }
}

/// Pause between attempts. Injected so tests do not wait.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

pub struct GeocodeResolver {
    provider: Box<dyn GeocodingProvider>,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl GeocodeResolver {
    pub fn new(provider: Box<dyn GeocodingProvider>, policy: RetryPolicy) -> Self {
        Self::with_sleeper(provider, policy, Box::new(ThreadSleeper))
    }

    pub fn with_sleeper(
        provider: Box<dyn GeocodingProvider>,
        policy: RetryPolicy,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            provider,
            policy,
            sleeper,
        }
    }

    /// Resolve one place, retrying transient failures.
    pub fn resolve(&self, name: &str, address: &str) -> Result<Coordinates, LocationUnavailable> {
        let unavailable = |reason: String| LocationUnavailable {
            name: name.to_string(),
            address: address.to_string(),
            reason,
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.provider.lookup(name, address) {
                Ok(Some(coords)) => return Ok(coords),
                Ok(None) => {
                    log::warn!("no geocoding match for '{name}, {address}'");
                    return Err(unavailable("no results".to_string()));
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    log::warn!("geocoding '{name}' failed (attempt {attempt}/{max_attempts}): {err}");
                    self.sleeper.sleep(self.policy.backoff);
                }
                Err(err) => {
                    log::error!("geocoding '{name}' failed (attempt {attempt}/{max_attempts}): {err}");
                    return Err(unavailable(err.to_string()));
                }
            }
        }
    }

    /// Resolve every candidate, keeping candidate order.
    pub fn resolve_all(
        &self,
        candidates: &[ScoredCandidate],
        parallel: bool,
    ) -> Vec<Result<Coordinates, LocationUnavailable>> {
        if !parallel || candidates.len() < 2 {
            return candidates
                .iter()
                .map(|c| self.resolve(&c.place.name, &c.place.address))
                .collect();
        }

        // one scoped thread per candidate; result count is bounded by max_results
        thread::scope(|s| {
            let handles: Vec<_> = candidates
                .iter()
                .map(|c| s.spawn(move || self.resolve(&c.place.name, &c.place.address)))
                .collect();

            handles
                .into_iter()
                .zip(candidates)
                .map(|(h, c)| {
                    h.join().unwrap_or_else(|_| {
                        Err(LocationUnavailable {
                            name: c.place.name.clone(),
                            address: c.place.address.clone(),
                            reason: "geocoding worker panicked".to_string(),
                        })
                    })
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{candidate, spawn_stub, RecordingSleeper, ScriptedGeocoder};
    use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SEOUL: Coordinates = Coordinates {
        lat: 37.5665,
        lng: 126.978,
    };

    fn resolver(geocoder: ScriptedGeocoder, sleeper: RecordingSleeper) -> GeocodeResolver {
        GeocodeResolver::with_sleeper(Box::new(geocoder), RetryPolicy::default(), Box::new(sleeper))
    }

    #[test]
    fn resolves_on_first_attempt() {
        let geocoder = ScriptedGeocoder::new().with("Cafe", vec![Ok(Some(SEOUL))]);
        let sleeper = RecordingSleeper::default();
        let resolver = resolver(geocoder.clone(), sleeper.clone());

        assert_eq!(resolver.resolve("Cafe", "Jung-gu"), Ok(SEOUL));
        assert_eq!(geocoder.calls("Cafe"), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn retries_transient_failures_with_fixed_backoff() {
        let geocoder = ScriptedGeocoder::new().with(
            "Cafe",
            vec![
                Err(GeocodeError::Transient("timeout".into())),
                Err(GeocodeError::Transient("reset".into())),
                Ok(Some(SEOUL)),
            ],
        );
        let sleeper = RecordingSleeper::default();
        let resolver = resolver(geocoder.clone(), sleeper.clone());

        assert_eq!(resolver.resolve("Cafe", "Jung-gu"), Ok(SEOUL));
        assert_eq!(geocoder.calls("Cafe"), 3);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(2); 2]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let geocoder = ScriptedGeocoder::new().with(
            "Cafe",
            vec![Err(GeocodeError::Transient("down".into())); 5],
        );
        let sleeper = RecordingSleeper::default();
        let resolver = resolver(geocoder.clone(), sleeper.clone());

        let err = resolver.resolve("Cafe", "Jung-gu").unwrap_err();
        assert_eq!(err.name, "Cafe");
        assert!(err.reason.contains("down"));
        assert_eq!(geocoder.calls("Cafe"), 3);
        // no pause after the final attempt
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[test]
    fn zero_results_is_unavailable_without_retry() {
        let geocoder = ScriptedGeocoder::new().with("Nowhere", vec![Ok(None)]);
        let resolver = resolver(geocoder.clone(), RecordingSleeper::default());

        let err = resolver.resolve("Nowhere", "?").unwrap_err();
        assert_eq!(err.reason, "no results");
        assert_eq!(geocoder.calls("Nowhere"), 1);
    }

    #[test]
    fn api_errors_are_not_retried() {
        let geocoder = ScriptedGeocoder::new()
            .with("Cafe", vec![Err(GeocodeError::Api("REQUEST_DENIED".into()))]);
        let resolver = resolver(geocoder.clone(), RecordingSleeper::default());

        assert!(resolver.resolve("Cafe", "Jung-gu").is_err());
        assert_eq!(geocoder.calls("Cafe"), 1);
    }

    #[test]
    fn resolve_all_keeps_candidate_order() {
        let candidates = vec![candidate("a", 0.9), candidate("b", 0.8), candidate("c", 0.7)];

        for parallel in [false, true] {
            // scripts are consumed, so every pass gets its own geocoder
            let geocoder = ScriptedGeocoder::new()
                .with("a", vec![Ok(Some(Coordinates { lat: 1.0, lng: 1.0 }))])
                .with("b", vec![Ok(None)])
                .with("c", vec![Ok(Some(Coordinates { lat: 3.0, lng: 3.0 }))]);
            let resolver = resolver(geocoder.clone(), RecordingSleeper::default());

            let results = resolver.resolve_all(&candidates, parallel);
            assert_eq!(results.len(), 3, "parallel={parallel}");
            assert_eq!(results[0].as_ref().unwrap().lat, 1.0, "parallel={parallel}");
            assert_eq!(results[1].as_ref().unwrap_err().reason, "no results");
            assert_eq!(results[2].as_ref().unwrap().lat, 3.0, "parallel={parallel}");
            for name in ["a", "b", "c"] {
                assert_eq!(geocoder.calls(name), 1, "parallel={parallel}");
            }
        }
    }

    #[test]
    fn google_geocoder_parses_statuses() {
        let router = Router::new().route(
            "/geocode/json",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("key").map(String::as_str), Some("maps-key"));
                let body = match params.get("address").map(String::as_str) {
                    Some("Cafe, 1 Main St") => json!({
                        "status": "OK",
                        "results": [{"geometry": {"location": {"lat": 37.5, "lng": 127.0}}}]
                    }),
                    Some("Nowhere, ?") => json!({"status": "ZERO_RESULTS", "results": []}),
                    _ => json!({"status": "REQUEST_DENIED", "error_message": "bad key"}),
                };
                Json(body)
            }),
        );
        let addr = spawn_stub(router);
        let geocoder = GoogleGeocoder::new(
            &format!("http://{addr}/geocode/json"),
            "maps-key".to_string(),
            None,
        )
        .unwrap();

        assert_eq!(
            geocoder.lookup("Cafe", "1 Main St").unwrap(),
            Some(Coordinates { lat: 37.5, lng: 127.0 })
        );
        assert_eq!(geocoder.lookup("Nowhere", "?").unwrap(), None);
        match geocoder.lookup("Other", "x") {
            Err(GeocodeError::Api(message)) => assert_eq!(message, "REQUEST_DENIED: bad key"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn google_geocoder_http_error_is_transient() {
        let router = Router::new().route(
            "/geocode/json",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let addr = spawn_stub(router);
        let geocoder =
            GoogleGeocoder::new(&format!("http://{addr}/geocode/json"), "k".to_string(), None)
                .unwrap();

        let err = geocoder.lookup("Cafe", "1 Main St").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn google_geocoder_garbled_body_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/geocode/json",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "<html>upstream proxy error</html>"
                }
            }),
        );
        let addr = spawn_stub(router);
        let geocoder =
            GoogleGeocoder::new(&format!("http://{addr}/geocode/json"), "k".to_string(), None)
                .unwrap();

        let err = geocoder.lookup("Cafe", "1 Main St").unwrap_err();
        assert!(err.is_transient());

        let sleeper = RecordingSleeper::default();
        let resolver = GeocodeResolver::with_sleeper(
            Box::new(geocoder),
            RetryPolicy::default(),
            Box::new(sleeper.clone()),
        );
        assert!(resolver.resolve("Cafe", "1 Main St").is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1 + 3);
        assert_eq!(sleeper.sleeps().len(), 2);
    }
}
