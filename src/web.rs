use crate::{
    config::Config,
    render::{render_page, SearchForm},
    search::{search_settings, PlaceSearch, SearchError, SearchResponse},
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

pub struct SharedState {
    pub search: Arc<PlaceSearch>,
    pub config: Config,
    pub maps_api_key: String,
}

pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/search", get(search_page))
        .route("/api/search", post(search_api))
        .route("/api/health", get(health))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => log::error!("failed to install signal handler: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

async fn start_app(state: Arc<SharedState>, bind: String) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    log::info!("listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn start_daemon(state: SharedState, bind: String) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(Arc::new(state), bind).await })
}

#[derive(Debug)]
struct HttpError(SearchError);

fn error_status(err: &SearchError) -> StatusCode {
    match err {
        SearchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SearchError::EmbeddingUnavailable(_) => StatusCode::BAD_GATEWAY,
        SearchError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Tell axum how to convert `SearchError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = error_status(&self.0);
        if status.is_server_error() {
            log::error!("{self:?}");
        }
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<SearchError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPageParams {
    pub q: Option<String>,
    pub min_similarity: Option<f32>,
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub min_similarity: Option<f32>,
    pub max_results: Option<usize>,
}

fn form_for(config: &Config, params: &SearchPageParams) -> SearchForm {
    SearchForm {
        query: params.q.clone().unwrap_or_default(),
        min_similarity: params
            .min_similarity
            .unwrap_or(config.search.min_similarity),
        max_results: params.max_results.unwrap_or(config.search.max_results),
        max_results_limit: config.search.max_results_limit,
    }
}

async fn index(State(state): State<Arc<SharedState>>) -> Html<String> {
    let form = form_for(&state.config, &SearchPageParams::default());
    Html(render_page(&form, None, None, &state.maps_api_key))
}

async fn search_page(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<SearchPageParams>,
) -> impl IntoResponse {
    log::debug!("params: {params:?}");

    let form = form_for(&state.config, &params);
    let query = form.query.trim().to_string();
    if query.is_empty() {
        return (
            StatusCode::OK,
            Html(render_page(&form, None, None, &state.maps_api_key)),
        );
    }

    let result = search_settings(&state.config.search, params.min_similarity, params.max_results)
        .and_then(|config| {
            let search = state.search.clone();
            tokio::task::block_in_place(move || search.search(&query, &config))
        });

    match result {
        Ok(response) => (
            StatusCode::OK,
            Html(render_page(&form, Some(&response), None, &state.maps_api_key)),
        ),
        Err(err) => {
            let status = error_status(&err);
            if status.is_server_error() {
                log::error!("search failed: {err}");
            }
            let notice = match status {
                StatusCode::BAD_REQUEST => "Please check the search settings.",
                StatusCode::BAD_GATEWAY => {
                    "The embedding service is unavailable right now. Please try again later."
                }
                _ => "The search service is misconfigured. Please contact the operator.",
            };
            (
                status,
                Html(render_page(&form, None, Some(notice), &state.maps_api_key)),
            )
        }
    }
}

async fn search_api(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let config = search_settings(&state.config.search, payload.min_similarity, payload.max_results)?;
    let search = state.search.clone();

    tokio::task::block_in_place(move || {
        search
            .search(&payload.query, &config)
            .map(Json)
            .map_err(Into::into)
    })
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthResponse {
    pub places: usize,
    pub dimensions: usize,
    pub embedding: String,
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<HealthResponse> {
    let ranker = state.search.ranker();
    Json(HealthResponse {
        places: ranker.catalog().len(),
        dimensions: ranker.catalog().dimensions(),
        embedding: ranker.embedder().name().to_string(),
    })
}
