// ./api/src/main.rs
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json as JsonResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod config;

// Import application layer components
use application::{
    ApplicationError, AvailabilityResponse, FetchReportResponse, IndexManager, KeyValueStore,
    ListRecordsResponse, RecordRepository, RecordResponse, StatsService,
};
// Domain types used directly in the API
use domain::{RecordFields, RecordId};
// Infrastructure layer implementations
use infrastructure::{
    InMemoryKeyValueStore, RandomSuffixGenerator, SessionIdentity, SimulatedFheEncoder,
    SystemClock,
};

use config::ServerConfig;

#[derive(Clone)]
struct AppState {
    repository: Arc<RecordRepository>,
    stats_service: Arc<StatsService>,
    session: SessionIdentity,
}

#[derive(Deserialize, Debug)]
struct ConnectRequest {
    identity: String,
}

#[derive(Deserialize, Debug)]
struct ListRecordsQuery {
    search: Option<String>,
}

// Application entry point
#[tokio::main]
async fn main() {
    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    let config = ServerConfig::from_env();

    // --- Dependency Injection ---
    // 1. Create infrastructure components
    let store: Arc<dyn KeyValueStore> = if config.conditional_writes {
        info!("Using in-memory store with compare-and-swap index appends.");
        Arc::new(InMemoryKeyValueStore::with_conditional_writes())
    } else {
        info!("Using in-memory store with read-modify-write index appends.");
        Arc::new(InMemoryKeyValueStore::new())
    };
    let session = match &config.writer_identity {
        Some(identity) => {
            info!(identity = %identity, "Writer identity connected from environment.");
            SessionIdentity::connected(identity.clone())
        }
        None => SessionIdentity::new(),
    };

    // 2. Create application services, injecting dependencies
    let index = Arc::new(IndexManager::new(
        store.clone(),
        config.layout.index_key.clone(),
        config.index.clone(),
    ));
    let repository = Arc::new(RecordRepository::new(
        store.clone(),
        index,
        Arc::new(session.clone()),
        Arc::new(SimulatedFheEncoder::new()),
        Arc::new(SystemClock),
        Arc::new(RandomSuffixGenerator),
        config.layout.clone(),
    ));
    let stats_service = Arc::new(StatsService::new(repository.clone(), store));
    info!("Application services initialized.");

    // 3. Create the application state
    let app_state = AppState {
        repository,
        stats_service,
        session,
    };

    // --- API Router Definition ---
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/availability", get(availability_handler))
        .route("/stats", get(get_stats_handler))
        // Writer identity (connect / disconnect)
        .route("/session", post(connect_handler).delete(disconnect_handler))
        // Record Endpoints
        .route(
            "/records",
            post(create_record_handler).get(list_records_handler),
        )
        .route("/records/report", get(records_report_handler))
        .route("/records/:id", get(get_record_handler))
        .route("/records/:id/index", post(retry_index_handler))
        .with_state(app_state);

    info!("API routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server starting on {}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

// --- API Handlers ---

async fn health_check() -> impl IntoResponse {
    info!("Health check endpoint called");
    (StatusCode::OK, "OK")
}

/// Handler for probing the backing store (GET /availability).
async fn availability_handler(State(state): State<AppState>) -> Response {
    let available = state.stats_service.store_available().await;
    let status = if available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, JsonResponse(AvailabilityResponse { available })).into_response()
}

async fn get_stats_handler(State(state): State<AppState>) -> Response {
    info!("Received request to get record statistics");
    match state.stats_service.record_stats().await {
        Ok(stats) => (StatusCode::OK, JsonResponse(stats)).into_response(),
        Err(e) => {
            error!("Failed to get statistics via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

// --- Session Handlers ---

/// Handler for connecting a writer identity (POST /session).
async fn connect_handler(
    State(state): State<AppState>,
    Json(payload): Json<ConnectRequest>,
) -> Response {
    info!("Received request to connect writer identity");
    match state.session.connect(&payload.identity).await {
        Ok(()) => (StatusCode::NO_CONTENT, "").into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for revoking the writer identity (DELETE /session).
async fn disconnect_handler(State(state): State<AppState>) -> Response {
    info!("Received request to disconnect writer identity");
    state.session.disconnect().await;
    (StatusCode::NO_CONTENT, "").into_response()
}

// --- Record Handlers ---

/// Handler for creating a record (POST /records).
async fn create_record_handler(
    State(state): State<AppState>,
    Json(payload): Json<RecordFields>,
) -> Response {
    info!(category = %payload.category, "Received request to create record");
    match state.repository.create(payload).await {
        Ok(record) => {
            info!(record_id = %record.id(), "Record created successfully via handler");
            (StatusCode::CREATED, JsonResponse(RecordResponse::from(&record))).into_response()
        }
        Err(e) => {
            error!("Failed to create record via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for listing records, optionally filtered (GET /records?search=...).
async fn list_records_handler(
    State(state): State<AppState>,
    Query(query): Query<ListRecordsQuery>,
) -> Response {
    let term = query.search.unwrap_or_default();
    info!(search = %term, "Received request to list records");
    match state.repository.fetch_filtered(&term).await {
        Ok(records) => (
            StatusCode::OK,
            JsonResponse(ListRecordsResponse::from_records(&records)),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to list records via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for listing records along with skipped index entries (GET /records/report).
async fn records_report_handler(State(state): State<AppState>) -> Response {
    info!("Received request for record enumeration report");
    match state.repository.fetch_all_with_report().await {
        Ok(report) => {
            if !report.skipped.is_empty() {
                warn!(skipped = report.skipped.len(), "Enumeration skipped indexed records");
            }
            (StatusCode::OK, JsonResponse(FetchReportResponse::from(&report))).into_response()
        }
        Err(e) => {
            error!("Failed to enumerate records via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for fetching a single record (GET /records/:id).
async fn get_record_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    info!(record_id = %id, "Received request to get record");
    let id = match RecordId::parse(&id) {
        Ok(id) => id,
        Err(e) => return map_application_error_to_response(e.into()),
    };
    match state.repository.fetch_one(&id).await {
        Ok(Some(record)) => {
            (StatusCode::OK, JsonResponse(RecordResponse::from(&record))).into_response()
        }
        Ok(None) => map_application_error_to_response(ApplicationError::NotFound(id.into())),
        Err(e) => {
            error!(record_id = %id, "Failed to get record via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for retrying the index step of an orphaned record (POST /records/:id/index).
async fn retry_index_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    info!(record_id = %id, "Received request to retry index append");
    let id = match RecordId::parse(&id) {
        Ok(id) => id,
        Err(e) => return map_application_error_to_response(e.into()),
    };
    match state.repository.retry_index(&id).await {
        Ok(outcome) => (StatusCode::OK, JsonResponse(outcome)).into_response(),
        Err(e) => {
            error!(record_id = %id, "Failed to retry index append via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Helper function to map ApplicationError enum to HTTP status codes and response body.
fn map_application_error_to_response(err: ApplicationError) -> Response {
    error_status_and_body(err).into_response()
}

fn error_status_and_body(err: ApplicationError) -> (StatusCode, String) {
    match err {
        ApplicationError::NotAuthenticated => (
            StatusCode::UNAUTHORIZED,
            "Connect a writer identity first".to_string(),
        ),
        ApplicationError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        ApplicationError::DomainError(domain_err) => {
            warn!("Domain validation failed: {}", domain_err);
            (StatusCode::BAD_REQUEST, domain_err.to_string())
        }
        ApplicationError::NotFound(id) => {
            (StatusCode::NOT_FOUND, format!("Record '{}' not found", id))
        }
        ApplicationError::StoreUnavailable { key, reason } => {
            error!(key = %key, "Store unavailable: {}", reason);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "The record store is unavailable".to_string(),
            )
        }
        ApplicationError::PartialSuccess { record, source } => {
            error!(record_id = %record.id(), "Record stored but not indexed: {}", source);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Record '{id}' was stored but not added to the index; \
                     retry POST /records/{id}/index",
                    id = record.id()
                ),
            )
        }
        ApplicationError::CreationFailed { stage, source } => match *source {
            ApplicationError::StoreUnavailable { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Record not created ({}): the record store is unavailable", stage),
            ),
            other => {
                error!("Record creation failed while {}: {}", stage, other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Record not created ({})", stage),
                )
            }
        },
        // --- Other Errors ---
        other => {
            error!("Unhandled application error: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
    }
}
