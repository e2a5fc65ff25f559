//! HTTP surface for hosted feeds.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use restfeed_types::{FeedEntry, FeedKind, Operation};

use crate::{
    page::build_page,
    resolver::OffsetResolver,
    store::{AppendRequest, EntryFilter, FeedStore, StoreError},
};

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Port to listen on (0 for auto-assign)
    pub port: u16,
    /// Host to bind to
    pub host: String,
    /// Long-poll timeout in milliseconds
    pub long_poll_timeout_ms: u64,
    /// Maximum items per page. Server-chosen; clients cannot raise it.
    pub page_limit: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 8844,
            host: "127.0.0.1".to_string(),
            long_poll_timeout_ms: 30_000,
            page_limit: 100,
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FeedStore>,
    pub resolver: OffsetResolver,
    pub options: ServerOptions,
}

impl AppState {
    pub fn new(store: Arc<FeedStore>, options: ServerOptions) -> Self {
        let resolver = OffsetResolver::new(Arc::clone(&store), options.page_limit);
        Self {
            store,
            resolver,
            options,
        }
    }
}

/// JSON body of an append request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendBody {
    #[serde(rename = "type")]
    entry_type: String,
    id: String,
    #[serde(default)]
    operation: Operation,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    data: Option<JsonValue>,
}

/// Create the router with all feed endpoints.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        // Feed operations on wildcard paths
        .route("/{*path}", put(handle_create))
        .route("/{*path}", get(handle_read))
        .route("/{*path}", post(handle_append))
        .route("/{*path}", delete(handle_delete))
        .layer(cors)
        .with_state(state)
}

/// PUT - Create a feed
async fn handle_create(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = format!("/{}", path);
    debug!(path = %path, "Creating feed");

    let kind = match parse_kind_header(&headers) {
        Ok(kind) => kind,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    match state.store.create(&path, kind) {
        Ok(created) => Response::builder()
            .status(if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            })
            .header("Feed-Kind", kind.to_string())
            .header(header::LOCATION, &path)
            .body(Body::empty())
            .unwrap()
            .into_response(),
        Err(err) => store_error_response(&err),
    }
}

/// GET - Read a page from a feed (immediate or long-poll)
async fn handle_read(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = format!("/{}", path);

    if !accepts_json(&headers) {
        return (
            StatusCode::NOT_ACCEPTABLE,
            "Only application/json is served",
        )
            .into_response();
    }

    // A syntactically valid offset is never rejected, even when it points at
    // a compacted position; resolution skips the gap.
    let offset = match params.get("offset") {
        Some(raw) => match raw.parse::<i64>() {
            Ok(offset) => Some(offset),
            Err(_) => {
                return store_error_response(&StoreError::InvalidOffset(raw.clone()));
            }
        },
        None => None,
    };

    let filter = match compile_filter(&params) {
        Ok(filter) => filter,
        Err(err) => return store_error_response(&err),
    };

    if !state.store.has(&path) {
        return store_error_response(&StoreError::NotFound(path));
    }

    let long_poll = params.get("live").map(String::as_str) == Some("long-poll");
    let result = if long_poll {
        let wait = Duration::from_millis(state.options.long_poll_timeout_ms);
        state
            .resolver
            .query_or_wait(&path, offset, filter.as_ref(), wait)
            .await
    } else {
        state.resolver.query(&path, offset, filter.as_ref())
    };

    let entries = match result {
        Ok(entries) => entries,
        Err(err) => return store_error_response(&err),
    };

    let page = build_page(&path, offset, entries);
    let etag = generate_etag(&path, offset, page.last_position());

    let mut response = Json(page).into_response();
    // Filtered responses vary by predicate and are not cacheable.
    if filter.is_none() {
        if let Ok(value) = etag.parse() {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    response
}

/// POST - Append an entry to a feed
async fn handle_append(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(body): Json<AppendBody>,
) -> impl IntoResponse {
    let path = format!("/{}", path);

    let request = AppendRequest {
        entry_type: body.entry_type,
        id: body.id,
        operation: body.operation,
        idempotency_key: body.idempotency_key,
        data: body.data,
    };

    match state.store.append(&path, request) {
        Ok(entry) => {
            let position = entry.position;
            let mut response = Json(entry.as_ref().clone()).into_response();
            if let Ok(value) = position.to_string().parse() {
                response.headers_mut().insert("Feed-Position", value);
            }
            response
        }
        Err(err) => store_error_response(&err),
    }
}

/// DELETE - Delete a feed
async fn handle_delete(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    let path = format!("/{}", path);

    if state.store.delete(&path) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

fn store_error_response(err: &StoreError) -> Response {
    let status = match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::KindMismatch { .. } => StatusCode::CONFLICT,
        StoreError::EmptyType
        | StoreError::EmptyId
        | StoreError::TombstonePayload
        | StoreError::InvalidOffset(_)
        | StoreError::InvalidFilter(_)
        | StoreError::WrongFeedKind(_) => StatusCode::BAD_REQUEST,
        StoreError::Exhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %err, "Feed operation failed");
    }

    (status, err.to_string()).into_response()
}

/// Whether the Accept header admits the mandatory JSON representation.
fn accepts_json(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    if accept.trim().is_empty() {
        return true;
    }

    accept.split(',').any(|part| {
        let mime = part.split(';').next().unwrap_or("").trim();
        matches!(mime, "application/json" | "application/*" | "*/*")
    })
}

enum FilterField {
    Type,
    Id,
    Operation,
}

/// Compile `filter[field]=value` parameters into an entry predicate.
///
/// Exact match on `type`, `id` and `operation`; anything richer replaces
/// this compiler behind the same [`EntryFilter`] type. Filters are applied
/// during resolution, before pagination.
fn compile_filter(params: &HashMap<String, String>) -> Result<Option<EntryFilter>, StoreError> {
    let mut checks: Vec<(FilterField, String)> = Vec::new();

    for (key, value) in params {
        let Some(field) = key
            .strip_prefix("filter[")
            .and_then(|rest| rest.strip_suffix(']'))
        else {
            continue;
        };

        let field = match field {
            "type" => FilterField::Type,
            "id" => FilterField::Id,
            "operation" => FilterField::Operation,
            other => return Err(StoreError::InvalidFilter(other.to_string())),
        };
        checks.push((field, value.clone()));
    }

    if checks.is_empty() {
        return Ok(None);
    }

    Ok(Some(Arc::new(move |entry: &FeedEntry| {
        checks.iter().all(|(field, value)| match field {
            FilterField::Type => entry.meta.entry_type == *value,
            FilterField::Id => entry.meta.id == *value,
            FilterField::Operation => entry.meta.operation.to_string() == *value,
        })
    })))
}

/// Parse the Feed-Kind header; data feeds are the default.
fn parse_kind_header(headers: &HeaderMap) -> Result<FeedKind, String> {
    match headers.get("Feed-Kind").and_then(|v| v.to_str().ok()) {
        Some(raw) => raw.parse::<FeedKind>().map_err(|err| err.to_string()),
        None => Ok(FeedKind::Data),
    }
}

/// Generate an ETag for a read response.
fn generate_etag(path: &str, offset: Option<i64>, last_position: Option<i64>) -> String {
    use base64::Engine;
    let path_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(path);
    let start = offset.map_or_else(|| "-".to_string(), |o| o.to_string());
    let end = last_position.map_or_else(|| start.clone(), |p| p.to_string());
    format!("\"{}:{}:{}\"", path_b64, start, end)
}

/// Start the server.
pub async fn start_server(options: ServerOptions) -> std::io::Result<()> {
    let store = FeedStore::new();
    let state = AppState::new(store, options.clone());

    let router = create_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting feed server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
