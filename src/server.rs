//! HTTP 계층: 웹소켓 구독 엔드포인트와 컬렉션 REST API

use crate::cdc_engine::CdcEngine;
use crate::collections::Document;
use crate::error::CdcError;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

/// 라우터 공유 상태
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CdcEngine>,
    /// `POST /insert` 데모가 쓰는 테이블
    pub seed_table: Option<String>,
}

impl AppState {
    pub fn new(engine: Arc<CdcEngine>, seed_table: Option<String>) -> Self {
        AppState { engine, seed_table }
    }
}

impl IntoResponse for CdcError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            CdcError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            CdcError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            CdcError::InvalidIdentifier(_) => (StatusCode::BAD_REQUEST, "INVALID_IDENTIFIER"),
            CdcError::SerializationError(_) => (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR"),
            CdcError::TriggerInstallError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "TRIGGER_INSTALL_ERROR")
            }
            CdcError::QueryError(_) | CdcError::SchemaError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, CdcError>;

/// 라우터 생성
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_subscribe))
        .route("/collections", post(create_collection))
        .route("/insert", post(insert_dummy))
        .route("/:collection", get(list_rows).post(insert_row))
        .route(
            "/:collection/:id",
            get(get_row).patch(update_row).delete(delete_row),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "state": state.engine.get_state(),
        "subscribers": state.engine.registry().len(),
    }))
}

async fn ws_subscribe(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    addr: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let peer = addr
        .map(|ConnectInfo(a)| a.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let engine = state.engine.clone();
    ws.on_upgrade(move |socket| async move { engine.handle_socket(socket, peer).await })
}

#[derive(Debug, Deserialize)]
struct CreateCollectionRequest {
    name: String,
    #[serde(default)]
    columns: Option<Vec<String>>,
}

async fn create_collection(
    State(state): State<AppState>,
    Json(req): Json<CreateCollectionRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let columns = req.columns.unwrap_or_else(|| {
        crate::collections::DEFAULT_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .collect()
    });
    state.engine.create_collection(&req.name, &columns)?;
    Ok((StatusCode::CREATED, Json(json!({ "name": req.name }))))
}

async fn insert_dummy(State(state): State<AppState>) -> ApiResult<&'static str> {
    let table = state
        .seed_table
        .as_deref()
        .ok_or_else(|| CdcError::NotFound("no seed table configured".to_string()))?;

    let mut row = Document::new();
    row.insert("name".to_string(), json!("John Doe"));
    state.engine.collections().insert(table, &row)?;
    Ok("Inserted dummy data")
}

async fn list_rows(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(filter): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    Ok(Json(state.engine.collections().list(&collection, &filter)?))
}

async fn get_row(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, i64)>,
) -> ApiResult<Json<Document>> {
    Ok(Json(state.engine.collections().get(&collection, id)?))
}

async fn insert_row(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(row): Json<Document>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = state.engine.collections().insert(&collection, &row)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn update_row(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, i64)>,
    Json(fields): Json<Document>,
) -> ApiResult<Json<Document>> {
    let collections = state.engine.collections();
    collections.update(&collection, id, &fields)?;
    Ok(Json(collections.get(&collection, id)?))
}

async fn delete_row(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    state.engine.collections().delete(&collection, id)?;
    Ok(Json(json!({ "id": id })))
}
