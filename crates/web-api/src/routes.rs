use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use application::PermissionUpdate;
use domain::{AlertEvent, PermissionSnapshot, RegistryStats, StoreId, TabId};

use crate::{error::ApiError, state::AppState, ws_connection::AlertStreamConnection};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .route("/internal/events", post(ingest_event))
        .route("/internal/permissions", post(push_permission_update))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: RegistryStats,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.registry.stats().await,
    })
}

/// 分析管线的事件注入载荷
#[derive(Debug, Deserialize)]
struct IngestPayload {
    store_id: Uuid,
    event: AlertEvent,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    store_id: Uuid,
    sequence: u64,
}

async fn ingest_event(
    State(state): State<AppState>,
    Json(payload): Json<IngestPayload>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let store_id = StoreId::new(payload.store_id);
    let sequenced = state.dispatcher.publish(store_id, payload.event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            store_id: payload.store_id,
            sequence: sequenced.sequence,
        }),
    ))
}

async fn push_permission_update(
    State(state): State<AppState>,
    Json(update): Json<PermissionUpdate>,
) -> Result<StatusCode, ApiError> {
    // 目录整体替换在前，反应器按版本门控决定是否撤销
    let snapshot = PermissionSnapshot::new(
        update.version,
        update.permissions.clone(),
        update.security_roles.clone(),
    );
    state
        .authorization
        .load_snapshot(update.identity_id, snapshot)
        .await;
    state.reactor.apply(update).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
    tab_id: Option<String>,
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // 握手失败直接拒绝升级，不建立降级连接
    let claims = state.jwt_service.verify_token(&query.token)?;
    let identity = claims.identity_context();
    let tab_id = TabId::parse(query.tab_id.as_deref().unwrap_or("primary"))
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    Ok(ws.on_upgrade(move |socket| {
        AlertStreamConnection::new(state, identity, tab_id).run(socket)
    }))
}
