use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use application::HistoryQuery;
use domain::{
    ConversationSummary, DeleteMessagePayload, DirectMessage, Message, MessageId, RoomId, UserId,
};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/messages", get(get_room_history))
        .route("/direct/{peer_id}", get(open_conversation))
        .route("/conversations", get(list_conversations))
        .route("/messages/{message_id}", delete(delete_message))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn get_room_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;

    let messages = state
        .history
        .room_history(RoomId::from(room_id), query)
        .await?;
    Ok(Json(messages))
}

async fn open_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DirectMessage>>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;

    let messages = state
        .history
        .open_conversation(user_id, UserId::from(peer_id), query)
        .await?;
    Ok(Json(messages))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;

    let conversations = state.history.conversations(user_id).await?;
    Ok(Json(conversations))
}

/// 作者软删除消息，房间内的连接会收到墓碑消息
async fn delete_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Message>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;

    let message = state
        .chat
        .delete(DeleteMessagePayload {
            message_id: MessageId::from(message_id),
            user_id,
        })
        .await?;
    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

/// 握手阶段校验 token，通过后连接绑定 token 中的用户身份
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = state.jwt_service.verify_token(&query.token)?;

    Ok(ws.on_upgrade(move |socket| async move {
        match WebSocketConnection::accept(state, user_id).await {
            Ok(connection) => connection.run(socket).await,
            Err(err) => {
                tracing::error!(user_id = %user_id, error = ?err, "WebSocket 连接注册失败");
            }
        }
    }))
}
