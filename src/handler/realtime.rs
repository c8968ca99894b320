use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Extension, Router,
};
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::{
    db::chatdb::ChatExt,
    dtos::chatdtos::SocketQuery,
    error::{ErrorMessage, HttpError},
    middleware::main_middleware::{authenticate, bearer_token},
    service::realtime::{ClientEvent, ConnectionId, ServerEvent},
    AppState,
};

/// Browsers cannot set headers on a socket upgrade, so the token may also
/// come as `?token=`.
pub fn socket_handler() -> Router {
    Router::new().route("/", get(socket_upgrade))
}

pub async fn socket_upgrade(
    ws: WebSocketUpgrade,
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    let token = bearer_token(&headers)
        .or(query.token)
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::TokenNotProvided.to_string()))?;

    let user = authenticate(&app_state, &token).await?;
    let user_id = user.id;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id)))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    let (connection_id, mut events) = app_state.realtime.connect(user_id).await;
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to encode socket event: {}", e);
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = app_state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                WsMessage::Text(text) => {
                    let outcome = match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => {
                            handle_client_event(&recv_state, connection_id, user_id, event).await
                        }
                        Err(_) => Err("Unrecognised event".to_string()),
                    };
                    if let Err(message) = outcome {
                        recv_state
                            .realtime
                            .send_to_connection(connection_id, ServerEvent::Error { message })
                            .await;
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    app_state.realtime.disconnect(connection_id).await;
}

async fn ensure_participant(
    app_state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<(), String> {
    let conversation = app_state
        .db_client
        .get_conversation(conversation_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load conversation {}: {}", conversation_id, e);
            "Conversation unavailable".to_string()
        })?;

    match conversation {
        Some(c) if c.has_participant(user_id) => Ok(()),
        _ => Err("You are not part of this conversation".to_string()),
    }
}

async fn handle_client_event(
    app_state: &AppState,
    connection_id: ConnectionId,
    user_id: Uuid,
    event: ClientEvent,
) -> Result<(), String> {
    match event {
        ClientEvent::JoinConversation { conversation_id } => {
            ensure_participant(app_state, conversation_id, user_id).await?;
            app_state
                .realtime
                .join_conversation(connection_id, conversation_id)
                .await;
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            app_state
                .realtime
                .leave_conversation(connection_id, conversation_id)
                .await;
        }
        ClientEvent::TypingStart { conversation_id } | ClientEvent::TypingStop { conversation_id } => {
            if !app_state
                .realtime
                .in_conversation(connection_id, conversation_id)
                .await
            {
                return Err("Join the conversation first".to_string());
            }
            let is_typing = matches!(event, ClientEvent::TypingStart { .. });
            app_state
                .realtime
                .emit_to_conversation(
                    conversation_id,
                    ServerEvent::Typing {
                        conversation_id,
                        user_id,
                        is_typing,
                    },
                    Some(connection_id),
                )
                .await;
        }
        ClientEvent::MarkRead { conversation_id } => {
            ensure_participant(app_state, conversation_id, user_id).await?;
            let count = app_state
                .db_client
                .mark_messages_as_read(conversation_id, user_id)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to mark messages read: {}", e);
                    "Could not mark messages as read".to_string()
                })?;
            if count > 0 {
                app_state
                    .realtime
                    .emit_to_conversation(
                        conversation_id,
                        ServerEvent::MessagesRead {
                            conversation_id,
                            reader_id: user_id,
                            count,
                        },
                        None,
                    )
                    .await;
            }
        }
    }
    Ok(())
}
