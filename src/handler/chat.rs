use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{chatdb::ChatExt, projectdb::ProjectExt, userdb::UserExt},
    dtos::{
        chatdtos::{CreateConversationDto, MessageQueryDto, SendMessageDto},
        userdtos::FilterUserDto,
        validation_error, ApiResponse,
    },
    error::HttpError,
    middleware::JWTAuthMiddeware,
    models::chatmodels::Conversation,
    service::realtime::ServerEvent,
    utils::sanitize::plain_text,
    AppState,
};

/// Mounted at `/conversations`.
pub fn chat_handler() -> Router {
    Router::new()
        .route("/", get(get_conversations).post(create_conversation))
        .route("/unread-count", get(get_unread_count))
        .route("/:conversation_id", get(get_conversation))
        .route(
            "/:conversation_id/messages",
            get(get_messages).post(send_message),
        )
        .route("/:conversation_id/read", put(mark_as_read))
}

#[derive(Debug, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub other_user: Option<FilterUserDto>,
    pub other_user_online: bool,
}

async fn conversation_view(
    app_state: &AppState,
    conversation: Conversation,
    user_id: Uuid,
) -> Result<ConversationView, HttpError> {
    let other_id = conversation.other_participant(user_id);
    let other_user = app_state
        .db_client
        .get_user(Some(other_id), None)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .map(|u| FilterUserDto::filter_user(&u));

    Ok(ConversationView {
        conversation,
        other_user,
        other_user_online: app_state.realtime.is_online(other_id).await,
    })
}

/// Loads a conversation the caller takes part in.
async fn load_conversation(
    app_state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Conversation, HttpError> {
    let conversation = app_state
        .db_client
        .get_conversation(conversation_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Conversation not found"))?;

    if !conversation.has_participant(user_id) {
        return Err(HttpError::forbidden("You are not part of this conversation"));
    }
    Ok(conversation)
}

pub async fn create_conversation(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<CreateConversationDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    if body.participant_id == auth.user.id {
        return Err(HttpError::bad_request(
            "You cannot start a conversation with yourself",
        ));
    }

    app_state
        .db_client
        .get_user(Some(body.participant_id), None)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .filter(|u| u.is_active)
        .ok_or_else(|| HttpError::not_found("User not found"))?;

    if let Some(project_id) = body.project_id {
        app_state
            .db_client
            .get_project(project_id)
            .await
            .map_err(|e| HttpError::server_error(e.to_string()))?
            .ok_or_else(|| HttpError::not_found("Project not found"))?;
    }

    let conversation = app_state
        .db_client
        .create_or_get_conversation(auth.user.id, body.participant_id, body.project_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let view = conversation_view(&app_state, conversation, auth.user.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Conversation ready", view)),
    ))
}

pub async fn get_conversations(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Query(query): Query<MessageQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate().map_err(validation_error)?;

    let conversations = app_state
        .db_client
        .get_user_conversations(auth.user.id, query.limit(), query.offset())
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let mut views = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        views.push(conversation_view(&app_state, conversation, auth.user.id).await?);
    }

    Ok(Json(ApiResponse::success("Conversations retrieved", views)))
}

pub async fn get_conversation(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let conversation = load_conversation(&app_state, conversation_id, auth.user.id).await?;
    let view = conversation_view(&app_state, conversation, auth.user.id).await?;

    Ok(Json(ApiResponse::success("Conversation retrieved", view)))
}

pub async fn get_messages(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate().map_err(validation_error)?;
    load_conversation(&app_state, conversation_id, auth.user.id).await?;

    let messages = app_state
        .db_client
        .get_conversation_messages(conversation_id, query.limit(), query.offset())
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success("Messages retrieved", messages)))
}

pub async fn send_message(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;
    let conversation = load_conversation(&app_state, conversation_id, auth.user.id).await?;

    let content = plain_text(&body.content);
    if content.is_empty() {
        return Err(HttpError::bad_request("Message cannot be empty"));
    }

    let message = app_state
        .db_client
        .send_message(conversation_id, auth.user.id, content)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let recipient = conversation.other_participant(auth.user.id);
    app_state
        .realtime
        .emit_to_conversation_and_user(
            conversation_id,
            recipient,
            ServerEvent::NewMessage(message.clone()),
        )
        .await;

    if !app_state.realtime.is_online(recipient).await {
        app_state
            .notification_service
            .notify_quietly(
                recipient,
                "new_message",
                "New message",
                format!("{} sent you a message", auth.user.name),
                Some(serde_json::json!({ "conversation_id": conversation_id })),
            )
            .await;
    }

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Message sent", message)),
    ))
}

pub async fn mark_as_read(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    load_conversation(&app_state, conversation_id, auth.user.id).await?;

    let count = app_state
        .db_client
        .mark_messages_as_read(conversation_id, auth.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    if count > 0 {
        app_state
            .realtime
            .emit_to_conversation(
                conversation_id,
                ServerEvent::MessagesRead {
                    conversation_id,
                    reader_id: auth.user.id,
                    count,
                },
                None,
            )
            .await;
    }

    Ok(Json(ApiResponse::success(
        "Messages marked as read",
        serde_json::json!({ "marked": count }),
    )))
}

pub async fn get_unread_count(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let count = app_state
        .db_client
        .get_unread_message_count(auth.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success(
        "Unread count retrieved",
        serde_json::json!({ "unread_count": count }),
    )))
}
