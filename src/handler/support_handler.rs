use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{supportdb::SupportExt, userdb::UserExt},
    dtos::{
        supportdtos::{
            AssignTicketDto, CreateTicketDto, TicketMessageDto, TicketQueryDto,
            UpdateTicketStatusDto,
        },
        validation_error, ApiResponse, PaginatedResponse, DEFAULT_PAGE_SIZE,
    },
    error::HttpError,
    middleware::{role_check, JWTAuthMiddeware},
    models::{
        supportmodel::SupportTicket,
        usermodel::{User, UserRole},
    },
    utils::sanitize::plain_text,
    AppState,
};

pub fn support_handler() -> Router {
    Router::new()
        .route(
            "/tickets",
            post(create_ticket).merge(get(get_tickets).layer(middleware::from_fn(
                |req, next| role_check(req, next, vec![UserRole::Admin]),
            ))),
        )
        .route("/tickets/mine", get(get_my_tickets))
        .route("/tickets/:ticket_id", get(get_ticket))
        .route(
            "/tickets/:ticket_id/messages",
            get(get_ticket_messages).post(add_message),
        )
        .route(
            "/tickets/:ticket_id/status",
            put(update_ticket_status).layer(middleware::from_fn(|req, next| {
                role_check(req, next, vec![UserRole::Admin])
            })),
        )
        .route(
            "/tickets/:ticket_id/assign",
            put(assign_ticket).layer(middleware::from_fn(|req, next| {
                role_check(req, next, vec![UserRole::Admin])
            })),
        )
}

/// Ticket visible to its owner or any admin.
async fn load_ticket(
    app_state: &AppState,
    ticket_id: Uuid,
    user: &User,
) -> Result<SupportTicket, HttpError> {
    let ticket = app_state
        .db_client
        .get_support_ticket(ticket_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Ticket not found"))?;

    if ticket.user_id != user.id && !user.is_admin() {
        return Err(HttpError::forbidden("Access denied"));
    }
    Ok(ticket)
}

pub async fn create_ticket(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<CreateTicketDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let ticket = app_state
        .db_client
        .create_support_ticket(
            auth.user.id,
            body.title.trim().to_string(),
            plain_text(&body.description),
            body.category,
            body.priority.unwrap_or_else(|| body.category.default_priority()),
        )
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    tracing::info!("Support ticket {} opened by {}", ticket.id, auth.user.id);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Support ticket created", ticket)),
    ))
}

pub async fn get_tickets(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<TicketQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate().map_err(validation_error)?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = ((page - 1) * limit) as i64;

    let tickets = app_state
        .db_client
        .get_support_tickets(limit as i64, offset, query.status)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;
    let total = app_state
        .db_client
        .count_support_tickets(query.status)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(PaginatedResponse::new(
        tickets,
        total,
        page as u32,
        limit as u32,
    )))
}

pub async fn get_my_tickets(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let tickets = app_state
        .db_client
        .get_user_support_tickets(auth.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success("Tickets retrieved", tickets)))
}

pub async fn get_ticket(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(ticket_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    load_ticket(&app_state, ticket_id, &auth.user).await?;

    let ticket = app_state
        .db_client
        .get_support_ticket_with_messages(ticket_id, auth.user.is_admin())
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Ticket not found"))?;

    Ok(Json(ApiResponse::success("Ticket retrieved", ticket)))
}

pub async fn get_ticket_messages(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(ticket_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    load_ticket(&app_state, ticket_id, &auth.user).await?;

    let messages = app_state
        .db_client
        .get_ticket_messages(ticket_id, auth.user.is_admin())
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success("Messages retrieved", messages)))
}

pub async fn add_message(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(ticket_id): Path<Uuid>,
    Json(body): Json<TicketMessageDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;
    let ticket = load_ticket(&app_state, ticket_id, &auth.user).await?;
    if !auth.user.is_admin() && !ticket.status.accepts_user_replies() {
        return Err(HttpError::conflict(
            "This ticket is closed; please open a new one",
        ));
    }

    let is_internal = body.is_internal && auth.user.is_admin();
    let message = app_state
        .db_client
        .add_ticket_message(ticket_id, auth.user.id, plain_text(&body.message), is_internal)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    if !is_internal && ticket.user_id != auth.user.id {
        app_state
            .notification_service
            .notify_ticket_update(
                ticket.user_id,
                ticket.id,
                format!("Support replied on \"{}\"", ticket.title),
            )
            .await;
    }

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Message added", message)),
    ))
}

pub async fn update_ticket_status(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(ticket_id): Path<Uuid>,
    Json(body): Json<UpdateTicketStatusDto>,
) -> Result<impl IntoResponse, HttpError> {
    let ticket = app_state
        .db_client
        .update_ticket_status(ticket_id, body.status)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => HttpError::not_found("Ticket not found"),
            other => HttpError::server_error(other.to_string()),
        })?;

    app_state
        .notification_service
        .notify_ticket_update(
            ticket.user_id,
            ticket.id,
            format!("Your ticket \"{}\" is now {}", ticket.title, ticket.status.label()),
        )
        .await;

    Ok(Json(ApiResponse::success("Ticket status updated", ticket)))
}

pub async fn assign_ticket(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(ticket_id): Path<Uuid>,
    Json(body): Json<AssignTicketDto>,
) -> Result<impl IntoResponse, HttpError> {
    let assignee = app_state
        .db_client
        .get_user(Some(body.assigned_to), None)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Assignee not found"))?;

    if !assignee.is_admin() {
        return Err(HttpError::bad_request("Tickets can only be assigned to admins"));
    }

    let ticket = app_state
        .db_client
        .assign_ticket(ticket_id, assignee.id)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => HttpError::not_found("Ticket not found"),
            other => HttpError::server_error(other.to_string()),
        })?;

    Ok(Json(ApiResponse::success("Ticket assigned", ticket)))
}
