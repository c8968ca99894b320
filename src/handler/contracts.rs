use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::contractdb::ContractExt,
    dtos::{
        contractdtos::{RejectMilestoneDto, ReplaceMilestonesDto, SubmitMilestoneDto},
        validation_error, ApiResponse,
    },
    error::HttpError,
    handler::{disputes::create_dispute, reviews::create_review},
    middleware::JWTAuthMiddeware,
    AppState,
};

pub fn contracts_handler() -> Router {
    Router::new()
        .route("/", get(get_my_contracts))
        .route("/:contract_id", get(get_contract))
        .route("/:contract_id/sign", put(sign_contract))
        .route("/:contract_id/cancel", put(cancel_contract))
        .route("/:contract_id/milestones", put(replace_milestones))
        .route(
            "/:contract_id/milestones/:milestone_id/start",
            put(start_milestone),
        )
        .route(
            "/:contract_id/milestones/:milestone_id/submit",
            put(submit_milestone),
        )
        .route(
            "/:contract_id/milestones/:milestone_id/approve",
            put(approve_milestone),
        )
        .route(
            "/:contract_id/milestones/:milestone_id/reject",
            put(reject_milestone),
        )
        .route(
            "/:contract_id/milestones/:milestone_id/fund",
            post(fund_milestone),
        )
        .route("/:contract_id/disputes", post(create_dispute))
        .route("/:contract_id/reviews", post(create_review))
}

pub async fn get_my_contracts(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let contracts = app_state
        .db_client
        .get_user_contracts(user.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success("Contracts retrieved", contracts)))
}

pub async fn get_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let contract = app_state
        .contract_service
        .get_contract(contract_id, &user.user)
        .await?;

    Ok(Json(ApiResponse::success("Contract retrieved", contract)))
}

pub async fn sign_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let contract = app_state
        .contract_service
        .sign_contract(contract_id, user.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Contract signed", contract)))
}

pub async fn cancel_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let contract = app_state
        .contract_service
        .cancel_contract(contract_id, user.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Contract cancelled", contract)))
}

pub async fn replace_milestones(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(contract_id): Path<Uuid>,
    Json(body): Json<ReplaceMilestonesDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;
    let milestones = body.into_milestones().map_err(HttpError::bad_request)?;

    let contract = app_state
        .contract_service
        .replace_milestones(contract_id, user.user.id, milestones)
        .await?;

    Ok(Json(ApiResponse::success(
        "Milestones updated; both parties must sign again",
        contract,
    )))
}

pub async fn start_milestone(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path((contract_id, milestone_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, HttpError> {
    let milestone = app_state
        .contract_service
        .start_milestone(contract_id, milestone_id, user.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Milestone started", milestone)))
}

pub async fn submit_milestone(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path((contract_id, milestone_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<SubmitMilestoneDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let milestone = app_state
        .contract_service
        .submit_milestone(contract_id, milestone_id, user.user.id, body.note)
        .await?;

    Ok(Json(ApiResponse::success(
        "Milestone submitted for review",
        milestone,
    )))
}

pub async fn approve_milestone(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path((contract_id, milestone_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, HttpError> {
    let approval = app_state
        .contract_service
        .approve_milestone(contract_id, milestone_id, user.user.id)
        .await?;

    let message = match (&approval.payment, &approval.release_error) {
        (Some(_), _) => "Milestone approved and paid out",
        (None, Some(_)) => "Milestone approved; payout will be retried",
        (None, None) => "Milestone approved",
    };

    Ok(Json(ApiResponse::success(message, approval)))
}

pub async fn reject_milestone(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path((contract_id, milestone_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<RejectMilestoneDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let milestone = app_state
        .contract_service
        .reject_milestone(contract_id, milestone_id, user.user.id, body.reason)
        .await?;

    Ok(Json(ApiResponse::success(
        "Milestone sent back for changes",
        milestone,
    )))
}

pub async fn fund_milestone(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path((contract_id, milestone_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, HttpError> {
    let funding = app_state
        .contract_service
        .fund_milestone(contract_id, milestone_id, user.user.id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            "Payment initiated; confirm it to place the funds in escrow",
            funding,
        )),
    ))
}
