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
    db::{
        cache::{
            project_key, project_list_key, CacheHelper, PROJECT_CACHE_TTL, PROJECT_LIST_PATTERN,
            PROJECT_LIST_TTL,
        },
        projectdb::{NewProject, ProjectChanges, ProjectExt, ProjectFilter},
    },
    dtos::{
        projectdtos::{CreateProjectDto, CreateProposalDto, ProjectQueryDto, UpdateProjectDto},
        validation_error, ApiResponse, PaginatedResponse, DEFAULT_PAGE_SIZE,
    },
    error::HttpError,
    middleware::{role_check, JWTAuthMiddeware},
    models::{
        projectmodel::{Project, ProjectStatus},
        usermodel::UserRole,
    },
    utils::currency::{is_valid_currency_code, money_from_f64},
    AppState,
};

pub fn projects_handler() -> Router {
    Router::new()
        .route(
            "/",
            get(get_projects).merge(post(create_project).layer(middleware::from_fn(
                |req, next| role_check(req, next, vec![UserRole::Client]),
            ))),
        )
        .route("/mine", get(get_my_projects))
        .route(
            "/:project_id",
            get(get_project).put(update_project).delete(cancel_project),
        )
        .route(
            "/:project_id/proposals",
            get(get_project_proposals).post(submit_proposal),
        )
}

pub fn proposals_handler() -> Router {
    Router::new()
        .route("/mine", get(get_my_proposals))
        .route("/:proposal_id/accept", post(accept_proposal))
        .route("/:proposal_id/reject", put(reject_proposal))
        .route("/:proposal_id/withdraw", put(withdraw_proposal))
}

async fn invalidate_project_cache(app_state: &AppState, project_id: Uuid) {
    let redis = app_state.db_client.redis_client.as_ref();
    CacheHelper::invalidate(redis, &[project_key(project_id)]).await;
    CacheHelper::invalidate_pattern(redis, PROJECT_LIST_PATTERN).await;
}

async fn load_owned_project(
    app_state: &AppState,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<Project, HttpError> {
    let project = app_state
        .db_client
        .get_project(project_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Project not found"))?;

    if project.client_id != user_id {
        return Err(HttpError::forbidden("You do not own this project"));
    }
    Ok(project)
}

pub async fn create_project(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Json(body): Json<CreateProjectDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;
    body.validate_budget().map_err(HttpError::bad_request)?;

    let currency = body
        .currency
        .clone()
        .unwrap_or_else(|| app_state.env.default_currency.clone())
        .to_lowercase();
    if !is_valid_currency_code(&currency) {
        return Err(HttpError::bad_request("Currency must be a 3-letter ISO code"));
    }

    let new_project = NewProject {
        client_id: user.user.id,
        title: body.title.trim().to_string(),
        description: body.description,
        category: body.category.trim().to_lowercase(),
        skills: body.skills,
        budget_min: money_from_f64(body.budget_min).map_err(HttpError::bad_request)?,
        budget_max: money_from_f64(body.budget_max).map_err(HttpError::bad_request)?,
        currency,
        deadline: body.deadline,
    };

    let project = app_state
        .db_client
        .create_project(new_project)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    CacheHelper::invalidate_pattern(
        app_state.db_client.redis_client.as_ref(),
        PROJECT_LIST_PATTERN,
    )
    .await;
    tracing::info!("Project {} posted by {}", project.id, user.user.id);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Project created", project)),
    ))
}

pub async fn get_projects(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<ProjectQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate().map_err(validation_error)?;

    let redis = app_state.db_client.redis_client.as_ref();
    let key = project_list_key(&query.cache_fragment());
    if let Some(cached) = CacheHelper::get_optional::<PaginatedResponse<Project>>(redis, &key).await {
        return Ok(Json(cached));
    }

    let page = query.page.unwrap_or(1).max(1) as u32;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let filter = ProjectFilter {
        // the public board shows open work unless asked otherwise
        status: Some(query.status.unwrap_or(ProjectStatus::Open)),
        category: query.category.map(|c| c.trim().to_lowercase()),
        search: query.search.filter(|s| !s.trim().is_empty()),
    };

    let projects = app_state
        .db_client
        .get_projects(&filter, page, limit)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;
    let total = app_state
        .db_client
        .count_projects(&filter)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let response = PaginatedResponse::new(projects, total, page, limit as u32);
    CacheHelper::set_optional(redis, &key, &response, PROJECT_LIST_TTL).await;

    Ok(Json(response))
}

pub async fn get_my_projects(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let projects = app_state
        .db_client
        .get_client_projects(user.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success("Projects retrieved", projects)))
}

pub async fn get_project(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let redis = app_state.db_client.redis_client.as_ref();
    let key = project_key(project_id);

    if let Some(cached) = CacheHelper::get_optional::<Project>(redis, &key).await {
        return Ok(Json(ApiResponse::success("Project retrieved", cached)));
    }

    let project = app_state
        .db_client
        .get_project(project_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Project not found"))?;

    CacheHelper::set_optional(redis, &key, &project, PROJECT_CACHE_TTL).await;

    Ok(Json(ApiResponse::success("Project retrieved", project)))
}

pub async fn update_project(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<UpdateProjectDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let project = load_owned_project(&app_state, project_id, user.user.id).await?;
    if project.status != ProjectStatus::Open {
        return Err(HttpError::conflict("Only open projects can be edited"));
    }

    let budget_min = body
        .budget_min
        .map(money_from_f64)
        .transpose()
        .map_err(HttpError::bad_request)?;
    let budget_max = body
        .budget_max
        .map(money_from_f64)
        .transpose()
        .map_err(HttpError::bad_request)?;

    let effective_min = budget_min.as_ref().unwrap_or(&project.budget_min);
    let effective_max = budget_max.as_ref().unwrap_or(&project.budget_max);
    if effective_min > effective_max {
        return Err(HttpError::bad_request(
            "Minimum budget cannot exceed maximum budget",
        ));
    }

    let changes = ProjectChanges {
        title: body.title,
        description: body.description,
        category: body.category.map(|c| c.trim().to_lowercase()),
        skills: body.skills,
        budget_min,
        budget_max,
        deadline: body.deadline,
    };

    let updated = app_state
        .db_client
        .update_project(project_id, changes)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    invalidate_project_cache(&app_state, project_id).await;

    Ok(Json(ApiResponse::success("Project updated", updated)))
}

pub async fn cancel_project(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let project = load_owned_project(&app_state, project_id, user.user.id).await?;
    if project.status != ProjectStatus::Open {
        return Err(HttpError::conflict(
            "Projects with an accepted proposal cannot be cancelled here",
        ));
    }

    let cancelled = app_state
        .db_client
        .update_project_status(project_id, ProjectStatus::Cancelled)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    invalidate_project_cache(&app_state, project_id).await;
    tracing::info!("Project {} cancelled by its owner", project_id);

    Ok(Json(ApiResponse::success("Project cancelled", cancelled)))
}

pub async fn submit_proposal(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<CreateProposalDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let milestones = body.proposed_milestones().map_err(HttpError::bad_request)?;
    let bid_amount = money_from_f64(body.bid_amount).map_err(HttpError::bad_request)?;

    let proposal = app_state
        .contract_service
        .submit_proposal(
            project_id,
            &user.user,
            body.cover_letter,
            bid_amount,
            body.estimated_days,
            milestones,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Proposal submitted", proposal)),
    ))
}

pub async fn get_project_proposals(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    if !user.user.is_admin() {
        load_owned_project(&app_state, project_id, user.user.id).await?;
    }

    let proposals = app_state
        .db_client
        .get_project_proposals(project_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success("Proposals retrieved", proposals)))
}

pub async fn get_my_proposals(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let proposals = app_state
        .db_client
        .get_freelancer_proposals(user.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success("Proposals retrieved", proposals)))
}

pub async fn accept_proposal(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(proposal_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let contract = app_state
        .contract_service
        .accept_proposal(proposal_id, user.user.id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            "Proposal accepted, contract drafted",
            contract,
        )),
    ))
}

pub async fn reject_proposal(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(proposal_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let proposal = app_state
        .contract_service
        .reject_proposal(proposal_id, user.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Proposal rejected", proposal)))
}

pub async fn withdraw_proposal(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(proposal_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let proposal = app_state
        .contract_service
        .withdraw_proposal(proposal_id, user.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Proposal withdrawn", proposal)))
}
