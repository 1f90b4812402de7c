use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{profile_changes, require_password};
use crate::api::error::{ApiError, ErrorBody};
use crate::auth::{AuthState, Identity};
use crate::rbac::{
    models::{AccountStatus, Permission},
    store::Update,
};

#[derive(ToSchema, Deserialize, Default)]
pub struct UpdateAccountRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub middle_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccessResponse {
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
}

#[utoipa::path(
    get,
    path = "/v1/users/me",
    responses(
        (status = 200, description = "Own profile", body = Identity),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    ),
    tag = "users"
)]
pub async fn me(identity: Identity) -> Json<Identity> {
    Json(identity)
}

#[utoipa::path(
    put,
    path = "/v1/users/me",
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "Profile updated", body = Identity),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all, fields(account = %identity.id))]
pub async fn update_me(
    identity: Identity,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateAccountRequest>>,
) -> Result<Json<Identity>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    let mut changes = profile_changes(
        request.first_name,
        request.last_name,
        request.middle_name,
        request.email,
    )?;
    if let Some(password) = request.password {
        require_password(&password)?;
        changes.password_hash = Some(auth_state.hasher().hash(&password)?);
    }

    if changes.is_empty() {
        return Ok(Json(identity));
    }

    match auth_state.store().update_account(identity.id, changes).await? {
        Update::Updated(account) => {
            info!("Profile updated");
            Ok(Json(Identity::from(account)))
        }
        Update::NotFound => Err(ApiError::NotFound("Account not found".to_string())),
        Update::Conflict => Err(ApiError::Conflict("Email already registered".to_string())),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/users/me",
    responses(
        (status = 204, description = "Account deleted"),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all, fields(account = %identity.id))]
pub async fn delete_me(
    identity: Identity,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    // Soft delete: grants stay, only login is barred.
    if !auth_state
        .store()
        .set_account_status(identity.id, AccountStatus::Deleted)
        .await?
    {
        return Err(ApiError::NotFound("Account not found".to_string()));
    }
    info!("Account deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    get,
    path = "/v1/users/me/access",
    responses(
        (status = 200, description = "Own roles and permissions", body = AccessResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    ),
    tag = "users"
)]
pub async fn my_access(
    identity: Identity,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<AccessResponse>, ApiError> {
    let authorizer = auth_state.authorizer();
    let roles = authorizer
        .roles_of(identity.id)
        .await?
        .into_iter()
        .map(|role| role.name)
        .collect();
    let permissions = authorizer.permissions_of(identity.id).await?;
    Ok(Json(AccessResponse { roles, permissions }))
}

#[utoipa::path(
    get,
    path = "/v1/users/{id}",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account profile", body = Identity),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Missing users:read", body = ErrorBody),
        (status = 404, description = "Account not found", body = ErrorBody),
    ),
    tag = "users"
)]
pub async fn user_by_id(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<Identity>, ApiError> {
    auth_state
        .store()
        .account_by_id(id)
        .await?
        .map(|account| Json(Identity::from(account)))
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))
}
