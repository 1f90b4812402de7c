//! Administration of accounts, roles, permissions and grants.
//!
//! Every route here sits behind `Gate::admin()`. Roles and permissions are
//! never deleted; revoking access means deleting a grant row. Accounts are
//! only ever soft-deleted, and can be restored.

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

use super::{
    auth::{open_account, AccountFields},
    profile_changes,
};
use crate::api::error::{ApiError, ErrorBody};
use crate::auth::{AuthState, Identity};
use crate::rbac::{
    models::{AccountRole, AccountStatus, NewPermission, NewRole, Permission, Role, RolePermission},
    store::{Grant, Insert, Update},
};

const NAME_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 200;

#[derive(ToSchema, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(ToSchema, Deserialize)]
pub struct CreatePermissionRequest {
    pub name: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(ToSchema, Deserialize)]
pub struct UpdateDescriptionRequest {
    pub description: Option<String>,
}

#[derive(ToSchema, Deserialize)]
pub struct GrantRoleRequest {
    pub account_id: Uuid,
    pub role_id: Uuid,
}

#[derive(ToSchema, Deserialize)]
pub struct GrantPermissionRequest {
    pub role_id: Uuid,
    pub permission_id: Uuid,
}

#[derive(ToSchema, Deserialize)]
pub struct CreateAccountRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub email: String,
    pub password: String,
}

/// Profile fields an admin may change. Passwords stay with their owner.
#[derive(ToSchema, Deserialize, Default)]
pub struct EditAccountRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub middle_name: Option<String>,
    pub email: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccountWithRoles {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub status: AccountStatus,
    pub roles: Vec<String>,
}

fn require_label(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() || value.chars().count() > NAME_MAX {
        return Err(ApiError::Validation(format!(
            "{field} must be 1-{NAME_MAX} characters"
        )));
    }
    Ok(value.to_string())
}

fn check_description(description: Option<String>) -> Result<Option<String>, ApiError> {
    match description {
        Some(text) if text.chars().count() > DESCRIPTION_MAX => Err(ApiError::Validation(
            format!("description must be at most {DESCRIPTION_MAX} characters"),
        )),
        other => Ok(other),
    }
}

fn missing(reference: crate::rbac::store::Reference) -> ApiError {
    let name = reference.as_str();
    let mut label = name.to_string();
    if let Some(first) = label.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    ApiError::NotFound(format!("{label} not found"))
}

#[utoipa::path(
    post,
    path = "/v1/admin/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name taken", body = ErrorBody),
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn create_role(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<CreateRoleRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let role = NewRole {
        name: require_label("name", &request.name)?,
        description: check_description(request.description)?,
    };
    match auth_state.authorizer().create_role(role).await? {
        Insert::Created(role) => Ok((StatusCode::CREATED, Json(role)).into_response()),
        Insert::Conflict => Err(ApiError::Conflict(
            "Role with this name already exists".to_string(),
        )),
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/roles",
    responses((status = 200, description = "All roles", body = [Role])),
    tag = "admin"
)]
pub async fn list_roles(auth_state: Extension<Arc<AuthState>>) -> Result<Json<Vec<Role>>, ApiError> {
    Ok(Json(auth_state.authorizer().roles().await?))
}

#[utoipa::path(
    get,
    path = "/v1/admin/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 404, description = "Role not found", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn get_role(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<Role>, ApiError> {
    auth_state
        .authorizer()
        .role(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Role not found".to_string()))
}

#[utoipa::path(
    patch,
    path = "/v1/admin/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = UpdateDescriptionRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "Role not found", body = ErrorBody),
    ),
    tag = "admin"
)]
#[instrument(skip_all, fields(role = %id))]
pub async fn update_role(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateDescriptionRequest>>,
) -> Result<Json<Role>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    auth_state
        .authorizer()
        .update_role_description(id, check_description(request.description)?)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Role not found".to_string()))
}

#[utoipa::path(
    post,
    path = "/v1/admin/permissions",
    request_body = CreatePermissionRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission name taken", body = ErrorBody),
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn create_permission(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<CreatePermissionRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let permission = NewPermission {
        name: require_label("name", &request.name)?,
        resource: require_label("resource", &request.resource)?,
        action: require_label("action", &request.action)?,
        description: check_description(request.description)?,
    };
    match auth_state.authorizer().create_permission(permission).await? {
        Insert::Created(permission) => Ok((StatusCode::CREATED, Json(permission)).into_response()),
        Insert::Conflict => Err(ApiError::Conflict(
            "Permission with this name already exists".to_string(),
        )),
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/permissions",
    responses((status = 200, description = "All permissions", body = [Permission])),
    tag = "admin"
)]
pub async fn list_permissions(
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<Vec<Permission>>, ApiError> {
    Ok(Json(auth_state.authorizer().permissions().await?))
}

#[utoipa::path(
    get,
    path = "/v1/admin/permissions/{id}",
    params(("id" = Uuid, Path, description = "Permission id")),
    responses(
        (status = 200, description = "Permission", body = Permission),
        (status = 404, description = "Permission not found", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn get_permission(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<Permission>, ApiError> {
    auth_state
        .authorizer()
        .permission(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Permission not found".to_string()))
}

#[utoipa::path(
    patch,
    path = "/v1/admin/permissions/{id}",
    params(("id" = Uuid, Path, description = "Permission id")),
    request_body = UpdateDescriptionRequest,
    responses(
        (status = 200, description = "Permission updated", body = Permission),
        (status = 404, description = "Permission not found", body = ErrorBody),
    ),
    tag = "admin"
)]
#[instrument(skip_all, fields(permission = %id))]
pub async fn update_permission(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateDescriptionRequest>>,
) -> Result<Json<Permission>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    auth_state
        .authorizer()
        .update_permission_description(id, check_description(request.description)?)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Permission not found".to_string()))
}

#[utoipa::path(
    post,
    path = "/v1/admin/account-roles",
    request_body = GrantRoleRequest,
    responses(
        (status = 201, description = "Role granted", body = AccountRole),
        (status = 404, description = "Account or role not found", body = ErrorBody),
        (status = 409, description = "Account already holds the role", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn grant_role(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<GrantRoleRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    match auth_state
        .authorizer()
        .grant_role(request.account_id, request.role_id)
        .await?
    {
        Grant::Granted(grant) => Ok((StatusCode::CREATED, Json(grant)).into_response()),
        Grant::AlreadyGranted => Err(ApiError::Conflict(
            "Account already has this role".to_string(),
        )),
        Grant::MissingReference(reference) => Err(missing(reference)),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/admin/account-roles/{id}",
    params(("id" = Uuid, Path, description = "Grant id")),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 404, description = "Grant not found", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn revoke_role(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<StatusCode, ApiError> {
    if auth_state.authorizer().revoke_role(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Account role not found".to_string()))
    }
}

#[utoipa::path(
    post,
    path = "/v1/admin/role-permissions",
    request_body = GrantPermissionRequest,
    responses(
        (status = 201, description = "Permission granted", body = RolePermission),
        (status = 404, description = "Role or permission not found", body = ErrorBody),
        (status = 409, description = "Role already holds the permission", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn grant_permission(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<GrantPermissionRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    match auth_state
        .authorizer()
        .grant_permission(request.role_id, request.permission_id)
        .await?
    {
        Grant::Granted(grant) => Ok((StatusCode::CREATED, Json(grant)).into_response()),
        Grant::AlreadyGranted => Err(ApiError::Conflict(
            "Role already has this permission".to_string(),
        )),
        Grant::MissingReference(reference) => Err(missing(reference)),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/admin/role-permissions/{id}",
    params(("id" = Uuid, Path, description = "Grant id")),
    responses(
        (status = 204, description = "Permission revoked"),
        (status = 404, description = "Grant not found", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn revoke_permission(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<StatusCode, ApiError> {
    if auth_state.authorizer().revoke_permission(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Role permission not found".to_string()))
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/users",
    responses((status = 200, description = "Active accounts with role names", body = [AccountWithRoles])),
    tag = "admin"
)]
pub async fn list_users(
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<Vec<AccountWithRoles>>, ApiError> {
    let accounts = auth_state
        .store()
        .accounts_by_status(AccountStatus::Active)
        .await?;
    let mut users = Vec::with_capacity(accounts.len());
    for account in accounts {
        let roles = auth_state
            .authorizer()
            .roles_of(account.id)
            .await?
            .into_iter()
            .map(|role| role.name)
            .collect();
        users.push(AccountWithRoles {
            id: account.id,
            first_name: account.first_name,
            last_name: account.last_name,
            email: account.email,
            status: account.status,
            roles,
        });
    }
    Ok(Json(users))
}

#[utoipa::path(
    post,
    path = "/v1/admin/users",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account created with the default role", body = Identity),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn create_user(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<CreateAccountRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let identity = open_account(
        &auth_state,
        AccountFields {
            first_name: request.first_name,
            last_name: request.last_name,
            middle_name: request.middle_name,
            email: request.email,
            password: request.password,
        },
    )
    .await?;
    info!(account = %identity.id, "Account created by admin");
    Ok((StatusCode::CREATED, Json(identity)).into_response())
}

#[utoipa::path(
    patch,
    path = "/v1/admin/users/{id}",
    params(("id" = Uuid, Path, description = "Account id")),
    request_body = EditAccountRequest,
    responses(
        (status = 200, description = "Account updated", body = Identity),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 404, description = "Account not found", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    ),
    tag = "admin"
)]
#[instrument(skip_all, fields(account = %id))]
pub async fn edit_user(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<EditAccountRequest>>,
) -> Result<Json<Identity>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let changes = profile_changes(
        request.first_name,
        request.last_name,
        request.middle_name,
        request.email,
    )?;

    if changes.is_empty() {
        return auth_state
            .store()
            .account_by_id(id)
            .await?
            .map(|account| Json(Identity::from(account)))
            .ok_or_else(account_not_found);
    }

    match auth_state.store().update_account(id, changes).await? {
        Update::Updated(account) => {
            info!("Account updated by admin");
            Ok(Json(Identity::from(account)))
        }
        Update::NotFound => Err(account_not_found()),
        Update::Conflict => Err(ApiError::Conflict("Email already registered".to_string())),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/admin/users/{id}",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 204, description = "Account soft-deleted"),
        (status = 404, description = "Account not found", body = ErrorBody),
    ),
    tag = "admin"
)]
#[instrument(skip_all, fields(account = %id))]
pub async fn delete_user(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<StatusCode, ApiError> {
    set_status(&auth_state, id, AccountStatus::Deleted).await
}

#[utoipa::path(
    post,
    path = "/v1/admin/users/{id}/restore",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 204, description = "Account active again"),
        (status = 404, description = "Account not found", body = ErrorBody),
    ),
    tag = "admin"
)]
#[instrument(skip_all, fields(account = %id))]
pub async fn restore_user(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<StatusCode, ApiError> {
    set_status(&auth_state, id, AccountStatus::Active).await
}

async fn set_status(
    auth_state: &AuthState,
    id: Uuid,
    status: AccountStatus,
) -> Result<StatusCode, ApiError> {
    if auth_state.store().set_account_status(id, status).await? {
        info!(%status, "Account status set by admin");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(account_not_found())
    }
}

fn account_not_found() -> ApiError {
    ApiError::NotFound("Account not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::store::Reference;

    #[test]
    fn missing_reference_names_the_entity() {
        assert_eq!(
            missing(Reference::Permission).to_string(),
            "Permission not found"
        );
        assert_eq!(missing(Reference::Account).to_string(), "Account not found");
    }

    #[test]
    fn labels_are_trimmed_and_bounded() {
        assert!(matches!(require_label("name", "  editor "), Ok(name) if name == "editor"));
        assert!(require_label("name", "   ").is_err());
        assert!(require_label("name", &"x".repeat(NAME_MAX + 1)).is_err());
    }

    #[test]
    fn long_descriptions_are_rejected() {
        assert!(check_description(None).is_ok());
        assert!(check_description(Some("short".to_string())).is_ok());
        assert!(check_description(Some("d".repeat(DESCRIPTION_MAX + 1))).is_err());
    }
}
