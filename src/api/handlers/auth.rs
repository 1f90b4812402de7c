//! Registration, login, token refresh and logout.
//!
//! Login and refresh answer with a fresh token pair in `Set-Cookie` headers.
//! Logout only expires the cookies: tokens are stateless, so there is nothing
//! to delete server-side.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{optional_name, require_email, require_name, require_password};
use crate::api::error::{ApiError, ErrorBody};
use crate::auth::{
    cookies::{cleared_cookies, extract_cookie, token_cookies, REFRESH_COOKIE},
    credentials::DECOY_DIGEST,
    AuthState, Identity, TokenKind, TokenPair, TokenStatus,
};
use crate::rbac::{
    models::{AccountStatus, NewAccount},
    store::Insert,
};

#[derive(ToSchema, Deserialize)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub message: String,
    pub account_id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

fn cookie_headers(
    cookies: Result<[HeaderValue; 2], InvalidHeaderValue>,
) -> Result<HeaderMap, ApiError> {
    let cookies = cookies.map_err(|err| ApiError::Internal(err.into()))?;
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        headers.append(SET_COOKIE, cookie);
    }
    Ok(headers)
}

fn session_headers(auth_state: &AuthState, pair: &TokenPair) -> Result<HeaderMap, ApiError> {
    cookie_headers(token_cookies(pair, auth_state.config().production()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = Identity),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    if request.password != request.password_confirm {
        return Err(ApiError::Validation("Passwords do not match".to_string()));
    }

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
    info!(account = %identity.id, "Account registered");
    Ok((StatusCode::CREATED, Json(identity)).into_response())
}

/// Input shared by self-registration and admin account creation.
pub(crate) struct AccountFields {
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub email: String,
    pub password: String,
}

/// Validate, hash and insert an account holding the configured default role.
pub(crate) async fn open_account(
    auth_state: &AuthState,
    fields: AccountFields,
) -> Result<Identity, ApiError> {
    require_name("first_name", &fields.first_name)?;
    require_name("last_name", &fields.last_name)?;
    let middle_name = optional_name("middle_name", fields.middle_name)?;
    let email = require_email(&fields.email)?;
    require_password(&fields.password)?;

    let password_hash = auth_state.hasher().hash(&fields.password)?;
    let default_role = auth_state.config().default_role();
    if auth_state.store().role_by_name(default_role).await?.is_none() {
        warn!(role = default_role, "Default role missing, account created without it");
    }

    let outcome = auth_state
        .store()
        .insert_account(
            NewAccount {
                first_name: fields.first_name,
                last_name: fields.last_name,
                middle_name,
                email,
                password_hash,
            },
            Some(default_role),
        )
        .await?;

    match outcome {
        Insert::Created(account) => Ok(Identity::from(account)),
        Insert::Conflict => Err(ApiError::Conflict("Email already registered".to_string())),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, session cookies set", body = LoginResponse),
        (status = 401, description = "Invalid email or password", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };

    let email = super::normalize_email(&request.email);
    let account = auth_state.store().account_by_email(&email).await?;

    // Unknown email, wrong password and deleted account are indistinguishable,
    // in the body and in the hashing work spent.
    let digest = account
        .as_ref()
        .map_or(DECOY_DIGEST, |account| account.password_hash.as_str());
    let verified = auth_state.hasher().verify(&request.password, digest);

    let Some(account) = account else {
        debug!("Login for unknown email");
        return Err(ApiError::InvalidCredentials);
    };
    if !verified {
        debug!(account = %account.id, "Login with wrong password");
        return Err(ApiError::InvalidCredentials);
    }
    if account.status == AccountStatus::Deleted {
        debug!(account = %account.id, "Login for deleted account");
        return Err(ApiError::InvalidCredentials);
    }

    let pair = auth_state
        .tokens()
        .issue(account.id)
        .map_err(|err| ApiError::Internal(err.into()))?;
    let headers = session_headers(&auth_state, &pair)?;

    info!(account = %account.id, "Logged in");
    Ok((
        StatusCode::OK,
        headers,
        Json(LoginResponse {
            message: "Logged in successfully".to_string(),
            account_id: account.id,
        }),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    responses(
        (status = 200, description = "New session cookies set", body = MessageResponse),
        (status = 401, description = "Missing, invalid or expired refresh token", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    auth_state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = extract_cookie(&headers, REFRESH_COOKIE);
    let subject = match auth_state
        .tokens()
        .inspect(token.as_deref(), TokenKind::Refresh)
    {
        TokenStatus::Valid(subject) => subject,
        TokenStatus::Invalid | TokenStatus::Absent => return Err(ApiError::Unauthorized),
    };

    let pair = auth_state
        .tokens()
        .issue(subject)
        .map_err(|err| ApiError::Internal(err.into()))?;
    let headers = session_headers(&auth_state, &pair)?;

    Ok((
        StatusCode::OK,
        headers,
        Json(MessageResponse {
            message: "Access and refresh tokens refreshed".to_string(),
        }),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cookies cleared")
    ),
    tag = "auth"
)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> Result<Response, ApiError> {
    let headers = cookie_headers(cleared_cookies(auth_state.config().production()))?;
    Ok((StatusCode::NO_CONTENT, headers).into_response())
}
