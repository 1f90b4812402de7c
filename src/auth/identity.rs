//! Per-request identity resolution.
//!
//! `resolve_identity` runs once for every request and only records what the
//! access cookie says. It never rejects: deciding whether an identity is
//! required is the job of the extractors below and of [`super::gate::Gate`].

use anyhow::Result;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    cookies::{extract_cookie, ACCESS_COOKIE},
    state::AuthState,
    token::{TokenKind, TokenStatus},
};
use crate::api::error::ApiError;
use crate::rbac::models::{Account, AccountStatus};

/// Account id carried by the request's access cookie, if it validated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Subject(pub Option<Uuid>);

/// Public view of the account behind a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Identity {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub email: String,
    pub status: AccountStatus,
}

impl From<Account> for Identity {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            first_name: account.first_name,
            last_name: account.last_name,
            middle_name: account.middle_name,
            email: account.email,
            status: account.status,
        }
    }
}

/// Identity if one resolves, `None` otherwise.
#[derive(Clone, Debug)]
pub struct MaybeIdentity(pub Option<Identity>);

/// Middleware: validate the `access_token` cookie and record a [`Subject`].
pub async fn resolve_identity(mut request: Request, next: Next) -> Response {
    let subject = match request.extensions().get::<Arc<AuthState>>() {
        Some(state) => {
            let token = extract_cookie(request.headers(), ACCESS_COOKIE);
            match state.tokens().inspect(token.as_deref(), TokenKind::Access) {
                TokenStatus::Valid(id) => Subject(Some(id)),
                TokenStatus::Invalid => {
                    debug!("Ignoring invalid access token");
                    Subject(None)
                }
                TokenStatus::Absent => Subject(None),
            }
        }
        None => {
            warn!("Auth state missing, treating request as anonymous");
            Subject(None)
        }
    };
    request.extensions_mut().insert(subject);
    next.run(request).await
}

/// Load the account for `subject`. A subject without a row resolves to `None`.
///
/// # Errors
/// Returns an error if the store lookup fails.
pub async fn current_subject_or_none(
    state: &AuthState,
    subject: Subject,
) -> Result<Option<Identity>> {
    let Some(id) = subject.0 else {
        return Ok(None);
    };
    let account = state.store().account_by_id(id).await?;
    Ok(account.map(Identity::from))
}

fn auth_state(parts: &Parts) -> Result<Arc<AuthState>, ApiError> {
    parts
        .extensions
        .get::<Arc<AuthState>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("auth state extension missing")))
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(Self(Some(identity.clone())));
        }
        let subject = parts
            .extensions
            .get::<Subject>()
            .copied()
            .unwrap_or_default();
        if subject.0.is_none() {
            return Ok(Self(None));
        }
        let state = auth_state(parts)?;
        let identity = current_subject_or_none(&state, subject).await?;
        Ok(Self(identity))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let MaybeIdentity(identity) = MaybeIdentity::from_request_parts(parts, state).await?;
        identity.ok_or(ApiError::Unauthorized)
    }
}
