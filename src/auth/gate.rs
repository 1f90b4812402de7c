//! Route gates.
//!
//! A [`Gate`] is bound to a route when the router is built. It first requires
//! an identity (`401` without one), then asks the [`Authorizer`] about the
//! capability it was built with (`403` when denied). Store failures deny.
//!
//! [`Authorizer`]: crate::rbac::Authorizer

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::MethodRouter,
};
use std::sync::Arc;
use tracing::{info, instrument};

use super::{identity::Identity, state::AuthState};
use crate::api::error::ApiError;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Permission {
        resource: &'static str,
        action: &'static str,
    },
    Admin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gate {
    requirement: Requirement,
}

impl Gate {
    /// Require `(resource, action)` through one of the caller's roles.
    #[must_use]
    pub const fn permission(resource: &'static str, action: &'static str) -> Self {
        Self {
            requirement: Requirement::Permission { resource, action },
        }
    }

    /// Require the `admin` role.
    #[must_use]
    pub const fn admin() -> Self {
        Self {
            requirement: Requirement::Admin,
        }
    }

    /// Wrap every handler of `route` with this gate.
    #[must_use]
    pub fn guard<S>(self, route: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        route.route_layer(middleware::from_fn_with_state(self, enforce))
    }

    /// Decide for an already resolved identity.
    ///
    /// # Errors
    /// Returns `Forbidden` when denied and `Internal` when the check itself fails.
    pub async fn authorize(&self, state: &AuthState, identity: &Identity) -> Result<(), ApiError> {
        let authorizer = state.authorizer();
        let allowed = match &self.requirement {
            Requirement::Permission { resource, action } => {
                authorizer
                    .has_permission(identity.id, resource, action)
                    .await?
            }
            Requirement::Admin => authorizer.is_admin(identity.id).await?,
        };
        if allowed {
            Ok(())
        } else {
            info!(subject = %identity.id, requirement = ?self.requirement, "access denied");
            Err(ApiError::Forbidden)
        }
    }
}

#[instrument(skip_all)]
async fn enforce(
    State(gate): State<Gate>,
    identity: Identity,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let state = request
        .extensions()
        .get::<Arc<AuthState>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("auth state extension missing")))?;
    gate.authorize(&state, &identity).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
