use crate::{
    api::handlers::{admin, auth, health, orders, products, users},
    auth::{resolve_identity, AuthState, Gate},
    catalog::Catalog,
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::{delete, get, patch, post, put},
    Extension, Json, Router,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod error;
pub(crate) mod handlers;
// OpenAPI document assembly lives in openapi.rs.
mod openapi;

pub use openapi::openapi;

const REQUEST_ID: &str = "x-request-id";

/// Build the application router.
///
/// Gates are declared here, next to the routes they protect. Routes without a
/// gate are either public or take an [`crate::auth::Identity`] argument, which
/// by itself requires a signed-in caller. Paths whose methods need different
/// permissions merge one gated method router per permission.
#[must_use]
pub fn router(auth_state: Arc<AuthState>, catalog: Arc<dyn Catalog>) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/openapi.json", get(openapi_json))
        .route("/v1/auth/register", post(auth::register))
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/refresh", post(auth::refresh))
        .route("/v1/auth/logout", post(auth::logout));

    let users = Router::new()
        .route(
            "/v1/users/me",
            get(users::me).put(users::update_me).delete(users::delete_me),
        )
        .route("/v1/users/me/access", get(users::my_access))
        .route(
            "/v1/users/:id",
            Gate::permission("users", "read").guard(get(users::user_by_id)),
        );

    let admin = Router::new()
        .route(
            "/v1/admin/roles",
            Gate::admin().guard(get(admin::list_roles).post(admin::create_role)),
        )
        .route(
            "/v1/admin/roles/:id",
            Gate::admin().guard(get(admin::get_role).patch(admin::update_role)),
        )
        .route(
            "/v1/admin/permissions",
            Gate::admin().guard(get(admin::list_permissions).post(admin::create_permission)),
        )
        .route(
            "/v1/admin/permissions/:id",
            Gate::admin().guard(get(admin::get_permission).patch(admin::update_permission)),
        )
        .route(
            "/v1/admin/account-roles",
            Gate::admin().guard(post(admin::grant_role)),
        )
        .route(
            "/v1/admin/account-roles/:id",
            Gate::admin().guard(delete(admin::revoke_role)),
        )
        .route(
            "/v1/admin/role-permissions",
            Gate::admin().guard(post(admin::grant_permission)),
        )
        .route(
            "/v1/admin/role-permissions/:id",
            Gate::admin().guard(delete(admin::revoke_permission)),
        )
        .route(
            "/v1/admin/users",
            Gate::admin().guard(get(admin::list_users).post(admin::create_user)),
        )
        .route(
            "/v1/admin/users/:id",
            Gate::admin().guard(patch(admin::edit_user).delete(admin::delete_user)),
        )
        .route(
            "/v1/admin/users/:id/restore",
            Gate::admin().guard(post(admin::restore_user)),
        );

    let catalog_routes = Router::new()
        .route(
            "/v1/products",
            Gate::permission("products", "read")
                .guard(get(products::list_products))
                .merge(Gate::permission("products", "write").guard(post(products::create_product))),
        )
        .route(
            "/v1/products/:id",
            Gate::permission("products", "read")
                .guard(get(products::get_product))
                .merge(Gate::permission("products", "write").guard(put(products::update_product)))
                .merge(
                    Gate::permission("products", "delete").guard(delete(products::delete_product)),
                ),
        )
        .route(
            "/v1/orders",
            Gate::permission("orders", "read")
                .guard(get(orders::list_orders))
                .merge(Gate::permission("orders", "write").guard(post(orders::create_order))),
        )
        .route("/v1/orders/mine", get(orders::my_orders))
        .route(
            "/v1/orders/:id",
            Gate::permission("orders", "read")
                .guard(get(orders::get_order))
                .merge(Gate::permission("orders", "write").guard(put(orders::update_order)))
                .merge(Gate::permission("orders", "delete").guard(delete(orders::delete_order))),
        );

    // Router::layer wraps outside-in: the Extension below must be visible to
    // resolve_identity, so it is added after it.
    public
        .merge(users)
        .merge(admin)
        .merge(catalog_routes)
        .layer(middleware::from_fn(resolve_identity))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(auth_state))
                .layer(Extension(catalog)),
        )
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

/// Start the server
/// # Errors
/// Return error if the listener cannot be bound or the server fails
pub async fn new(
    port: u16,
    auth_state: Arc<AuthState>,
    catalog: Arc<dyn Catalog>,
) -> Result<()> {
    let app = router(auth_state, catalog);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{Argon2Hasher, AuthConfig, TokenConfig, TokenService},
        catalog::MemoryCatalog,
        rbac::{
            seed,
            store::{MemoryStore, Store},
        },
    };
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use secrecy::SecretString;
    use tower::ServiceExt;

    async fn app() -> anyhow::Result<Router> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let tokens = TokenService::new(TokenConfig::new(SecretString::from(
            "router-test-secret-router-test-secret".to_string(),
        )))?;
        let state = AuthState::new(
            AuthConfig::new(),
            tokens,
            Arc::new(Argon2Hasher::new()),
            store.clone(),
        );
        seed::ensure_defaults(store.as_ref(), state.authorizer()).await?;
        Ok(router(Arc::new(state), Arc::new(MemoryCatalog::new())))
    }

    #[tokio::test]
    async fn request_id_is_generated_and_propagated() -> anyhow::Result<()> {
        let response = app()
            .await?
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response
            .headers()
            .get(REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(Ulid::from_string(request_id).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn caller_request_id_is_kept() -> anyhow::Result<()> {
        let response = app()
            .await?
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(REQUEST_ID, "trace-me")
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(
            response.headers().get(REQUEST_ID).map(HeaderValue::as_bytes),
            Some(&b"trace-me"[..])
        );
        Ok(())
    }

    #[tokio::test]
    async fn openapi_document_is_served() -> anyhow::Result<()> {
        let response = app()
            .await?
            .oneshot(Request::builder().uri("/openapi.json").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await?.to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body)?;
        assert!(json["paths"]["/v1/auth/login"].is_object());
        assert!(json["paths"]["/v1/admin/roles/{id}"].is_object());
        Ok(())
    }

    #[tokio::test]
    async fn protected_routes_reject_anonymous_callers() -> anyhow::Result<()> {
        let app = app().await?;
        for (method, uri) in [
            ("GET", "/v1/users/me"),
            ("GET", "/v1/users/me/access"),
            ("GET", "/v1/users/0190c7d6-7b8a-7000-8000-000000000000"),
            ("GET", "/v1/admin/roles"),
            ("GET", "/v1/admin/users"),
            ("DELETE", "/v1/admin/account-roles/0190c7d6-7b8a-7000-8000-000000000000"),
            ("PATCH", "/v1/admin/users/0190c7d6-7b8a-7000-8000-000000000000"),
            ("POST", "/v1/admin/users/0190c7d6-7b8a-7000-8000-000000000000/restore"),
            ("GET", "/v1/products"),
            ("POST", "/v1/products"),
            ("DELETE", "/v1/products/0190c7d6-7b8a-7000-8000-000000000000"),
            ("GET", "/v1/orders/mine"),
            ("PUT", "/v1/orders/0190c7d6-7b8a-7000-8000-000000000000"),
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().method(method).uri(uri).body(Body::empty())?)
                .await?;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
        Ok(())
    }
}
