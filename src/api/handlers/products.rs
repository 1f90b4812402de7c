use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::require_active;
use crate::api::error::{ApiError, ErrorBody};
use crate::auth::Identity;
use crate::catalog::{Catalog, NewProduct, Product, Removal};

const NAME_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 500;
const CATEGORY_MAX: usize = 50;
const PRICE_MAX_CENTS: i64 = 100_000_000;

#[derive(ToSchema, Deserialize)]
pub struct ProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    pub category: String,
}

fn bounded(field: &str, value: &str, max: usize) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() || value.chars().count() > max {
        return Err(ApiError::Validation(format!(
            "{field} must be 1-{max} characters"
        )));
    }
    Ok(value.to_string())
}

fn new_product(request: ProductRequest) -> Result<NewProduct, ApiError> {
    if !(0..=PRICE_MAX_CENTS).contains(&request.price_cents) {
        return Err(ApiError::Validation(format!(
            "price_cents must be between 0 and {PRICE_MAX_CENTS}"
        )));
    }
    let description = match request.description {
        Some(text) if text.chars().count() > DESCRIPTION_MAX => {
            return Err(ApiError::Validation(format!(
                "description must be at most {DESCRIPTION_MAX} characters"
            )));
        }
        other => other,
    };
    Ok(NewProduct {
        name: bounded("name", &request.name, NAME_MAX)?,
        description,
        price_cents: request.price_cents,
        category: bounded("category", &request.category, CATEGORY_MAX)?,
    })
}

fn not_found() -> ApiError {
    ApiError::NotFound("Product not found".to_string())
}

#[utoipa::path(
    get,
    path = "/v1/products",
    responses(
        (status = 200, description = "All products", body = [Product]),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Missing products:read", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn list_products(
    catalog: Extension<Arc<dyn Catalog>>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(catalog.products().await?))
}

#[utoipa::path(
    get,
    path = "/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = Product),
        (status = 403, description = "Missing products:read", body = ErrorBody),
        (status = 404, description = "Product not found", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn get_product(
    Path(id): Path<Uuid>,
    catalog: Extension<Arc<dyn Catalog>>,
) -> Result<Json<Product>, ApiError> {
    catalog
        .product_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

#[utoipa::path(
    post,
    path = "/v1/products",
    request_body = ProductRequest,
    responses(
        (status = 201, description = "Product created", body = Product),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 403, description = "Missing products:write or account deleted", body = ErrorBody),
    ),
    tag = "catalog"
)]
#[instrument(skip_all, fields(account = %identity.id))]
pub async fn create_product(
    identity: Identity,
    catalog: Extension<Arc<dyn Catalog>>,
    payload: Option<Json<ProductRequest>>,
) -> Result<Response, ApiError> {
    require_active(&identity)?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let product = catalog.insert_product(new_product(request)?).await?;
    info!(product = %product.id, "Product created");
    Ok((StatusCode::CREATED, Json(product)).into_response())
}

#[utoipa::path(
    put,
    path = "/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = ProductRequest,
    responses(
        (status = 200, description = "Product replaced", body = Product),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 403, description = "Missing products:write", body = ErrorBody),
        (status = 404, description = "Product not found", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn update_product(
    Path(id): Path<Uuid>,
    catalog: Extension<Arc<dyn Catalog>>,
    payload: Option<Json<ProductRequest>>,
) -> Result<Json<Product>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    catalog
        .update_product(id, new_product(request)?)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

#[utoipa::path(
    delete,
    path = "/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 403, description = "Missing products:delete", body = ErrorBody),
        (status = 404, description = "Product not found", body = ErrorBody),
        (status = 409, description = "Product has orders", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn delete_product(
    Path(id): Path<Uuid>,
    catalog: Extension<Arc<dyn Catalog>>,
) -> Result<StatusCode, ApiError> {
    match catalog.delete_product(id).await? {
        Removal::Removed => Ok(StatusCode::NO_CONTENT),
        Removal::NotFound => Err(not_found()),
        Removal::InUse => Err(ApiError::Conflict("Product has orders".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(price_cents: i64) -> ProductRequest {
        ProductRequest {
            name: "  Kettle ".to_string(),
            description: None,
            price_cents,
            category: "kitchen".to_string(),
        }
    }

    #[test]
    fn product_fields_are_trimmed_and_bounded() {
        assert!(matches!(new_product(request(0)), Ok(product) if product.name == "Kettle"));
        assert!(new_product(request(-1)).is_err());
        assert!(new_product(request(PRICE_MAX_CENTS + 1)).is_err());

        let mut blank = request(100);
        blank.category = " ".to_string();
        assert!(new_product(blank).is_err());

        let mut wordy = request(100);
        wordy.description = Some("d".repeat(DESCRIPTION_MAX + 1));
        assert!(new_product(wordy).is_err());
    }
}
