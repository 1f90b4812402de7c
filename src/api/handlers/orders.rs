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
use crate::catalog::{Catalog, NewOrder, Order, OrderChanges, OrderStatus};

const QUANTITY_MAX: i32 = 10_000;

#[derive(ToSchema, Deserialize)]
pub struct CreateOrderRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(ToSchema, Deserialize, Default)]
pub struct UpdateOrderRequest {
    pub quantity: Option<i32>,
    pub status: Option<OrderStatus>,
}

fn check_quantity(quantity: i32) -> Result<i32, ApiError> {
    if (1..=QUANTITY_MAX).contains(&quantity) {
        Ok(quantity)
    } else {
        Err(ApiError::Validation(format!(
            "quantity must be between 1 and {QUANTITY_MAX}"
        )))
    }
}

fn not_found() -> ApiError {
    ApiError::NotFound("Order not found".to_string())
}

#[utoipa::path(
    get,
    path = "/v1/orders",
    responses(
        (status = 200, description = "All orders", body = [Order]),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Missing orders:read", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn list_orders(catalog: Extension<Arc<dyn Catalog>>) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(catalog.orders().await?))
}

#[utoipa::path(
    get,
    path = "/v1/orders/mine",
    responses(
        (status = 200, description = "Orders placed by the caller", body = [Order]),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn my_orders(
    identity: Identity,
    catalog: Extension<Arc<dyn Catalog>>,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(catalog.orders_of(identity.id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = Order),
        (status = 403, description = "Missing orders:read", body = ErrorBody),
        (status = 404, description = "Order not found", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn get_order(
    Path(id): Path<Uuid>,
    catalog: Extension<Arc<dyn Catalog>>,
) -> Result<Json<Order>, ApiError> {
    catalog
        .order_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

#[utoipa::path(
    post,
    path = "/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order placed for the caller", body = Order),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 403, description = "Missing orders:write or account deleted", body = ErrorBody),
        (status = 404, description = "Product not found", body = ErrorBody),
    ),
    tag = "catalog"
)]
#[instrument(skip_all, fields(account = %identity.id))]
pub async fn create_order(
    identity: Identity,
    catalog: Extension<Arc<dyn Catalog>>,
    payload: Option<Json<CreateOrderRequest>>,
) -> Result<Response, ApiError> {
    require_active(&identity)?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let order = NewOrder {
        account_id: identity.id,
        product_id: request.product_id,
        quantity: check_quantity(request.quantity)?,
    };
    let Some(order) = catalog.insert_order(order).await? else {
        return Err(ApiError::NotFound("Product not found".to_string()));
    };
    info!(order = %order.id, "Order placed");
    Ok((StatusCode::CREATED, Json(order)).into_response())
}

#[utoipa::path(
    put,
    path = "/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderRequest,
    responses(
        (status = 200, description = "Order updated", body = Order),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 403, description = "Missing orders:write", body = ErrorBody),
        (status = 404, description = "Order not found", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn update_order(
    Path(id): Path<Uuid>,
    catalog: Extension<Arc<dyn Catalog>>,
    payload: Option<Json<UpdateOrderRequest>>,
) -> Result<Json<Order>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let changes = OrderChanges {
        quantity: request.quantity.map(check_quantity).transpose()?,
        status: request.status,
    };
    catalog
        .update_order(id, changes)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

#[utoipa::path(
    delete,
    path = "/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 403, description = "Missing orders:delete", body = ErrorBody),
        (status = 404, description = "Order not found", body = ErrorBody),
    ),
    tag = "catalog"
)]
pub async fn delete_order(
    Path(id): Path<Uuid>,
    catalog: Extension<Arc<dyn Catalog>>,
) -> Result<StatusCode, ApiError> {
    if catalog.delete_order(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_is_bounded() {
        assert!(check_quantity(1).is_ok());
        assert!(check_quantity(QUANTITY_MAX).is_ok());
        assert!(check_quantity(0).is_err());
        assert!(check_quantity(-3).is_err());
        assert!(check_quantity(QUANTITY_MAX + 1).is_err());
    }
}
