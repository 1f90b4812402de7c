//! Products and orders.
//!
//! These are the business rows the seeded `products_*` and `orders_*`
//! permissions protect. Every route over them sits behind a permission gate,
//! and creating either one also requires an active account.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Minor currency units.
    pub price_cents: i64,
    pub category: String,
}

#[derive(Clone, Debug)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub category: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// An order for one product. `total_cents` is the product price times the
/// quantity at the time the order was placed or last resized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub account_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub total_cents: i64,
    pub status: OrderStatus,
}

#[derive(Clone, Debug)]
pub struct NewOrder {
    pub account_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

/// `None` leaves the column untouched.
#[derive(Clone, Debug, Default)]
pub struct OrderChanges {
    pub quantity: Option<i32>,
    pub status: Option<OrderStatus>,
}

/// Outcome of deleting a product.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotFound,
    /// Orders still reference the product.
    InUse,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn insert_product(&self, product: NewProduct) -> Result<Product>;
    async fn product_by_id(&self, id: Uuid) -> Result<Option<Product>>;
    /// Ordered by name.
    async fn products(&self) -> Result<Vec<Product>>;
    async fn update_product(&self, id: Uuid, product: NewProduct) -> Result<Option<Product>>;
    async fn delete_product(&self, id: Uuid) -> Result<Removal>;

    /// Price the order from the current product row. `None` when the product
    /// does not exist.
    async fn insert_order(&self, order: NewOrder) -> Result<Option<Order>>;
    async fn order_by_id(&self, id: Uuid) -> Result<Option<Order>>;
    async fn orders(&self) -> Result<Vec<Order>>;
    async fn orders_of(&self, account_id: Uuid) -> Result<Vec<Order>>;
    /// A quantity change reprices the order.
    async fn update_order(&self, id: Uuid, changes: OrderChanges) -> Result<Option<Order>>;
    async fn delete_order(&self, id: Uuid) -> Result<bool>;
}
