//! In-process catalog for tests and `--dsn memory://`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Catalog, NewOrder, NewProduct, Order, OrderChanges, OrderStatus, Product, Removal};

#[derive(Default)]
struct Tables {
    products: BTreeMap<Uuid, Product>,
    orders: BTreeMap<Uuid, Order>,
}

fn total(price_cents: i64, quantity: i32) -> Result<i64> {
    price_cents
        .checked_mul(i64::from(quantity))
        .context("order total overflows")
}

#[derive(Default)]
pub struct MemoryCatalog {
    tables: RwLock<Tables>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let created = Product {
            id: Uuid::new_v4(),
            name: product.name,
            description: product.description,
            price_cents: product.price_cents,
            category: product.category,
        };
        self.tables
            .write()
            .await
            .products
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn product_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn products(&self) -> Result<Vec<Product>> {
        let tables = self.tables.read().await;
        let mut products: Vec<Product> = tables.products.values().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn update_product(&self, id: Uuid, product: NewProduct) -> Result<Option<Product>> {
        let mut tables = self.tables.write().await;
        Ok(tables.products.get_mut(&id).map(|existing| {
            existing.name = product.name;
            existing.description = product.description;
            existing.price_cents = product.price_cents;
            existing.category = product.category;
            existing.clone()
        }))
    }

    async fn delete_product(&self, id: Uuid) -> Result<Removal> {
        let mut tables = self.tables.write().await;
        if !tables.products.contains_key(&id) {
            return Ok(Removal::NotFound);
        }
        if tables.orders.values().any(|order| order.product_id == id) {
            return Ok(Removal::InUse);
        }
        tables.products.remove(&id);
        Ok(Removal::Removed)
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Option<Order>> {
        let mut tables = self.tables.write().await;
        let Some(price_cents) = tables
            .products
            .get(&order.product_id)
            .map(|product| product.price_cents)
        else {
            return Ok(None);
        };
        let created = Order {
            id: Uuid::new_v4(),
            account_id: order.account_id,
            product_id: order.product_id,
            quantity: order.quantity,
            total_cents: total(price_cents, order.quantity)?,
            status: OrderStatus::Pending,
        };
        tables.orders.insert(created.id, created.clone());
        Ok(Some(created))
    }

    async fn order_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        Ok(self.tables.read().await.orders.values().cloned().collect())
    }

    async fn orders_of(&self, account_id: Uuid) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .filter(|order| order.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn update_order(&self, id: Uuid, changes: OrderChanges) -> Result<Option<Order>> {
        let mut tables = self.tables.write().await;
        let Some(product_id) = tables.orders.get(&id).map(|order| order.product_id) else {
            return Ok(None);
        };
        let price_cents = tables
            .products
            .get(&product_id)
            .map(|product| product.price_cents)
            .context("order references a missing product")?;
        let Some(order) = tables.orders.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(quantity) = changes.quantity {
            order.total_cents = total(price_cents, quantity)?;
            order.quantity = quantity;
        }
        if let Some(status) = changes.status {
            order.status = status;
        }
        Ok(Some(order.clone()))
    }

    async fn delete_order(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.orders.remove(&id).is_some())
    }
}
