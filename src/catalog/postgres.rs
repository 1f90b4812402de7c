//! Postgres-backed catalog sharing the identity store's pool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{Catalog, NewOrder, NewProduct, Order, OrderChanges, Product, Removal};
use crate::rbac::store::db_span;

const PRODUCT_COLUMNS: &str = "id, name, description, price_cents, category";
const ORDER_COLUMNS: &str = "id, account_id, product_id, quantity, total_cents, status";

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23503"),
        _ => false,
    }
}

fn product_from_row(row: &PgRow) -> Product {
    Product {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        price_cents: row.get("price_cents"),
        category: row.get("category"),
    }
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let status: String = row.get("status");
    Ok(Order {
        id: row.get("id"),
        account_id: row.get("account_id"),
        product_id: row.get("product_id"),
        quantity: row.get("quantity"),
        total_cents: row.get("total_cents"),
        status: status.parse().map_err(anyhow::Error::msg)?,
    })
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let query = format!(
            "INSERT INTO products (name, description, price_cents, category) \
             VALUES ($1, $2, $3, $4) RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price_cents)
            .bind(&product.category)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert product")?;
        Ok(product_from_row(&row))
    }

    async fn product_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        let query = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup product")?;
        Ok(row.as_ref().map(product_from_row))
    }

    async fn products(&self) -> Result<Vec<Product>> {
        let query = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY name");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list products")?;
        Ok(rows.iter().map(product_from_row).collect())
    }

    async fn update_product(&self, id: Uuid, product: NewProduct) -> Result<Option<Product>> {
        let query = format!(
            "UPDATE products SET name = $2, description = $3, price_cents = $4, category = $5 \
             WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price_cents)
            .bind(&product.category)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update product")?;
        Ok(row.as_ref().map(product_from_row))
    }

    async fn delete_product(&self, id: Uuid) -> Result<Removal> {
        let query = "DELETE FROM products WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await;
        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(Removal::Removed),
            Ok(_) => Ok(Removal::NotFound),
            Err(err) if is_foreign_key_violation(&err) => Ok(Removal::InUse),
            Err(err) => Err(err).context("failed to delete product"),
        }
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Option<Order>> {
        // Priced in the same statement that checks the product exists.
        let query = format!(
            "INSERT INTO orders (account_id, product_id, quantity, total_cents) \
             SELECT $1, p.id, $3::INTEGER, p.price_cents * $3::INTEGER \
             FROM products p WHERE p.id = $2 \
             RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(order.account_id)
            .bind(order.product_id)
            .bind(order.quantity)
            .fetch_optional(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert order")?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup order")?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list orders")?;
        rows.iter().map(order_from_row).collect()
    }

    async fn orders_of(&self, account_id: Uuid) -> Result<Vec<Order>> {
        let query =
            format!("SELECT {ORDER_COLUMNS} FROM orders WHERE account_id = $1 ORDER BY created_at");
        let rows = sqlx::query(&query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list account orders")?;
        rows.iter().map(order_from_row).collect()
    }

    async fn update_order(&self, id: Uuid, changes: OrderChanges) -> Result<Option<Order>> {
        let query = r"
            UPDATE orders o SET
                quantity = COALESCE($2::INTEGER, o.quantity),
                total_cents = CASE
                    WHEN $2::INTEGER IS NULL THEN o.total_cents
                    ELSE p.price_cents * $2::INTEGER
                END,
                status = COALESCE($3::TEXT, o.status)
            FROM products p
            WHERE o.id = $1 AND p.id = o.product_id
            RETURNING o.id, o.account_id, o.product_id, o.quantity, o.total_cents, o.status
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(changes.quantity)
            .bind(changes.status.map(|status| status.as_str()))
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update order")?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn delete_order(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM orders WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete order")?;
        Ok(result.rows_affected() == 1)
    }
}
