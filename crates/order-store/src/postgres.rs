use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use common::{OrderId, ProductId, UserId};
use domain::{LineItem, Money, NewOrder, Order, OrderStatus, StockReservation};

use crate::{
    Result, StoreError,
    store::{OrderStore, StockLevels, default_reservation_ttl},
};

const ORDER_COLUMNS: &str = "id, user_id, total_cents, status, stock_committed, created_at";

/// PostgreSQL-backed order store implementation.
///
/// Reservations for a product are serialized with a transaction-scoped
/// advisory lock keyed by the product id. Locks are always taken in
/// ascending product order so two multi-line orders cannot deadlock.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
    reservation_ttl: Duration,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            reservation_ttl: default_reservation_ttl(),
        }
    }

    /// Sets how long a reservation counts against available stock.
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn ttl_secs(ttl: Duration) -> f64 {
        ttl.num_milliseconds() as f64 / 1000.0
    }

    async fn reserved_quantity(
        tx: &mut Transaction<'_, Postgres>,
        product_id: ProductId,
        ttl: Duration,
    ) -> Result<i64> {
        let reserved: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM reserved_stock
            WHERE product_id = $1 AND created_at > NOW() - make_interval(secs => $2)
            "#,
        )
        .bind(product_id.as_i64())
        .bind(Self::ttl_secs(ttl))
        .fetch_one(&mut **tx)
        .await?;

        Ok(reserved)
    }

    async fn load_items(&self, order_ids: &[i64]) -> Result<HashMap<i64, Vec<LineItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, name, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<i64, Vec<LineItem>> = HashMap::new();
        for row in rows {
            let order_id: i64 = row.try_get("order_id")?;
            items
                .entry(order_id)
                .or_default()
                .push(Self::row_to_item(&row)?);
        }
        Ok(items)
    }

    fn row_to_item(row: &PgRow) -> Result<LineItem> {
        Ok(LineItem {
            product_id: ProductId::new(row.try_get("product_id")?),
            product_name: row.try_get("name")?,
            quantity: decode_quantity(row.try_get("quantity")?)?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        })
    }

    fn row_to_order(row: &PgRow, items: Vec<LineItem>) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            items,
            total_price: Money::from_cents(row.try_get("total_cents")?),
            status,
            created_at: row.try_get("created_at")?,
            stock_committed: row.try_get("stock_committed")?,
        })
    }

    fn row_to_reservation(row: &PgRow) -> Result<StockReservation> {
        Ok(StockReservation {
            order_id: OrderId::new(row.try_get("order_id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: decode_quantity(row.try_get("quantity")?)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn decode_quantity(raw: i32) -> Result<u32> {
    u32::try_from(raw).map_err(|_| StoreError::Decode(format!("negative quantity {raw}")))
}

fn encode_quantity(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::Decode(format!("quantity {quantity} out of range")))
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create(&self, order: NewOrder, stock_levels: &StockLevels) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let mut product_ids: Vec<ProductId> = order.items.iter().map(|i| i.product_id).collect();
        product_ids.sort();
        product_ids.dedup();
        for product_id in &product_ids {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(product_id.as_i64())
                .execute(&mut *tx)
                .await?;
        }

        for item in &order.items {
            let raw = stock_levels.get(&item.product_id).copied().unwrap_or(0);
            let reserved = Self::reserved_quantity(&mut tx, item.product_id, self.reservation_ttl)
                .await?;
            let available = i64::from(raw) - reserved;
            if available < i64::from(item.quantity) {
                tracing::debug!(
                    product_id = %item.product_id,
                    requested = item.quantity,
                    available,
                    "reservation rejected"
                );
                return Err(StoreError::InsufficientStock {
                    product_id: item.product_id,
                    requested: item.quantity,
                    available,
                });
            }
        }

        let row = sqlx::query(
            r#"
            INSERT INTO orders (user_id, total_cents, status)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            "#,
        )
        .bind(order.user_id.as_i64())
        .bind(order.total_price.cents())
        .bind(OrderStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let id = OrderId::new(row.try_get("id")?);
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, name, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id.as_i64())
            .bind(position as i32)
            .bind(item.product_id.as_i64())
            .bind(&item.product_name)
            .bind(encode_quantity(item.quantity)?)
            .bind(item.unit_price.cents())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO reserved_stock (order_id, product_id, quantity, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(id.as_i64())
            .bind(item.product_id.as_i64())
            .bind(encode_quantity(item.quantity)?)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Order {
            id,
            user_id: order.user_id,
            items: order.items,
            total_price: order.total_price,
            status: OrderStatus::Pending,
            created_at,
            stock_committed: false,
        })
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut items = self.load_items(&[id.as_i64()]).await?;
        let items = items.remove(&id.as_i64()).unwrap_or_default();
        Self::row_to_order(&row, items).map(Some)
    }

    async fn get_by_user_id(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at, id"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.load_items(&ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }

    async fn update_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE orders SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id.as_i64())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;

        if updated && to == OrderStatus::Canceled {
            sqlx::query("DELETE FROM reserved_stock WHERE order_id = $1")
                .bind(id.as_i64())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let canceled = sqlx::query(
            r#"
            UPDATE orders SET status = $3
            WHERE id = $1 AND user_id = $2 AND status <> $3
            "#,
        )
        .bind(order_id.as_i64())
        .bind(user_id.as_i64())
        .bind(OrderStatus::Canceled.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if canceled {
            sqlx::query("DELETE FROM reserved_stock WHERE order_id = $1")
                .bind(order_id.as_i64())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(canceled)
    }

    async fn delete(&self, id: OrderId) -> Result<bool> {
        // Items and reservations go with the order through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn available_stock(&self, product_id: ProductId, raw_stock: u32) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let reserved = Self::reserved_quantity(&mut tx, product_id, self.reservation_ttl).await?;
        tx.commit().await?;

        Ok(i64::from(raw_stock) - reserved)
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<StockReservation>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, created_at
            FROM reserved_stock
            WHERE order_id = $1
            ORDER BY id
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_reservation).collect()
    }

    async fn claim_stock_commit(&self, order_id: OrderId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET stock_committed = TRUE \
             WHERE id = $1 AND NOT stock_committed AND status <> 'canceled'",
        )
        .bind(order_id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revert_stock_commit(&self, order_id: OrderId) -> Result<()> {
        sqlx::query("UPDATE orders SET stock_committed = FALSE WHERE id = $1")
            .bind(order_id.as_i64())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn consume_reservations(&self, order_id: OrderId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reserved_stock WHERE order_id = $1")
            .bind(order_id.as_i64())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn clear_expired_reservations(&self, ttl: Duration) -> Result<Vec<OrderId>> {
        let order_ids: Vec<i64> = sqlx::query_scalar(
            r#"
            DELETE FROM reserved_stock
            WHERE created_at <= NOW() - make_interval(secs => $1)
            RETURNING order_id
            "#,
        )
        .bind(Self::ttl_secs(ttl))
        .fetch_all(&self.pool)
        .await?;

        let affected: BTreeSet<i64> = order_ids.into_iter().collect();
        Ok(affected.into_iter().map(OrderId::new).collect())
    }
}
