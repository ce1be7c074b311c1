use crate::error::{EngineError, Result};
use crate::types::{Order, OrderStatus};
use async_trait::async_trait;
use engage_types::{OrderId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Persisted orders. `remaining_count` has no direct setter; it only moves
/// through `decrement_remaining`, which the engine couples to the
/// verification and refund paths.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<()>;
    async fn get(&self, order_id: OrderId) -> Result<Order>;

    /// Enforces the order state machine; anything but
    /// `active -> completed | cancelled` fails with `IllegalTransition`.
    async fn update_status(&self, order_id: OrderId, new_status: OrderStatus) -> Result<()>;

    /// Atomic decrement; returns the new remaining count and refuses to go
    /// below zero.
    async fn decrement_remaining(&self, order_id: OrderId) -> Result<u32>;

    async fn request_cancel(&self, order_id: OrderId) -> Result<()>;

    async fn list_active_owned_by(&self, user: UserId) -> Result<Vec<Order>>;
    async fn list_active_not_owned_by(&self, user: UserId) -> Result<Vec<Order>>;
}

pub struct MemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        debug!(
            order_id = %order.id,
            owner = %order.owner,
            kind = %order.kind,
            target_count = order.target_count,
            "Order stored"
        );
        orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Order> {
        let orders = self.orders.read().await;
        orders
            .get(&order_id)
            .cloned()
            .ok_or(EngineError::OrderNotFound(order_id))
    }

    async fn update_status(&self, order_id: OrderId, new_status: OrderStatus) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;

        let allowed = matches!(
            (order.status, new_status),
            (OrderStatus::Active, OrderStatus::Completed)
                | (OrderStatus::Active, OrderStatus::Cancelled)
        );
        if !allowed {
            return Err(EngineError::IllegalTransition {
                from: order.status.to_string(),
                to: new_status.to_string(),
            });
        }

        order.status = new_status;
        info!(order_id = %order_id, status = %new_status, "📦 Order status updated");
        Ok(())
    }

    async fn decrement_remaining(&self, order_id: OrderId) -> Result<u32> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;

        if order.remaining_count == 0 {
            return Err(EngineError::WrongState {
                expected: "remaining_count > 0".to_string(),
                actual: "0".to_string(),
            });
        }

        order.remaining_count -= 1;
        Ok(order.remaining_count)
    }

    async fn request_cancel(&self, order_id: OrderId) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;
        order.cancel_requested = true;
        Ok(())
    }

    async fn list_active_owned_by(&self, user: UserId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|order| order.status == OrderStatus::Active && order.owner == user)
            .cloned()
            .collect())
    }

    async fn list_active_not_owned_by(&self, user: UserId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|order| order.status == OrderStatus::Active && order.owner != user)
            .cloned()
            .collect())
    }
}
