//! # Meridian Trading
//!
//! The order lifecycle service. It validates orders, hands them to the
//! broker, tracks every order it has seen in an in-memory cache, and
//! publishes lifecycle events on the shared bus. All state changes go
//! through the legal transition table in `core-types`, so a stale or
//! out-of-order broker read can never rewind an order.

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use broker_client::{BrokerClient, BrokerOrder};
use chrono::Utc;
use core_types::{Order, OrderStatus};
use events::{EventBus, OrderRejection, TradingEvent};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

// Re-export the core types to provide a clean public API.
pub use error::TradingError;

/// Owns the order cache and the broker connection for order flow.
///
/// The cache holds every order ever submitted through this service,
/// terminal or not. Terminal orders are served straight from the cache and
/// never re-queried; open orders are refreshed from the broker on read.
pub struct TradingService {
    broker: Arc<dyn BrokerClient>,
    events: EventBus,
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl TradingService {
    pub fn new(broker: Arc<dyn BrokerClient>, events: EventBus) -> Self {
        Self {
            broker,
            events,
            orders: Mutex::new(HashMap::new()),
        }
    }

    /// Validates and submits an order to the broker.
    ///
    /// On acceptance the order is cached and an `OrderSubmitted` event is
    /// published. On a broker failure the order is cached as `Rejected`, an
    /// `OrderRejected` event is published, and the error is returned to the
    /// caller. Validation failures never reach the broker and leave no
    /// trace in the cache.
    pub async fn submit_order(&self, mut order: Order) -> Result<Order, TradingError> {
        order.validate()?;

        let mut orders = self.orders.lock().await;
        order.status = OrderStatus::Submitted;
        order.updated_at = Utc::now();

        match self.broker.submit_order(&order).await {
            Ok(ack) => {
                order.broker_order_id = Some(ack.broker_order_id.clone());
                apply_remote(&mut order, &ack);
                orders.insert(order.order_id, order.clone());
                info!(
                    order_id = %order.order_id,
                    symbol = %order.symbol,
                    side = ?order.side,
                    quantity = %order.quantity,
                    "Order submitted"
                );
                self.events.publish(TradingEvent::OrderSubmitted(order.clone()));
                Ok(order)
            }
            Err(e) => {
                order.status = OrderStatus::Rejected;
                order.updated_at = Utc::now();
                orders.insert(order.order_id, order.clone());
                error!(order_id = %order.order_id, error = %e, "Order submission failed");
                self.events.publish(TradingEvent::OrderRejected(OrderRejection {
                    order,
                    reason: e.to_string(),
                }));
                Err(TradingError::Broker(e))
            }
        }
    }

    /// Requests cancellation of a working order.
    ///
    /// Returns `false` for unknown orders, orders already in a terminal
    /// state, and orders the broker refuses to cancel. A transport failure
    /// is logged and also reported as `false`; the order stays working.
    pub async fn cancel_order(&self, order_id: Uuid) -> bool {
        let mut orders = self.orders.lock().await;
        let Some(order) = orders.get_mut(&order_id) else {
            return false;
        };
        if order.status.is_terminal() {
            return false;
        }
        let Some(broker_order_id) = order.broker_order_id.clone() else {
            warn!(%order_id, "Cannot cancel an order that never reached the broker");
            return false;
        };

        match self.broker.cancel_order(&broker_order_id).await {
            Ok(true) => {
                order.status = OrderStatus::Cancelled;
                order.updated_at = Utc::now();
                let cancelled = order.clone();
                info!(%order_id, "Order cancelled");
                self.events.publish(TradingEvent::OrderCancelled(cancelled));
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(%order_id, error = %e, "Cancel request failed");
                false
            }
        }
    }

    /// Returns the current state of an order.
    ///
    /// Terminal orders come straight from the cache. Open orders are
    /// refreshed from the broker first; if the refresh fails the last known
    /// state is returned. Orders missing from the cache are looked up at
    /// the broker by client order id, which recovers orders submitted by a
    /// previous run of the process.
    pub async fn get_order_status(&self, order_id: Uuid) -> Option<Order> {
        let mut orders = self.orders.lock().await;

        if let Some(order) = orders.get_mut(&order_id) {
            if order.status.is_terminal() {
                return Some(order.clone());
            }
            self.refresh_order(order).await;
            return Some(order.clone());
        }

        match self.broker.get_order_by_client_id(order_id).await {
            Ok(Some(remote)) => {
                let order = rebuild_from_remote(order_id, &remote);
                orders.insert(order_id, order.clone());
                Some(order)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(%order_id, error = %e, "Order lookup failed");
                None
            }
        }
    }

    /// Returns every order still working at the broker, refreshing each one
    /// first so fills observed since the last call drop out of the list.
    pub async fn get_open_orders(&self) -> Vec<Order> {
        let mut orders = self.orders.lock().await;
        let open_ids: Vec<Uuid> = orders
            .values()
            .filter(|o| o.status.is_open())
            .map(|o| o.order_id)
            .collect();

        let mut open = Vec::new();
        for id in open_ids {
            if let Some(order) = orders.get_mut(&id) {
                self.refresh_order(order).await;
                if order.status.is_open() {
                    open.push(order.clone());
                }
            }
        }
        open
    }

    async fn refresh_order(&self, order: &mut Order) {
        let Some(broker_order_id) = order.broker_order_id.clone() else {
            return;
        };
        match self.broker.get_order(&broker_order_id).await {
            Ok(Some(remote)) => apply_remote(order, &remote),
            Ok(None) => {
                warn!(order_id = %order.order_id, "Broker no longer knows this order");
            }
            Err(e) => {
                // Keep serving the last known state.
                warn!(order_id = %order.order_id, error = %e, "Order refresh failed");
            }
        }
    }
}

/// Applies the broker's view of an order onto ours, honoring the legal
/// transition table. An illegal transition is logged and discarded wholesale
/// so fill numbers cannot regress either.
fn apply_remote(order: &mut Order, remote: &BrokerOrder) {
    if remote.status != order.status && !order.status.can_transition_to(remote.status) {
        warn!(
            order_id = %order.order_id,
            from = ?order.status,
            to = ?remote.status,
            "Ignoring illegal order state transition reported by the broker"
        );
        return;
    }
    order.status = remote.status;
    order.filled_quantity = remote.filled_quantity;
    order.filled_avg_price = remote.filled_avg_price;
    order.updated_at = Utc::now();
}

/// Reconstructs a cached order from the broker's record, for orders this
/// process has never seen.
fn rebuild_from_remote(order_id: Uuid, remote: &BrokerOrder) -> Order {
    let now = Utc::now();
    Order {
        order_id,
        symbol: remote.symbol.clone(),
        side: remote.side,
        order_type: remote.order_type,
        quantity: remote.quantity,
        limit_price: remote.limit_price,
        status: remote.status,
        broker_order_id: Some(remote.broker_order_id.clone()),
        filled_quantity: remote.filled_quantity,
        filled_avg_price: remote.filled_avg_price,
        created_at: remote.submitted_at.unwrap_or(now),
        updated_at: now,
    }
}
