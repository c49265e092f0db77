use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{OrderSide, OrderStatus, OrderType, PositionSide};
use crate::error::CoreError;

/// A request to buy or sell a quantity of a symbol, tracked through the
/// broker-side lifecycle described by [`OrderStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// The limit price. `None` for market orders.
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    /// The id assigned by the broker once the order has been accepted.
    pub broker_order_id: Option<String>,
    pub filled_quantity: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new market order in the `Pending` state.
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        let now = Utc::now();
        Self {
            order_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            status: OrderStatus::Pending,
            broker_order_id: None,
            filled_quantity: Decimal::ZERO,
            filled_avg_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a new limit order in the `Pending` state.
    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, limit_price: Decimal) -> Self {
        let mut order = Self::market(symbol, side, quantity);
        order.order_type = OrderType::Limit;
        order.limit_price = Some(limit_price);
        order
    }

    /// Checks that the order is well-formed enough to be sent to a broker.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.symbol.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "symbol".to_string(),
                "must not be empty".to_string(),
            ));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "quantity".to_string(),
                format!("must be positive, got {}", self.quantity),
            ));
        }
        Ok(())
    }
}

/// An open directional holding in a symbol with an entry price and optional
/// risk thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    /// Always stored positive; `side` carries the directionality.
    pub quantity: Decimal,
    pub entry_price: Decimal,
    /// The last marked price seen for this symbol. `None` until the first
    /// tick arrives.
    pub current_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Name of the strategy whose signal opened this position.
    pub strategy: String,
    /// Confidence score carried over from the entry signal.
    pub confidence: Decimal,
    pub entry_order_id: Uuid,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Unrealized profit in the position's direction at the last known
    /// price. Zero before the first tick.
    pub fn unrealized_pnl(&self) -> Decimal {
        let Some(current) = self.current_price else {
            return Decimal::ZERO;
        };
        let pnl_per_unit = match self.side {
            PositionSide::Long => current - self.entry_price,
            PositionSide::Short => self.entry_price - current,
        };
        pnl_per_unit * self.quantity
    }

    /// The value this position contributes to account equity: entry value
    /// plus directional unrealized PnL at the last known price.
    pub fn market_value(&self) -> Decimal {
        self.entry_price * self.quantity + self.unrealized_pnl()
    }
}

/// The realized record of a completed round-trip (open + close) in a
/// position. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub strategy: String,
    pub net_pnl: Decimal,
    /// Net PnL as a percentage of the entry value.
    pub return_pct: Decimal,
    /// Why the position was closed, e.g. "stop loss".
    pub exit_reason: String,
}

/// An externally produced directional trading recommendation. Signals are
/// consumed by this system, never generated by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: PositionSide,
    /// The price the producer saw when generating the signal; becomes the
    /// position's entry price.
    pub price: Decimal,
    /// Producer confidence in [0, 1].
    pub confidence: Decimal,
    pub strategy: String,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    /// Checks that the signal is actionable: priced, on a real symbol, with
    /// a sane confidence score.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.symbol.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "symbol".to_string(),
                "must not be empty".to_string(),
            ));
        }
        if self.price <= Decimal::ZERO {
            return Err(CoreError::InvalidInput(
                "price".to_string(),
                format!("must be positive, got {}", self.price),
            ));
        }
        if self.confidence < Decimal::ZERO || self.confidence > Decimal::ONE {
            return Err(CoreError::InvalidInput(
                "confidence".to_string(),
                format!("must be within [0, 1], got {}", self.confidence),
            ));
        }
        Ok(())
    }
}

/// A bid/ask snapshot for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// The midpoint price, used to mark open positions.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / dec!(2)
    }
}
