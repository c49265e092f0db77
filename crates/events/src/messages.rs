use core_types::{Order, Position, Trade};
use serde::{Deserialize, Serialize};

/// Payload for an order submission the broker refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRejection {
    pub order: Order,
    pub reason: String,
}

/// Payload for a position close: the final state of the position plus the
/// reason it was closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionCloseout {
    pub position: Position,
    pub reason: String,
}

/// The top-level event enum. Everything the trading core tells the outside
/// world is one of these variants.
///
/// The `#[serde(tag = "type", content = "payload")]` attribute is a powerful
/// `serde` feature. It serializes the enum into a clean JSON object that is
/// easy for any consumer to dispatch on. For example, an `OrderSubmitted`
/// event looks like:
/// `{
///   "type": "order_submitted",
///   "payload": {
///     "order_id": "...",
///     "symbol": "AAPL",
///     ...
///   }
/// }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TradingEvent {
    /// An order was accepted by the broker and entered the cache.
    OrderSubmitted(Order),
    /// The broker refused an order submission.
    OrderRejected(OrderRejection),
    /// A working order was cancelled at the caller's request.
    OrderCancelled(Order),
    /// A position was opened against an accepted entry order.
    PositionOpened(Position),
    /// A position was removed from the active set.
    PositionClosed(PositionCloseout),
    /// A position was marked at a fresh price.
    PositionUpdated(Position),
    /// The realized result of a closed position.
    TradeCompleted(Trade),
}
