//! A simulated brokerage for offline runs and tests.

use crate::error::BrokerError;
use crate::responses::{AccountInfo, BrokerOrder, BrokerPosition};
use crate::BrokerClient;
use async_trait::async_trait;
use chrono::Utc;
use core_types::{Order, OrderSide, OrderStatus, OrderType, PositionSide, Quote};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// An in-memory venue that fills every accepted order instantly.
///
/// Market orders fill at the seeded quote (ask for buys, bid for sells) and
/// limit orders at their limit price. Fills settle into cash and the position
/// book before `submit_order` returns, so account reads always reflect the
/// orders placed so far. Orders for symbols without a quote are rejected, as
/// are buys the cash balance cannot cover.
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

#[derive(Debug)]
struct PaperState {
    cash: Decimal,
    orders: HashMap<String, BrokerOrder>,
    positions: HashMap<String, BrokerPosition>,
    quotes: HashMap<String, Quote>,
    next_order_seq: u64,
}

impl PaperBroker {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                cash: starting_cash,
                orders: HashMap::new(),
                positions: HashMap::new(),
                quotes: HashMap::new(),
                next_order_seq: 1,
            }),
        }
    }

    /// Sets the tradeable market for a symbol.
    pub async fn seed_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        let mut state = self.state.lock().await;
        state.quotes.insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                bid,
                ask,
                timestamp: Utc::now(),
            },
        );
    }
}

impl PaperState {
    /// A copy of the position marked at the current quote, when one exists.
    fn marked(&self, position: &BrokerPosition) -> BrokerPosition {
        let mut marked = position.clone();
        if let Some(quote) = self.quotes.get(&position.symbol) {
            let mid = quote.mid();
            let pnl_per_unit = match position.side {
                PositionSide::Long => mid - position.avg_entry_price,
                PositionSide::Short => position.avg_entry_price - mid,
            };
            let entry_value = position.avg_entry_price * position.quantity;
            marked.unrealized_pl = Some(pnl_per_unit * position.quantity);
            marked.market_value = Some(entry_value + pnl_per_unit * position.quantity);
        }
        marked
    }

    fn equity(&self) -> Decimal {
        let positions_value: Decimal = self
            .positions
            .values()
            .map(|p| {
                self.marked(p)
                    .market_value
                    .unwrap_or(p.avg_entry_price * p.quantity)
            })
            .sum();
        self.cash + positions_value
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn submit_order(&self, order: &Order) -> Result<BrokerOrder, BrokerError> {
        let mut state = self.state.lock().await;

        let fill_price = match order.order_type {
            OrderType::Limit => match order.limit_price {
                Some(price) => price,
                None => {
                    return Err(BrokerError::Rejected(
                        "limit order without a limit price".to_string(),
                    ));
                }
            },
            OrderType::Market => {
                let Some(quote) = state.quotes.get(&order.symbol) else {
                    return Err(BrokerError::Rejected(format!(
                        "no market for {}",
                        order.symbol
                    )));
                };
                match order.side {
                    OrderSide::Buy => quote.ask,
                    OrderSide::Sell => quote.bid,
                }
            }
        };

        let cost = fill_price * order.quantity;
        if order.side == OrderSide::Buy && cost > state.cash {
            return Err(BrokerError::Rejected(format!(
                "insufficient buying power: need {cost}, have {}",
                state.cash
            )));
        }

        match order.side {
            OrderSide::Buy => state.cash -= cost,
            OrderSide::Sell => state.cash += cost,
        }
        apply_fill(
            &mut state.positions,
            &order.symbol,
            order.side,
            order.quantity,
            fill_price,
        );

        let broker_order_id = format!("paper-{}", state.next_order_seq);
        state.next_order_seq += 1;

        let ack = BrokerOrder {
            broker_order_id: broker_order_id.clone(),
            client_order_id: Some(order.order_id),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            filled_quantity: order.quantity,
            filled_avg_price: Some(fill_price),
            limit_price: order.limit_price,
            status: OrderStatus::Filled,
            submitted_at: Some(Utc::now()),
        };
        state.orders.insert(broker_order_id, ack.clone());
        Ok(ack)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get_mut(broker_order_id) else {
            return Ok(false);
        };
        if order.status.is_terminal() {
            return Ok(false);
        }
        order.status = OrderStatus::Cancelled;
        Ok(true)
    }

    async fn get_order(&self, broker_order_id: &str) -> Result<Option<BrokerOrder>, BrokerError> {
        let state = self.state.lock().await;
        Ok(state.orders.get(broker_order_id).cloned())
    }

    async fn get_order_by_client_id(
        &self,
        client_order_id: Uuid,
    ) -> Result<Option<BrokerOrder>, BrokerError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.client_order_id == Some(client_order_id))
            .cloned())
    }

    async fn get_account(&self) -> Result<AccountInfo, BrokerError> {
        let state = self.state.lock().await;
        Ok(AccountInfo {
            cash: state.cash,
            equity: state.equity(),
            buying_power: state.cash,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let state = self.state.lock().await;
        Ok(state.positions.values().map(|p| state.marked(p)).collect())
    }

    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>, BrokerError> {
        let state = self.state.lock().await;
        Ok(state.quotes.get(symbol).cloned())
    }
}

/// Applies a fill to the position book. Same-side fills extend the position
/// at a blended entry price; opposite-side fills reduce, close, or flip it.
fn apply_fill(
    positions: &mut HashMap<String, BrokerPosition>,
    symbol: &str,
    side: OrderSide,
    quantity: Decimal,
    price: Decimal,
) {
    let fill_side = match side {
        OrderSide::Buy => PositionSide::Long,
        OrderSide::Sell => PositionSide::Short,
    };

    let Some(position) = positions.get_mut(symbol) else {
        positions.insert(
            symbol.to_string(),
            BrokerPosition {
                symbol: symbol.to_string(),
                side: fill_side,
                quantity,
                avg_entry_price: price,
                market_value: None,
                unrealized_pl: None,
            },
        );
        return;
    };

    if position.side == fill_side {
        let existing_value = position.avg_entry_price * position.quantity;
        let total_quantity = position.quantity + quantity;
        position.avg_entry_price = (existing_value + price * quantity) / total_quantity;
        position.quantity = total_quantity;
    } else if quantity < position.quantity {
        position.quantity -= quantity;
    } else if quantity == position.quantity {
        positions.remove(symbol);
    } else {
        // The excess becomes a fresh position on the other side.
        position.side = fill_side;
        position.quantity = quantity - position.quantity;
        position.avg_entry_price = price;
    }
}
