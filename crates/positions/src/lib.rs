//! # Meridian Positions
//!
//! The position book. Positions are opened from signals, marked to market
//! with quote updates, and closed into immutable `Trade` records. Every
//! entry and exit goes through the trading service, so the position book
//! can never disagree with the orders actually sent to the broker.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use core_types::{Order, Position, PositionSide, Signal, Trade};
use events::{EventBus, PositionCloseout, TradingEvent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use trading::TradingService;
use uuid::Uuid;

/// Owns the book of open positions.
pub struct PositionManager {
    trading: Arc<TradingService>,
    events: EventBus,
    positions: Mutex<HashMap<Uuid, Position>>,
}

impl PositionManager {
    pub fn new(trading: Arc<TradingService>, events: EventBus) -> Self {
        Self {
            trading,
            events,
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a position by submitting the signal's entry order.
    ///
    /// Returns `None` without touching the broker when the quantity is not
    /// positive or the signal fails validation, and `None` when the entry
    /// order is rejected. A position only ever exists for an accepted order.
    pub async fn open_position(&self, signal: &Signal, quantity: Decimal) -> Option<Position> {
        if quantity <= Decimal::ZERO {
            warn!(
                symbol = %signal.symbol,
                %quantity,
                "Refusing to open a position with a non-positive quantity"
            );
            return None;
        }
        if let Err(e) = signal.validate() {
            warn!(symbol = %signal.symbol, error = %e, "Refusing to act on an invalid signal");
            return None;
        }

        let order = Order::market(&signal.symbol, signal.direction.entry_order_side(), quantity);

        let mut positions = self.positions.lock().await;
        let accepted = match self.trading.submit_order(order).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(symbol = %signal.symbol, error = %e, "Entry order failed; no position opened");
                return None;
            }
        };

        let now = Utc::now();
        let position = Position {
            position_id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            side: signal.direction,
            quantity,
            entry_price: signal.price,
            current_price: None,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            strategy: signal.strategy.clone(),
            confidence: signal.confidence,
            entry_order_id: accepted.order_id,
            opened_at: now,
            updated_at: now,
        };
        positions.insert(position.position_id, position.clone());
        info!(
            position_id = %position.position_id,
            symbol = %position.symbol,
            side = ?position.side,
            %quantity,
            "Position opened"
        );
        self.events
            .publish(TradingEvent::PositionOpened(position.clone()));
        Some(position)
    }

    /// Closes a position by submitting the opposite-side exit order.
    ///
    /// On success the position leaves the book and the realized `Trade` is
    /// returned, priced at the last mark (or the entry price when the
    /// position was never marked). If the exit order is rejected the
    /// position stays in the book untouched and `None` is returned.
    pub async fn close_position(&self, position_id: Uuid, reason: &str) -> Option<Trade> {
        let mut positions = self.positions.lock().await;
        let Some(position) = positions.get(&position_id) else {
            warn!(%position_id, "Cannot close an unknown position");
            return None;
        };

        let order = Order::market(
            &position.symbol,
            position.side.exit_order_side(),
            position.quantity,
        );
        if let Err(e) = self.trading.submit_order(order).await {
            error!(%position_id, error = %e, "Exit order failed; position retained");
            return None;
        }

        // The exit is on its way: the position leaves the book now.
        let position = positions.remove(&position_id)?;

        let exit_price = position.current_price.unwrap_or(position.entry_price);
        let pnl_per_unit = match position.side {
            PositionSide::Long => exit_price - position.entry_price,
            PositionSide::Short => position.entry_price - exit_price,
        };
        let net_pnl = pnl_per_unit * position.quantity;
        let entry_value = position.entry_price * position.quantity;
        let return_pct = if entry_value.is_zero() {
            Decimal::ZERO
        } else {
            net_pnl / entry_value * dec!(100)
        };

        let trade = Trade {
            trade_id: Uuid::new_v4(),
            symbol: position.symbol.clone(),
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.opened_at,
            exit_time: Utc::now(),
            strategy: position.strategy.clone(),
            net_pnl,
            return_pct,
            exit_reason: reason.to_string(),
        };

        info!(
            %position_id,
            symbol = %trade.symbol,
            net_pnl = %trade.net_pnl,
            reason,
            "Position closed"
        );
        self.events
            .publish(TradingEvent::PositionClosed(PositionCloseout {
                position,
                reason: reason.to_string(),
            }));
        self.events
            .publish(TradingEvent::TradeCompleted(trade.clone()));
        Some(trade)
    }

    /// Marks a position at a new price. Returns the updated position, or
    /// `None` when the id is unknown.
    pub async fn update_position_prices(
        &self,
        position_id: Uuid,
        price: Decimal,
    ) -> Option<Position> {
        let mut positions = self.positions.lock().await;
        let position = positions.get_mut(&position_id)?;
        position.current_price = Some(price);
        position.updated_at = Utc::now();
        let updated = position.clone();
        self.events
            .publish(TradingEvent::PositionUpdated(updated.clone()));
        Some(updated)
    }

    /// True when the mark has crossed the stop. A position with no stop or
    /// no mark never triggers.
    pub fn check_stop_loss(&self, position: &Position) -> bool {
        let (Some(current), Some(stop)) = (position.current_price, position.stop_loss) else {
            return false;
        };
        match position.side {
            PositionSide::Long => current <= stop,
            PositionSide::Short => current >= stop,
        }
    }

    /// True when the mark has reached the target. A position with no target
    /// or no mark never triggers.
    pub fn check_take_profit(&self, position: &Position) -> bool {
        let (Some(current), Some(target)) = (position.current_price, position.take_profit) else {
            return false;
        };
        match position.side {
            PositionSide::Long => current >= target,
            PositionSide::Short => current <= target,
        }
    }

    pub async fn get_position(&self, position_id: Uuid) -> Option<Position> {
        self.positions.lock().await.get(&position_id).cloned()
    }

    pub async fn get_positions_by_symbol(&self, symbol: &str) -> Vec<Position> {
        self.positions
            .lock()
            .await
            .values()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect()
    }

    pub async fn get_all_positions(&self) -> Vec<Position> {
        self.positions.lock().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker_client::{AccountInfo, BrokerClient, BrokerError, BrokerOrder, BrokerPosition};
    use core_types::{OrderStatus, Quote};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    /// Accepts the first `accept_limit` submissions and rejects the rest.
    struct CountingBroker {
        accept_limit: usize,
        submits: AtomicUsize,
    }

    impl CountingBroker {
        fn accepting() -> Self {
            Self {
                accept_limit: usize::MAX,
                submits: AtomicUsize::new(0),
            }
        }

        fn accepting_only(accept_limit: usize) -> Self {
            Self {
                accept_limit,
                submits: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BrokerClient for CountingBroker {
        async fn submit_order(&self, order: &Order) -> Result<BrokerOrder, BrokerError> {
            let seen = self.submits.fetch_add(1, Ordering::SeqCst);
            if seen >= self.accept_limit {
                return Err(BrokerError::Rejected(
                    "insufficient buying power".to_string(),
                ));
            }
            Ok(BrokerOrder {
                broker_order_id: format!("stub-{seen}"),
                client_order_id: Some(order.order_id),
                symbol: order.symbol.clone(),
                side: order.side,
                order_type: order.order_type,
                quantity: order.quantity,
                filled_quantity: order.quantity,
                filled_avg_price: None,
                limit_price: order.limit_price,
                status: OrderStatus::Filled,
                submitted_at: None,
            })
        }

        async fn cancel_order(&self, _broker_order_id: &str) -> Result<bool, BrokerError> {
            Ok(false)
        }

        async fn get_order(&self, _id: &str) -> Result<Option<BrokerOrder>, BrokerError> {
            Ok(None)
        }

        async fn get_order_by_client_id(
            &self,
            _client_order_id: Uuid,
        ) -> Result<Option<BrokerOrder>, BrokerError> {
            Ok(None)
        }

        async fn get_account(&self) -> Result<AccountInfo, BrokerError> {
            Ok(AccountInfo {
                cash: Decimal::ZERO,
                equity: Decimal::ZERO,
                buying_power: Decimal::ZERO,
            })
        }

        async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
            Ok(Vec::new())
        }

        async fn get_quote(&self, _symbol: &str) -> Result<Option<Quote>, BrokerError> {
            Ok(None)
        }
    }

    fn stack(broker: CountingBroker) -> (PositionManager, broadcast::Receiver<TradingEvent>) {
        let events = EventBus::new(32);
        let rx = events.subscribe();
        let trading = Arc::new(TradingService::new(Arc::new(broker), events.clone()));
        (PositionManager::new(trading, events), rx)
    }

    fn signal(direction: PositionSide) -> Signal {
        Signal {
            symbol: "AAPL".to_string(),
            direction,
            price: dec!(100),
            confidence: dec!(0.8),
            strategy: "momentum".to_string(),
            stop_loss: Some(dec!(95)),
            take_profit: Some(dec!(110)),
            generated_at: Utc::now(),
        }
    }

    fn position(
        side: PositionSide,
        current: Option<Decimal>,
        stop: Option<Decimal>,
        target: Option<Decimal>,
    ) -> Position {
        let now = Utc::now();
        Position {
            position_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            side,
            quantity: dec!(10),
            entry_price: dec!(100),
            current_price: current,
            stop_loss: stop,
            take_profit: target,
            strategy: "momentum".to_string(),
            confidence: dec!(0.8),
            entry_order_id: Uuid::new_v4(),
            opened_at: now,
            updated_at: now,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<TradingEvent>) -> Vec<TradingEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn opening_a_position_from_a_signal() {
        let (manager, mut rx) = stack(CountingBroker::accepting());

        let opened = manager
            .open_position(&signal(PositionSide::Long), dec!(10))
            .await
            .unwrap();

        assert_eq!(opened.symbol, "AAPL");
        assert_eq!(opened.side, PositionSide::Long);
        assert_eq!(opened.quantity, dec!(10));
        assert_eq!(opened.entry_price, dec!(100));
        assert_eq!(opened.stop_loss, Some(dec!(95)));
        assert_eq!(opened.take_profit, Some(dec!(110)));
        assert_eq!(opened.current_price, None);

        assert_eq!(manager.get_all_positions().await.len(), 1);
        let events = drain(&mut rx);
        assert!(events.iter().any(
            |e| matches!(e, TradingEvent::PositionOpened(p) if p.position_id == opened.position_id)
        ));

        // The position points back at the order that was actually accepted.
        let submitted = events.iter().find_map(|e| match e {
            TradingEvent::OrderSubmitted(o) => Some(o.order_id),
            _ => None,
        });
        assert_eq!(submitted, Some(opened.entry_order_id));
    }

    #[tokio::test]
    async fn non_positive_quantities_open_nothing() {
        let (manager, _rx) = stack(CountingBroker::accepting());
        assert!(manager
            .open_position(&signal(PositionSide::Long), dec!(0))
            .await
            .is_none());
        assert!(manager.get_all_positions().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_signals_open_nothing() {
        let broker = CountingBroker::accepting();
        let (manager, _rx) = stack(broker);

        let mut bad = signal(PositionSide::Long);
        bad.confidence = dec!(1.5);
        assert!(manager.open_position(&bad, dec!(10)).await.is_none());
        assert!(manager.get_all_positions().await.is_empty());
    }

    #[tokio::test]
    async fn a_rejected_entry_order_opens_nothing() {
        let (manager, mut rx) = stack(CountingBroker::accepting_only(0));

        assert!(manager
            .open_position(&signal(PositionSide::Long), dec!(10))
            .await
            .is_none());
        assert!(manager.get_all_positions().await.is_empty());

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, TradingEvent::OrderRejected(_))));
        assert!(!events.iter().any(|e| matches!(e, TradingEvent::PositionOpened(_))));
    }

    #[tokio::test]
    async fn closing_a_position_builds_the_trade() {
        let (manager, mut rx) = stack(CountingBroker::accepting());

        let opened = manager
            .open_position(&signal(PositionSide::Long), dec!(10))
            .await
            .unwrap();
        manager
            .update_position_prices(opened.position_id, dec!(105))
            .await
            .unwrap();

        let trade = manager
            .close_position(opened.position_id, "take profit")
            .await
            .unwrap();

        assert_eq!(trade.symbol, "AAPL");
        assert_eq!(trade.side, PositionSide::Long);
        assert_eq!(trade.quantity, dec!(10));
        assert_eq!(trade.entry_price, dec!(100));
        assert_eq!(trade.exit_price, dec!(105));
        assert_eq!(trade.net_pnl, dec!(50));
        assert_eq!(trade.return_pct, dec!(5));
        assert_eq!(trade.exit_reason, "take profit");
        assert!(trade.entry_time <= trade.exit_time);

        assert!(manager.get_position(opened.position_id).await.is_none());

        let events = drain(&mut rx);
        let closed_at = events
            .iter()
            .position(|e| matches!(e, TradingEvent::PositionClosed(_)))
            .unwrap();
        let completed_at = events
            .iter()
            .position(|e| matches!(e, TradingEvent::TradeCompleted(_)))
            .unwrap();
        assert!(closed_at < completed_at);
    }

    #[tokio::test]
    async fn closing_without_a_mark_uses_the_entry_price() {
        let (manager, _rx) = stack(CountingBroker::accepting());

        let opened = manager
            .open_position(&signal(PositionSide::Long), dec!(10))
            .await
            .unwrap();
        let trade = manager
            .close_position(opened.position_id, "manual")
            .await
            .unwrap();

        assert_eq!(trade.exit_price, dec!(100));
        assert_eq!(trade.net_pnl, dec!(0));
        assert_eq!(trade.return_pct, dec!(0));
    }

    #[tokio::test]
    async fn a_failed_exit_order_retains_the_position() {
        let (manager, mut rx) = stack(CountingBroker::accepting_only(1));

        let opened = manager
            .open_position(&signal(PositionSide::Long), dec!(10))
            .await
            .unwrap();
        assert!(manager
            .close_position(opened.position_id, "manual")
            .await
            .is_none());

        assert!(manager.get_position(opened.position_id).await.is_some());
        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, TradingEvent::PositionClosed(_))));
        assert!(!events.iter().any(|e| matches!(e, TradingEvent::TradeCompleted(_))));
    }

    #[tokio::test]
    async fn closing_an_unknown_position_is_a_no_op() {
        let (manager, _rx) = stack(CountingBroker::accepting());
        assert!(manager.close_position(Uuid::new_v4(), "manual").await.is_none());
    }

    #[tokio::test]
    async fn short_positions_profit_when_the_price_falls() {
        let (manager, _rx) = stack(CountingBroker::accepting());

        let mut short_signal = signal(PositionSide::Short);
        short_signal.stop_loss = Some(dec!(105));
        short_signal.take_profit = Some(dec!(90));

        let opened = manager.open_position(&short_signal, dec!(10)).await.unwrap();
        manager
            .update_position_prices(opened.position_id, dec!(90))
            .await
            .unwrap();
        let trade = manager
            .close_position(opened.position_id, "take profit")
            .await
            .unwrap();

        assert_eq!(trade.net_pnl, dec!(100));
        assert_eq!(trade.return_pct, dec!(10));
    }

    #[tokio::test]
    async fn marking_a_position_publishes_the_update() {
        let (manager, mut rx) = stack(CountingBroker::accepting());

        let opened = manager
            .open_position(&signal(PositionSide::Long), dec!(10))
            .await
            .unwrap();
        let updated = manager
            .update_position_prices(opened.position_id, dec!(103))
            .await
            .unwrap();
        assert_eq!(updated.current_price, Some(dec!(103)));

        let events = drain(&mut rx);
        assert!(events.iter().any(
            |e| matches!(e, TradingEvent::PositionUpdated(p) if p.current_price == Some(dec!(103)))
        ));

        assert!(manager
            .update_position_prices(Uuid::new_v4(), dec!(1))
            .await
            .is_none());
    }

    #[test]
    fn stop_loss_triggers_at_and_beyond_the_stop() {
        let events = EventBus::new(4);
        let trading = Arc::new(TradingService::new(
            Arc::new(CountingBroker::accepting()),
            events.clone(),
        ));
        let manager = PositionManager::new(trading, events);

        let stop = Some(dec!(95));
        assert!(manager.check_stop_loss(&position(PositionSide::Long, Some(dec!(94)), stop, None)));
        assert!(manager.check_stop_loss(&position(PositionSide::Long, Some(dec!(95)), stop, None)));
        assert!(!manager.check_stop_loss(&position(PositionSide::Long, Some(dec!(96)), stop, None)));

        let stop = Some(dec!(105));
        assert!(manager.check_stop_loss(&position(PositionSide::Short, Some(dec!(106)), stop, None)));
        assert!(manager.check_stop_loss(&position(PositionSide::Short, Some(dec!(105)), stop, None)));
        assert!(!manager.check_stop_loss(&position(PositionSide::Short, Some(dec!(104)), stop, None)));

        // No stop, or no mark yet: never trigger.
        assert!(!manager.check_stop_loss(&position(PositionSide::Long, Some(dec!(1)), None, None)));
        assert!(!manager.check_stop_loss(&position(PositionSide::Long, None, Some(dec!(95)), None)));
    }

    #[test]
    fn take_profit_triggers_at_and_beyond_the_target() {
        let events = EventBus::new(4);
        let trading = Arc::new(TradingService::new(
            Arc::new(CountingBroker::accepting()),
            events.clone(),
        ));
        let manager = PositionManager::new(trading, events);

        let target = Some(dec!(110));
        assert!(manager.check_take_profit(&position(PositionSide::Long, Some(dec!(110)), None, target)));
        assert!(manager.check_take_profit(&position(PositionSide::Long, Some(dec!(111)), None, target)));
        assert!(!manager.check_take_profit(&position(PositionSide::Long, Some(dec!(109)), None, target)));

        let target = Some(dec!(90));
        assert!(manager.check_take_profit(&position(PositionSide::Short, Some(dec!(90)), None, target)));
        assert!(manager.check_take_profit(&position(PositionSide::Short, Some(dec!(89)), None, target)));
        assert!(!manager.check_take_profit(&position(PositionSide::Short, Some(dec!(91)), None, target)));

        assert!(!manager.check_take_profit(&position(PositionSide::Long, Some(dec!(200)), None, None)));
        assert!(!manager.check_take_profit(&position(PositionSide::Long, None, None, Some(dec!(110)))));
    }

    #[tokio::test]
    async fn positions_filter_by_symbol() {
        let (manager, _rx) = stack(CountingBroker::accepting());

        manager
            .open_position(&signal(PositionSide::Long), dec!(10))
            .await
            .unwrap();
        let mut other = signal(PositionSide::Long);
        other.symbol = "MSFT".to_string();
        manager.open_position(&other, dec!(5)).await.unwrap();

        assert_eq!(manager.get_positions_by_symbol("AAPL").await.len(), 1);
        assert_eq!(manager.get_positions_by_symbol("MSFT").await.len(), 1);
        assert!(manager.get_positions_by_symbol("TSLA").await.is_empty());
        assert_eq!(manager.get_all_positions().await.len(), 2);
    }
}
