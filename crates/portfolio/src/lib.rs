//! # Meridian Portfolio
//!
//! The account-level view. One long-lived `Portfolio` snapshot is refreshed
//! from the broker account and overlaid with the live position book, and all
//! position sizing decisions are made against that refreshed snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use broker_client::BrokerClient;
use chrono::{DateTime, Utc};
use core_types::{Position, Signal};
use positions::PositionManager;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// No single position may be entered at more than this fraction of equity.
const MAX_POSITION_PCT: Decimal = dec!(0.10);

/// A point-in-time view of the whole account.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: Decimal,
    pub equity: Decimal,
    pub buying_power: Decimal,
    pub positions: HashMap<Uuid, Position>,
    pub updated_at: DateTime<Utc>,
}

/// Refreshes the portfolio snapshot and sizes new entries against it.
///
/// The broker's cash and buying power are taken at face value, but equity is
/// always recomputed as cash plus the marked value of the open position book,
/// so the snapshot stays internally consistent even when the broker's own
/// equity number lags its cash number.
pub struct PortfolioManager {
    broker: Arc<dyn BrokerClient>,
    positions: Arc<PositionManager>,
    portfolio: Mutex<Portfolio>,
}

impl PortfolioManager {
    pub fn new(broker: Arc<dyn BrokerClient>, positions: Arc<PositionManager>) -> Self {
        Self {
            broker,
            positions,
            portfolio: Mutex::new(Portfolio {
                cash: Decimal::ZERO,
                equity: Decimal::ZERO,
                buying_power: Decimal::ZERO,
                positions: HashMap::new(),
                updated_at: Utc::now(),
            }),
        }
    }

    /// Refreshes and returns the portfolio snapshot.
    ///
    /// A failed account fetch is logged and the last known cash and buying
    /// power are carried forward; the position overlay and equity are
    /// recomputed either way.
    pub async fn get_portfolio(&self) -> Portfolio {
        let mut portfolio = self.portfolio.lock().await;

        match self.broker.get_account().await {
            Ok(account) => {
                portfolio.cash = account.cash;
                portfolio.buying_power = account.buying_power;
            }
            Err(e) => {
                warn!(error = %e, "Account refresh failed; serving the last known snapshot");
            }
        }

        let open = self.positions.get_all_positions().await;
        portfolio.positions = open.iter().map(|p| (p.position_id, p.clone())).collect();

        let positions_value: Decimal = open.iter().map(Position::market_value).sum();
        portfolio.equity = portfolio.cash + positions_value;
        portfolio.updated_at = Utc::now();

        portfolio.clone()
    }

    /// Computes how many whole shares to order for a signal.
    ///
    /// The size is the number of shares `risk_amount` pays for, capped at
    /// the equity percentage limit, then clamped to what buying power can
    /// actually cover. Never negative; zero means "do not trade".
    pub async fn calculate_position_size(
        &self,
        symbol: &str,
        signal: &Signal,
        risk_amount: Decimal,
    ) -> i64 {
        if signal.price <= Decimal::ZERO || risk_amount <= Decimal::ZERO {
            return 0;
        }

        let snapshot = self.get_portfolio().await;

        let risk_shares = (risk_amount / signal.price).floor();
        let pct_shares = (snapshot.equity * MAX_POSITION_PCT / signal.price).floor();
        let mut shares = risk_shares.min(pct_shares);

        if shares * signal.price > snapshot.buying_power {
            shares = (snapshot.buying_power / signal.price).floor();
        }

        let size = shares.to_i64().unwrap_or(0).max(0);
        debug!(
            %symbol,
            price = %signal.price,
            %risk_amount,
            equity = %snapshot.equity,
            buying_power = %snapshot.buying_power,
            size,
            "Calculated position size"
        );
        size
    }

    pub async fn get_portfolio_value(&self) -> Decimal {
        self.get_portfolio().await.equity
    }

    pub async fn get_cash_balance(&self) -> Decimal {
        self.get_portfolio().await.cash
    }

    pub async fn calculate_buying_power(&self) -> Decimal {
        self.get_portfolio().await.buying_power
    }
}
