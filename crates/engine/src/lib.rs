use crate::error::EngineError;
use broker_client::BrokerClient;
use configuration::Config;
use core_types::Signal;
use portfolio::PortfolioManager;
use positions::PositionManager;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use trading::TradingService;

pub mod error;

/// The central orchestrator for the live trading application.
///
/// One engine task owns the whole decision loop: signals arriving on the
/// intake channel become sized entries, and every poll tick marks the open
/// book, enforces stops and targets, and refreshes the portfolio. Because
/// everything funnels through this single task, no two decisions about the
/// same position ever race.
pub struct LiveEngine {
    // --- Configuration ---
    config: Config,

    // --- Shared, Thread-Safe Components ---
    broker: Arc<dyn BrokerClient>,
    trading: Arc<TradingService>,
    positions: Arc<PositionManager>,
    portfolio: Arc<PortfolioManager>,

    // --- Signal Intake ---
    signal_rx: mpsc::Receiver<Signal>,
}

impl LiveEngine {
    /// Creates a new `LiveEngine` instance with all its required components.
    pub fn new(
        config: Config,
        broker: Arc<dyn BrokerClient>,
        trading: Arc<TradingService>,
        positions: Arc<PositionManager>,
        portfolio: Arc<PortfolioManager>,
        signal_rx: mpsc::Receiver<Signal>,
    ) -> Self {
        Self {
            config,
            broker,
            trading,
            positions,
            portfolio,
            signal_rx,
        }
    }

    /// Initializes the engine to a ready state for live trading.
    /// This is the primary setup function that must be called before `run`.
    pub async fn init(&self) -> Result<(), EngineError> {
        info!("Initializing trading engine...");

        // 1. Verify broker connectivity with an account fetch.
        let account = self.broker.get_account().await?;
        info!(
            cash = %account.cash,
            equity = %account.equity,
            buying_power = %account.buying_power,
            "Broker account verified"
        );

        // 2. Warm the portfolio snapshot so the first sizing decision is fresh.
        let snapshot = self.portfolio.get_portfolio().await;
        info!(equity = %snapshot.equity, "Portfolio snapshot ready");

        Ok(())
    }

    /// The main event loop for the live trading engine.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        self.init().await?;

        let mut ticker = interval(Duration::from_secs(self.config.engine.poll_interval_secs));
        info!(
            symbols = ?self.config.engine.symbols,
            poll_interval_secs = self.config.engine.poll_interval_secs,
            "Engine is running. Waiting for signals..."
        );

        loop {
            tokio::select! {
                maybe_signal = self.signal_rx.recv() => {
                    match maybe_signal {
                        Some(signal) => self.process_signal(signal).await,
                        None => {
                            info!("Signal channel closed. Engine shutting down.");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.poll_market().await;
                }
            }
        }
        Ok(())
    }

    /// Sizes a signal against the refreshed portfolio and opens the position.
    async fn process_signal(&self, signal: Signal) {
        info!(
            symbol = %signal.symbol,
            direction = ?signal.direction,
            price = %signal.price,
            strategy = %signal.strategy,
            "Signal received"
        );

        let size = self
            .portfolio
            .calculate_position_size(&signal.symbol, &signal, self.config.risk.risk_per_trade)
            .await;
        if size <= 0 {
            warn!(symbol = %signal.symbol, "Sizing returned no shares; signal skipped");
            return;
        }

        if let Some(position) = self
            .positions
            .open_position(&signal, Decimal::from(size))
            .await
        {
            info!(
                position_id = %position.position_id,
                symbol = %position.symbol,
                quantity = %position.quantity,
                "Entry complete"
            );
        }
    }

    /// One poll tick: mark the open book, enforce stops and targets, then
    /// refresh working orders and the portfolio snapshot.
    async fn poll_market(&self) {
        let open = self.positions.get_all_positions().await;
        if open.is_empty() {
            debug!("No open positions to mark");
        } else {
            let mut symbols: Vec<String> = open.iter().map(|p| p.symbol.clone()).collect();
            symbols.sort();
            symbols.dedup();

            let mut marks = HashMap::new();
            for symbol in &symbols {
                match self.broker.get_quote(symbol).await {
                    Ok(Some(quote)) => {
                        marks.insert(symbol.clone(), quote.mid());
                    }
                    Ok(None) => debug!(%symbol, "No quote available"),
                    Err(e) => warn!(%symbol, error = %e, "Quote fetch failed"),
                }
            }

            for position in open {
                let Some(&mark) = marks.get(&position.symbol) else {
                    continue;
                };
                let Some(updated) = self
                    .positions
                    .update_position_prices(position.position_id, mark)
                    .await
                else {
                    continue;
                };

                if self.positions.check_stop_loss(&updated) {
                    warn!(
                        position_id = %updated.position_id,
                        symbol = %updated.symbol,
                        mark = %mark,
                        "Stop loss hit"
                    );
                    self.positions
                        .close_position(updated.position_id, "stop loss")
                        .await;
                } else if self.positions.check_take_profit(&updated) {
                    info!(
                        position_id = %updated.position_id,
                        symbol = %updated.symbol,
                        mark = %mark,
                        "Take profit hit"
                    );
                    self.positions
                        .close_position(updated.position_id, "take profit")
                        .await;
                }
            }
        }

        let working = self.trading.get_open_orders().await;
        if !working.is_empty() {
            debug!(count = working.len(), "Orders still working at the broker");
        }

        let snapshot = self.portfolio.get_portfolio().await;
        info!(
            equity = %snapshot.equity,
            cash = %snapshot.cash,
            open_positions = snapshot.positions.len(),
            "Portfolio refreshed"
        );
    }
}
