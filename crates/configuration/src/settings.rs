use rust_decimal::Decimal;
use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub risk: RiskConfig,
    pub engine: EngineConfig,
    pub telegram: TelegramConfig,
}

/// Connection settings for the brokerage API.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// When true, the engine trades against the in-process simulated venue
    /// instead of the live API. Credentials are not required in this mode.
    pub simulated: bool,
    /// Starting cash for the simulated venue.
    pub sim_starting_cash: Decimal,
    /// The price each watched symbol is seeded at on the simulated venue.
    pub sim_seed_price: Decimal,
    /// Base URL of the trading API (paper or live host).
    pub base_url: String,
    /// Base URL of the market data API.
    pub data_url: String,
    /// API key id, sent as the `APCA-API-KEY-ID` header.
    pub key_id: String,
    /// API secret, sent as the `APCA-API-SECRET-KEY` header.
    pub secret_key: String,
}

/// Parameters for trade-level risk management.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// The amount of account currency risked on a single trade. Drives
    /// position sizing together with the portfolio-percentage cap.
    pub risk_per_trade: Decimal,
}

/// Parameters for the live engine loop.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// The symbols the engine watches and trades.
    pub symbols: Vec<String>,
    /// Seconds between market polls (quotes, order refresh, portfolio).
    pub poll_interval_secs: u64,
    /// Buffer size of the event broadcast channel.
    pub event_buffer_size: usize,
}

/// Credentials for the Telegram alerter. Leave both fields empty to disable
/// alerting.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}
