use broker_client::BrokerError;
use core_types::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Order validation failed: {0}")]
    Validation(#[from] CoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}
