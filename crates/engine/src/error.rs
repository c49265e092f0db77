use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Broker error: {0}")]
    Broker(#[from] broker_client::BrokerError),
}
