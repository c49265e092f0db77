use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Failed to build or send the HTTP request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Order rejected by the broker: {0}")]
    Rejected(String),

    #[error("The broker API returned an error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to deserialize the broker response: {0}")]
    Deserialization(String),

    #[error("The broker returned data we cannot represent: {0}")]
    InvalidData(String),
}
