//! # Meridian Broker Client
//!
//! This crate is the sole gateway to the brokerage. It defines the abstract
//! `BrokerClient` interface the rest of the system trades through, a live
//! implementation for the Alpaca REST API, and a simulated paper venue for
//! offline runs and tests.

pub mod error;
pub mod paper;
pub mod responses;

use async_trait::async_trait;
use configuration::BrokerConfig;
use core_types::{Order, OrderSide, OrderType, Quote};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

// Re-export the core types to provide a clean public API.
pub use error::BrokerError;
pub use paper::PaperBroker;
pub use responses::{AccountInfo, BrokerOrder, BrokerPosition};

/// The generic, abstract interface for a brokerage.
///
/// The trading stack is written entirely against this trait, so the live
/// Alpaca client and the paper venue are interchangeable.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Places an order, keyed by our own order id for later lookup.
    async fn submit_order(&self, order: &Order) -> Result<BrokerOrder, BrokerError>;

    /// Requests cancellation of a working order. Returns `false` when the
    /// broker no longer considers the order cancellable.
    async fn cancel_order(&self, broker_order_id: &str) -> Result<bool, BrokerError>;

    /// Fetches an order by its broker-assigned id.
    async fn get_order(&self, broker_order_id: &str) -> Result<Option<BrokerOrder>, BrokerError>;

    /// Fetches an order by the client order id it was submitted under.
    async fn get_order_by_client_id(
        &self,
        client_order_id: Uuid,
    ) -> Result<Option<BrokerOrder>, BrokerError>;

    /// Fetches the current account snapshot.
    async fn get_account(&self) -> Result<AccountInfo, BrokerError>;

    /// Fetches all positions the broker holds for the account.
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Fetches the latest bid/ask for a symbol. `None` when the venue has no
    /// quote for it.
    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>, BrokerError>;
}

/// A concrete implementation of `BrokerClient` for the Alpaca Trading API.
#[derive(Debug, Clone)]
pub struct AlpacaClient {
    client: reqwest::Client,
    base_url: String,
    data_url: String,
}

impl AlpacaClient {
    /// Creates a new client with the API credentials installed as default
    /// headers on every request.
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            HeaderValue::from_str(&config.key_id).map_err(|_| {
                BrokerError::InvalidData("API key id is not a valid header value".to_string())
            })?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            HeaderValue::from_str(&config.secret_key).map_err(|_| {
                BrokerError::InvalidData("API secret is not a valid header value".to_string())
            })?,
        );

        Ok(Self {
            client: reqwest::Client::builder().default_headers(headers).build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            data_url: config.data_url.trim_end_matches('/').to_string(),
        })
    }

    /// Internal helper for GET requests against a fully-formed URL.
    async fn _get<T: DeserializeOwned>(&self, url: &str) -> Result<T, BrokerError> {
        let response = self.client.get(url).send().await?;
        read_json(response).await
    }
}

#[async_trait]
impl BrokerClient for AlpacaClient {
    async fn submit_order(&self, order: &Order) -> Result<BrokerOrder, BrokerError> {
        let url = format!("{}/v2/orders", self.base_url);

        let mut body = json!({
            "symbol": order.symbol,
            "qty": order.quantity.to_string(),
            "side": side_str(order.side),
            "type": type_str(order.order_type),
            "time_in_force": "day",
            "client_order_id": order.order_id.to_string(),
        });
        if let (OrderType::Limit, Some(limit)) = (order.order_type, order.limit_price) {
            body["limit_price"] = json!(limit.to_string());
        }

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        // Alpaca signals an impermissible order with 403 (e.g. insufficient
        // buying power) or 422 (unprocessable parameters).
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNPROCESSABLE_ENTITY {
            let message = serde_json::from_str::<responses::ApiErrorResponse>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(BrokerError::Rejected(message));
        }
        if !status.is_success() {
            return Err(api_error(status, &text));
        }

        let raw: responses::AlpacaOrder = serde_json::from_str(&text)
            .map_err(|e| BrokerError::Deserialization(e.to_string()))?;
        raw.try_into()
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        let url = format!("{}/v2/orders/{}", self.base_url, broker_order_id);
        let response = self.client.delete(&url).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(true);
        }
        // 404: unknown order. 422: already in a state that cannot be
        // cancelled. Neither is a transport failure.
        if status == StatusCode::NOT_FOUND || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(false);
        }
        let text = response.text().await?;
        Err(api_error(status, &text))
    }

    async fn get_order(&self, broker_order_id: &str) -> Result<Option<BrokerOrder>, BrokerError> {
        let url = format!("{}/v2/orders/{}", self.base_url, broker_order_id);
        match self._get::<responses::AlpacaOrder>(&url).await {
            Ok(raw) => Ok(Some(raw.try_into()?)),
            Err(BrokerError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_order_by_client_id(
        &self,
        client_order_id: Uuid,
    ) -> Result<Option<BrokerOrder>, BrokerError> {
        let url = format!(
            "{}/v2/orders:by_client_order_id?client_order_id={}",
            self.base_url, client_order_id
        );
        match self._get::<responses::AlpacaOrder>(&url).await {
            Ok(raw) => Ok(Some(raw.try_into()?)),
            Err(BrokerError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_account(&self) -> Result<AccountInfo, BrokerError> {
        let url = format!("{}/v2/account", self.base_url);
        let raw: responses::AlpacaAccount = self._get(&url).await?;
        raw.try_into()
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let url = format!("{}/v2/positions", self.base_url);
        let raw: Vec<responses::AlpacaPosition> = self._get(&url).await?;
        raw.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>, BrokerError> {
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_url, symbol);
        match self._get::<responses::AlpacaQuoteEnvelope>(&url).await {
            Ok(envelope) => Ok(Some(envelope.into_quote(symbol))),
            Err(BrokerError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Reads a response body, turning non-success statuses into `Api` errors
/// carrying the message Alpaca put in the body.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BrokerError> {
    let status = response.status();
    let text = response.text().await?;

    if status.is_success() {
        serde_json::from_str::<T>(&text).map_err(|e| BrokerError::Deserialization(e.to_string()))
    } else {
        Err(api_error(status, &text))
    }
}

fn api_error(status: StatusCode, body: &str) -> BrokerError {
    let message = serde_json::from_str::<responses::ApiErrorResponse>(body)
        .map(|e| format!("{} (code {})", e.message, e.code))
        .unwrap_or_else(|_| body.to_string());
    BrokerError::Api {
        status: status.as_u16(),
        message,
    }
}

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

fn type_str(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "market",
        OrderType::Limit => "limit",
    }
}
