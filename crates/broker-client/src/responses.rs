//! Wire-format structs for the Alpaca REST API and their conversions into
//! domain types. Alpaca sends most numeric fields as JSON strings, so all
//! parsing noise is contained here.

use chrono::{DateTime, Utc};
use core_types::{OrderSide, OrderStatus, OrderType, PositionSide, Quote};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BrokerError;

/// An order as returned by `POST /v2/orders` and the order lookups.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaOrder {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub qty: String,
    pub filled_qty: String,
    pub filled_avg_price: Option<String>,
    pub limit_price: Option<String>,
    pub status: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// The account snapshot from `GET /v2/account`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaAccount {
    pub cash: String,
    pub equity: String,
    pub buying_power: String,
}

/// A position row from `GET /v2/positions`. `qty` is signed (negative for
/// shorts); `side` is "long" or "short".
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaPosition {
    pub symbol: String,
    pub qty: String,
    pub side: String,
    pub avg_entry_price: String,
    pub market_value: Option<String>,
    pub unrealized_pl: Option<String>,
}

/// Envelope for `GET /v2/stocks/{symbol}/quotes/latest`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaQuoteEnvelope {
    pub quote: AlpacaQuote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaQuote {
    #[serde(rename = "bp")]
    pub bid_price: Decimal,
    #[serde(rename = "ap")]
    pub ask_price: Decimal,
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
}

impl AlpacaQuoteEnvelope {
    pub fn into_quote(self, symbol: &str) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid: self.quote.bid_price,
            ask: self.quote.ask_price,
            timestamp: self.quote.timestamp,
        }
    }
}

/// The JSON error body Alpaca returns for failed requests.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub message: String,
}

/// The broker's view of an order, converted into domain terms.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOrder {
    pub broker_order_id: String,
    /// Present when the broker echoes back a client order id we generated.
    pub client_order_id: Option<Uuid>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Cash and margin numbers for the trading account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountInfo {
    pub cash: Decimal,
    pub equity: Decimal,
    pub buying_power: Decimal,
}

/// The broker's view of an open position.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPosition {
    pub symbol: String,
    pub side: PositionSide,
    /// Always positive; the direction lives in `side`.
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub market_value: Option<Decimal>,
    pub unrealized_pl: Option<Decimal>,
}

impl TryFrom<AlpacaOrder> for BrokerOrder {
    type Error = BrokerError;

    fn try_from(raw: AlpacaOrder) -> Result<Self, BrokerError> {
        Ok(Self {
            client_order_id: Uuid::parse_str(&raw.client_order_id).ok(),
            side: parse_side(&raw.side)?,
            order_type: parse_order_type(&raw.order_type)?,
            quantity: parse_decimal(&raw.qty, "qty")?,
            filled_quantity: parse_decimal(&raw.filled_qty, "filled_qty")?,
            filled_avg_price: parse_optional_decimal(raw.filled_avg_price.as_deref(), "filled_avg_price")?,
            limit_price: parse_optional_decimal(raw.limit_price.as_deref(), "limit_price")?,
            status: parse_order_status(&raw.status)?,
            submitted_at: raw.submitted_at,
            symbol: raw.symbol,
            broker_order_id: raw.id,
        })
    }
}

impl TryFrom<AlpacaAccount> for AccountInfo {
    type Error = BrokerError;

    fn try_from(raw: AlpacaAccount) -> Result<Self, BrokerError> {
        Ok(Self {
            cash: parse_decimal(&raw.cash, "cash")?,
            equity: parse_decimal(&raw.equity, "equity")?,
            buying_power: parse_decimal(&raw.buying_power, "buying_power")?,
        })
    }
}

impl TryFrom<AlpacaPosition> for BrokerPosition {
    type Error = BrokerError;

    fn try_from(raw: AlpacaPosition) -> Result<Self, BrokerError> {
        let side = match raw.side.as_str() {
            "long" => PositionSide::Long,
            "short" => PositionSide::Short,
            other => {
                return Err(BrokerError::InvalidData(format!(
                    "unknown position side: {other}"
                )));
            }
        };
        Ok(Self {
            side,
            quantity: parse_decimal(&raw.qty, "qty")?.abs(),
            avg_entry_price: parse_decimal(&raw.avg_entry_price, "avg_entry_price")?,
            market_value: parse_optional_decimal(raw.market_value.as_deref(), "market_value")?,
            unrealized_pl: parse_optional_decimal(raw.unrealized_pl.as_deref(), "unrealized_pl")?,
            symbol: raw.symbol,
        })
    }
}

/// Maps Alpaca's order lifecycle strings onto ours. Anything unrecognized is
/// an error rather than a guess.
pub fn parse_order_status(value: &str) -> Result<OrderStatus, BrokerError> {
    match value {
        "new" | "accepted" | "pending_new" | "pending_cancel" => Ok(OrderStatus::Submitted),
        "partially_filled" => Ok(OrderStatus::PartiallyFilled),
        "filled" => Ok(OrderStatus::Filled),
        "canceled" | "expired" | "done_for_day" => Ok(OrderStatus::Cancelled),
        "rejected" | "suspended" => Ok(OrderStatus::Rejected),
        other => Err(BrokerError::InvalidData(format!(
            "unknown order status: {other}"
        ))),
    }
}

fn parse_side(value: &str) -> Result<OrderSide, BrokerError> {
    match value {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        other => Err(BrokerError::InvalidData(format!(
            "unknown order side: {other}"
        ))),
    }
}

fn parse_order_type(value: &str) -> Result<OrderType, BrokerError> {
    match value {
        "market" => Ok(OrderType::Market),
        "limit" => Ok(OrderType::Limit),
        other => Err(BrokerError::InvalidData(format!(
            "unknown order type: {other}"
        ))),
    }
}

fn parse_decimal(value: &str, field: &str) -> Result<Decimal, BrokerError> {
    Decimal::from_str(value)
        .map_err(|_| BrokerError::InvalidData(format!("{field} is not a decimal: {value}")))
}

fn parse_optional_decimal(
    value: Option<&str>,
    field: &str,
) -> Result<Option<Decimal>, BrokerError> {
    value.map(|v| parse_decimal(v, field)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ORDER_JSON: &str = r#"{
        "id": "61e69015-8549-4bfd-b9c3-01e75843f47d",
        "client_order_id": "904837e3-3b76-47ec-b432-046db621571b",
        "symbol": "AAPL",
        "side": "buy",
        "type": "market",
        "qty": "10",
        "filled_qty": "0",
        "filled_avg_price": null,
        "limit_price": null,
        "status": "accepted",
        "submitted_at": "2024-03-01T14:30:00Z"
    }"#;

    #[test]
    fn alpaca_order_converts_to_domain() {
        let raw: AlpacaOrder = serde_json::from_str(ORDER_JSON).unwrap();
        let order: BrokerOrder = raw.try_into().unwrap();

        assert_eq!(order.broker_order_id, "61e69015-8549-4bfd-b9c3-01e75843f47d");
        assert_eq!(
            order.client_order_id,
            Some(Uuid::parse_str("904837e3-3b76-47ec-b432-046db621571b").unwrap())
        );
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.quantity, dec!(10));
        assert_eq!(order.filled_quantity, dec!(0));
        assert_eq!(order.filled_avg_price, None);
        assert_eq!(order.status, OrderStatus::Submitted);
    }

    #[test]
    fn non_uuid_client_order_ids_become_none() {
        let mut raw: AlpacaOrder = serde_json::from_str(ORDER_JSON).unwrap();
        raw.client_order_id = "manual-order-42".to_string();
        let order: BrokerOrder = raw.try_into().unwrap();
        assert_eq!(order.client_order_id, None);
    }

    #[test]
    fn status_strings_map_onto_the_lifecycle() {
        for (raw, expected) in [
            ("new", OrderStatus::Submitted),
            ("accepted", OrderStatus::Submitted),
            ("pending_new", OrderStatus::Submitted),
            ("partially_filled", OrderStatus::PartiallyFilled),
            ("filled", OrderStatus::Filled),
            ("canceled", OrderStatus::Cancelled),
            ("expired", OrderStatus::Cancelled),
            ("done_for_day", OrderStatus::Cancelled),
            ("rejected", OrderStatus::Rejected),
            ("suspended", OrderStatus::Rejected),
        ] {
            assert_eq!(parse_order_status(raw).unwrap(), expected, "for {raw}");
        }
        assert!(matches!(
            parse_order_status("held"),
            Err(BrokerError::InvalidData(_))
        ));
    }

    #[test]
    fn account_strings_parse_into_decimals() {
        let raw = AlpacaAccount {
            cash: "100000.25".to_string(),
            equity: "105250.75".to_string(),
            buying_power: "200000.50".to_string(),
        };
        let account: AccountInfo = raw.try_into().unwrap();
        assert_eq!(account.cash, dec!(100000.25));
        assert_eq!(account.equity, dec!(105250.75));
        assert_eq!(account.buying_power, dec!(200000.50));
    }

    #[test]
    fn signed_position_quantities_normalize() {
        let raw = AlpacaPosition {
            symbol: "TSLA".to_string(),
            qty: "-5".to_string(),
            side: "short".to_string(),
            avg_entry_price: "240.10".to_string(),
            market_value: Some("-1180.00".to_string()),
            unrealized_pl: Some("20.50".to_string()),
        };
        let position: BrokerPosition = raw.try_into().unwrap();
        assert_eq!(position.side, PositionSide::Short);
        assert_eq!(position.quantity, dec!(5));
        assert_eq!(position.avg_entry_price, dec!(240.10));
    }

    #[test]
    fn quote_envelope_parses_wire_names() {
        let json = r#"{"quote": {"bp": 187.33, "ap": 187.35, "t": "2024-03-01T14:30:00Z"}}"#;
        let envelope: AlpacaQuoteEnvelope = serde_json::from_str(json).unwrap();
        let quote = envelope.into_quote("AAPL");
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.bid, dec!(187.33));
        assert_eq!(quote.ask, dec!(187.35));
    }

    #[test]
    fn garbage_decimals_are_an_error() {
        let raw = AlpacaAccount {
            cash: "lots".to_string(),
            equity: "0".to_string(),
            buying_power: "0".to_string(),
        };
        let result: Result<AccountInfo, _> = raw.try_into();
        assert!(matches!(result, Err(BrokerError::InvalidData(_))));
    }
}
