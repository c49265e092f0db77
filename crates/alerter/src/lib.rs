use crate::error::AlerterError;
use configuration::TelegramConfig;
use events::TradingEvent;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
pub mod error;

/// The JSON payload for the Telegram `sendMessage` endpoint.
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str, // To allow for formatting like bold, italics etc.
}

/// A client for sending messages to the Telegram Bot API.
pub struct TelegramAlerter {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramAlerter {
    /// Creates a new `TelegramAlerter`.
    ///
    /// Returns `None` if the token or chat_id is missing from the configuration,
    /// allowing the system to gracefully disable alerting.
    pub fn new(config: &TelegramConfig) -> Option<Self> {
        if config.token.is_empty() || config.chat_id.is_empty() {
            tracing::warn!("Telegram alerter is not configured (missing token or chat_id).");
            return None;
        }
        Some(Self {
            client: Client::new(),
            token: config.token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    /// Sends a text message to the configured Telegram chat.
    pub async fn send_message(&self, message: &str) -> Result<(), AlerterError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);

        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "MarkdownV2", // Use Markdown for rich formatting
        };

        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to decode error response".to_string());
            return Err(AlerterError::ApiError(error_text));
        }

        Ok(())
    }
}

/// A long-running service that listens to the trading event stream and sends
/// Telegram alerts for the events a human would want to hear about.
pub async fn run_alerter_service(
    alerter: TelegramAlerter,
    mut event_rx: broadcast::Receiver<TradingEvent>,
) {
    tracing::info!("Alerter service started. Listening for trading events.");

    // Send a startup message
    let _ = alerter.send_message("✅ *Meridian Engine Started*").await;

    loop {
        match event_rx.recv().await {
            Ok(event) => {
                if let Some(msg) = render_alert(&event) {
                    if let Err(e) = alerter.send_message(&msg).await {
                        tracing::error!(error = ?e, "Failed to send Telegram alert.");
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Alerter service lagged, skipped {} messages.", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::error!("Broadcast channel closed. Alerter service shutting down.");
                break;
            }
        }
    }
}

/// Renders an event into a MarkdownV2 alert, or `None` for events that do not
/// warrant one. Rejections, closes, and completed trades alert; routine
/// submissions and price marks stay quiet.
fn render_alert(event: &TradingEvent) -> Option<String> {
    match event {
        TradingEvent::OrderRejected(rejection) => Some(format!(
            "🚫 *ORDER REJECTED* {}\n{}",
            escape_markdown(&rejection.order.symbol),
            escape_markdown(&rejection.reason)
        )),
        TradingEvent::PositionClosed(closeout) => {
            let side = format!("{:?}", closeout.position.side).to_uppercase();
            Some(format!(
                "📕 *CLOSED {} {}* `{} units`\n{}",
                side,
                escape_markdown(&closeout.position.symbol),
                closeout.position.quantity,
                escape_markdown(&closeout.reason)
            ))
        }
        TradingEvent::TradeCompleted(trade) => {
            let icon = if trade.net_pnl >= Decimal::ZERO { "💰" } else { "🔻" };
            Some(format!(
                "{} *{}* P&L `{}` `({}%)`",
                icon,
                escape_markdown(&trade.symbol),
                trade.net_pnl,
                trade.return_pct.round_dp(2)
            ))
        }
        _ => None,
    }
}

/// A helper function to escape characters that have special meaning in Telegram's MarkdownV2.
fn escape_markdown(text: &str) -> String {
    let special_chars = r"_*[]()~`>#+-=|{}.!";
    special_chars
        .chars()
        .fold(text.to_string(), |s, c| s.replace(c, &format!("\\{}", c)))
}
