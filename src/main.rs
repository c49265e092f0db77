use std::sync::Arc;

use alerter::{TelegramAlerter, run_alerter_service};
use broker_client::{AlpacaClient, BrokerClient, PaperBroker};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use configuration::Config;
use core_types::Signal;
use engine::LiveEngine;
use events::EventBus;
use portfolio::PortfolioManager;
use positions::PositionManager;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use trading::TradingService;

/// The main entry point for the Meridian trading application.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file, when one exists.
    dotenvy::dotenv().ok();

    let _guard = init_tracing();
    let config = configuration::load_config()?;

    // Parse command-line arguments
    let cli = Cli::parse();

    // Execute the appropriate command
    match cli.command {
        Commands::Run => handle_run(config).await?,
        Commands::Account => handle_account(config).await?,
        Commands::Positions => handle_positions(config).await?,
    }

    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A broker-coordinated equities trading engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live trading engine.
    Run,
    /// Show the broker account snapshot.
    Account,
    /// List the positions held at the broker.
    Positions,
}

// ==============================================================================
// Command Logic
// ==============================================================================

/// Sends logs to stdout and a daily-rotated file under `logs/`. The returned
/// guard must stay alive for the lifetime of the process so buffered log
/// lines are flushed on exit.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "meridian.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(file_writer.and(std::io::stdout))
        .init();

    guard
}

/// Builds the broker the whole application trades through: the in-memory
/// paper venue in simulated mode, the live Alpaca client otherwise.
async fn build_broker(config: &Config) -> anyhow::Result<Arc<dyn BrokerClient>> {
    if config.broker.simulated {
        info!(
            starting_cash = %config.broker.sim_starting_cash,
            "Using the simulated paper broker"
        );
        let paper = PaperBroker::new(config.broker.sim_starting_cash);
        for symbol in &config.engine.symbols {
            paper
                .seed_quote(
                    symbol,
                    config.broker.sim_seed_price - dec!(0.05),
                    config.broker.sim_seed_price + dec!(0.05),
                )
                .await;
        }
        Ok(Arc::new(paper))
    } else {
        info!(base_url = %config.broker.base_url, "Using the live Alpaca broker");
        Ok(Arc::new(AlpacaClient::new(&config.broker)?))
    }
}

/// Wires the trading stack together and runs the engine until the signal
/// channel closes.
async fn handle_run(config: Config) -> anyhow::Result<()> {
    let events = EventBus::new(config.engine.event_buffer_size);
    let broker = build_broker(&config).await?;

    let trading = Arc::new(TradingService::new(broker.clone(), events.clone()));
    let positions = Arc::new(PositionManager::new(trading.clone(), events.clone()));
    let portfolio = Arc::new(PortfolioManager::new(broker.clone(), positions.clone()));

    if let Some(telegram) = TelegramAlerter::new(&config.telegram) {
        tokio::spawn(run_alerter_service(telegram, events.subscribe()));
    }

    // The sender half is the intake for signal sources; holding it here
    // keeps the engine loop alive.
    let (_signal_tx, signal_rx) = mpsc::channel::<Signal>(64);

    let mut live_engine = LiveEngine::new(config, broker, trading, positions, portfolio, signal_rx);
    live_engine.run().await?;
    Ok(())
}

/// Prints the broker account snapshot as a table.
async fn handle_account(config: Config) -> anyhow::Result<()> {
    let broker = build_broker(&config).await?;
    let account = broker.get_account().await?;

    let mut table = Table::new();
    table.set_header(vec!["Cash", "Equity", "Buying Power"]);
    table.add_row(vec![
        account.cash.to_string(),
        account.equity.to_string(),
        account.buying_power.to_string(),
    ]);
    println!("{table}");
    Ok(())
}

/// Prints the positions held at the broker as a table.
async fn handle_positions(config: Config) -> anyhow::Result<()> {
    let broker = build_broker(&config).await?;
    let positions = broker.get_positions().await?;

    if positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Symbol",
        "Side",
        "Qty",
        "Avg Entry",
        "Market Value",
        "Unrealized P&L",
    ]);
    for position in positions {
        table.add_row(vec![
            position.symbol.clone(),
            format!("{:?}", position.side),
            position.quantity.to_string(),
            position.avg_entry_price.to_string(),
            position
                .market_value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            position
                .unrealized_pl
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}
