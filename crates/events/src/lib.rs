//! # Meridian Events
//!
//! This crate defines the lifecycle events the trading core emits and the
//! broadcast bus that carries them to downstream consumers such as the
//! alerter.
//!
//! As a Layer 0 crate, it depends only on `core-types` and provides the
//! definitive language for everything an observer may react to.

// Declare the modules that make up this crate.
pub mod bus;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use bus::EventBus;
pub use messages::{OrderRejection, PositionCloseout, TradingEvent};
