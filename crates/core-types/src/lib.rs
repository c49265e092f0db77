//! # Meridian Core Types
//!
//! Foundational data structures shared by every other crate in the
//! workspace: the order, position, and trade entities, their lifecycle
//! enums, and the crate-level error type.
//!
//! As a Layer 0 crate it depends on no other workspace crate.

pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{OrderSide, OrderStatus, OrderType, PositionSide};
pub use error::CoreError;
pub use structs::{Order, Position, Quote, Signal, Trade};
