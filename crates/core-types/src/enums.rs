use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side of the order
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// The direction of a position. Quantity is always stored positive; this
/// enum carries the directionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// The order side that opens a position in this direction.
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// The order side that closes a position in this direction.
    pub fn exit_order_side(&self) -> OrderSide {
        self.entry_order_side().opposite()
    }
}

/// The broker-side lifecycle of an order.
///
/// Legal transitions:
/// - `Pending` -> `Submitted` | `Cancelled`
/// - `Submitted` -> `PartiallyFilled` | `Filled` | `Rejected` | `Cancelled`
/// - `PartiallyFilled` -> `Filled` | `Cancelled`
///
/// `Filled`, `Rejected`, and `Cancelled` are terminal: no transition out of
/// them is ever permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    /// True once the order can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }

    /// True while the order is still working at the broker.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Submitted)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Submitted, OrderStatus::PartiallyFilled)
                | (OrderStatus::Submitted, OrderStatus::Filled)
                | (OrderStatus::Submitted, OrderStatus::Rejected)
                | (OrderStatus::Submitted, OrderStatus::Cancelled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Filled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_flips_the_side() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn position_side_maps_to_order_sides() {
        assert_eq!(PositionSide::Long.entry_order_side(), OrderSide::Buy);
        assert_eq!(PositionSide::Long.exit_order_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.entry_order_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.exit_order_side(), OrderSide::Buy);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        let all = [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Rejected,
            OrderStatus::Cancelled,
        ];
        for terminal in [
            OrderStatus::Filled,
            OrderStatus::Rejected,
            OrderStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            for next in all {
                assert!(
                    !terminal.can_transition_to(next),
                    "{:?} must not transition to {:?}",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn fill_path_is_legal() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Submitted));
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::Filled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Filled));
    }

    #[test]
    fn cancel_and_reject_paths() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::Rejected));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Cancelled));

        // Skipping states or moving backwards is never allowed.
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Rejected));
        assert!(!OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Rejected));
        assert!(!OrderStatus::Submitted.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn open_is_the_complement_of_terminal() {
        assert!(OrderStatus::Pending.is_open());
        assert!(OrderStatus::Submitted.is_open());
        assert!(OrderStatus::PartiallyFilled.is_open());
        assert!(!OrderStatus::Filled.is_open());
        assert!(!OrderStatus::Rejected.is_open());
        assert!(!OrderStatus::Cancelled.is_open());
    }
}
