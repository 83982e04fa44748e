use serde::{Deserialize, Serialize};
use std::fmt;

/// Forward return above which a bar is labeled StrongBuy
pub const STRONG_MOVE: f64 = 0.02;
/// Forward return above which a bar is labeled Buy
pub const MOVE: f64 = 0.005;

/// Five-class direction of the forward return over the label horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    StrongSell,
    Sell,
    Hold,
    Buy,
    StrongBuy,
}

impl Direction {
    pub fn from_return(forward_return: f64) -> Self {
        if forward_return > STRONG_MOVE {
            Direction::StrongBuy
        } else if forward_return > MOVE {
            Direction::Buy
        } else if forward_return < -STRONG_MOVE {
            Direction::StrongSell
        } else if forward_return < -MOVE {
            Direction::Sell
        } else {
            Direction::Hold
        }
    }

    /// Label for the bar at `entry` given the close `horizon` bars later
    pub fn from_prices(entry_close: f64, future_close: f64) -> Option<Self> {
        if entry_close <= 0.0 || !entry_close.is_finite() || !future_close.is_finite() {
            return None;
        }
        Some(Self::from_return((future_close - entry_close) / entry_close))
    }

    pub fn class_id(&self) -> i32 {
        match self {
            Direction::StrongSell => -2,
            Direction::Sell => -1,
            Direction::Hold => 0,
            Direction::Buy => 1,
            Direction::StrongBuy => 2,
        }
    }

    pub fn from_class_id(id: i32) -> Option<Self> {
        match id {
            -2 => Some(Direction::StrongSell),
            -1 => Some(Direction::Sell),
            0 => Some(Direction::Hold),
            1 => Some(Direction::Buy),
            2 => Some(Direction::StrongBuy),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::StrongSell => "StrongSell",
            Direction::Sell => "Sell",
            Direction::Hold => "Hold",
            Direction::Buy => "Buy",
            Direction::StrongBuy => "StrongBuy",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_thresholds() {
        assert_eq!(Direction::from_return(0.021), Direction::StrongBuy);
        assert_eq!(Direction::from_return(0.02), Direction::Buy);
        assert_eq!(Direction::from_return(0.006), Direction::Buy);
        assert_eq!(Direction::from_return(0.005), Direction::Hold);
        assert_eq!(Direction::from_return(0.0), Direction::Hold);
        assert_eq!(Direction::from_return(-0.005), Direction::Hold);
        assert_eq!(Direction::from_return(-0.006), Direction::Sell);
        assert_eq!(Direction::from_return(-0.021), Direction::StrongSell);
    }

    #[test]
    fn test_class_ids_are_symmetric() {
        for d in [
            Direction::StrongSell,
            Direction::Sell,
            Direction::Hold,
            Direction::Buy,
            Direction::StrongBuy,
        ] {
            assert_eq!(Direction::from_class_id(d.class_id()), Some(d));
        }
        assert_eq!(Direction::from_class_id(3), None);
    }

    #[test]
    fn test_from_prices_rejects_zero_entry() {
        assert_eq!(Direction::from_prices(0.0, 10.0), None);
        assert_eq!(Direction::from_prices(100.0, 103.0), Some(Direction::StrongBuy));
    }
}
