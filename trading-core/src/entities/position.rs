use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{PositionSide, Timestamp};

/// Current account position for one (symbol, side)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Signed size as reported by the venue
    pub contracts: Decimal,
    pub entry_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub timestamp: Timestamp,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.contracts.is_zero()
    }
}
