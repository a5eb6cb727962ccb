use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Side, Timestamp};

/// A public trade print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue trade id
    pub id: String,
    pub symbol: String,
    /// Aggressor side, when the venue reports it
    pub side: Option<Side>,
    pub price: Decimal,
    pub amount: Decimal,
    pub timestamp: Timestamp,
}

impl Trade {
    /// Quote notional of the print
    pub fn cost(&self) -> Decimal {
        self.price * self.amount
    }
}
