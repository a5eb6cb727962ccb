use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Represents a single price level in the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        PriceLevel { price, size }
    }

    /// A zero-size level is a removal instruction in a delta
    pub fn is_removal(&self) -> bool {
        self.size.is_zero()
    }
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, size): (Decimal, Decimal)) -> Self {
        PriceLevel { price, size }
    }
}
