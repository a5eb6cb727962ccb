use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::Timestamp;

/// 24h market summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub index_price: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub timestamp: Option<Timestamp>,
}

/// Best bid / best ask quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidAsk {
    pub symbol: String,
    pub bid: Decimal,
    pub bid_volume: Option<Decimal>,
    pub ask: Decimal,
    pub ask_volume: Option<Decimal>,
    pub timestamp: Option<Timestamp>,
}

impl BidAsk {
    /// Venues occasionally publish crossed or equal quotes; those are not usable
    pub fn is_crossed(&self) -> bool {
        self.ask <= self.bid
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_crossed_quote() {
        let mut quote = BidAsk {
            symbol: "ETH-USD-PERP".to_string(),
            bid: dec!(3000),
            bid_volume: None,
            ask: dec!(3001),
            ask_volume: None,
            timestamp: None,
        };
        assert!(!quote.is_crossed());
        assert_eq!(quote.spread(), dec!(1));

        quote.ask = dec!(3000);
        assert!(quote.is_crossed());
    }
}
