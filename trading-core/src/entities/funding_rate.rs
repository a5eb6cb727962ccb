use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::Timestamp;

/// Perpetual funding rate observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    /// Rate as a fraction (0.0001 == 1bp), already converted from venue percent units
    pub funding_rate: Option<Decimal>,
    pub next_funding_rate: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub index_price: Option<Decimal>,
    pub funding_timestamp: Option<Timestamp>,
    pub timestamp: Option<Timestamp>,
}
