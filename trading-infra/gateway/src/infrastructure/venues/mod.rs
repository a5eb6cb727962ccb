//! Venue adapters
//!
//! One adapter per venue. Each owns its URLs, channel naming, subscribe
//! frames and the translation of raw JSON into domain events.

pub mod asterdex;
pub mod extended;
pub mod lighter;
pub mod paradex;

pub use asterdex::AsterdexAdapter;
pub use extended::ExtendedAdapter;
pub use lighter::LighterAdapter;
pub use paradex::ParadexAdapter;

use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use trading_core::{PriceLevel, Timestamp};

use crate::config::{ConfigError, VenueConfig};
use crate::domain::{VenueAdapter, VenueId};

/// Build the adapter for a configured venue
pub fn adapter_for(config: &VenueConfig) -> Result<Arc<dyn VenueAdapter>, ConfigError> {
    let venue = VenueId::new(&config.id);
    let adapter: Arc<dyn VenueAdapter> = match venue.as_str() {
        "asterdex" => Arc::new(AsterdexAdapter::new(&config.ws_url)),
        "paradex" => Arc::new(ParadexAdapter::new(&config.ws_url)),
        "lighter" => Arc::new(LighterAdapter::new(&config.ws_url)),
        "extended" => Arc::new(ExtendedAdapter::new(&config.ws_url)),
        _ => return Err(ConfigError::UnknownVenue(config.id.clone())),
    };
    Ok(adapter)
}

/// Monotonic ids for venue requests
#[derive(Debug)]
pub(crate) struct RequestIds(AtomicU64);

impl RequestIds {
    pub(crate) fn new() -> Self {
        RequestIds(AtomicU64::new(1))
    }

    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Decimal from a JSON string or number; empty strings are absent
pub(crate) fn decimal(value: Option<&Value>) -> Option<Decimal> {
    let text = match value? {
        Value::String(s) if s.is_empty() => return None,
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    text.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(&text).ok())
}

/// Integer from a JSON number or numeric string
pub(crate) fn integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn timestamp(value: Option<&Value>) -> Option<Timestamp> {
    integer(value)
}

/// Text from a JSON string or number
pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `[[price, size], ...]` levels
pub(crate) fn price_levels(value: Option<&Value>) -> Option<Vec<PriceLevel>> {
    value?
        .as_array()?
        .iter()
        .map(|level| {
            let pair = level.as_array()?;
            Some(PriceLevel::new(
                decimal(pair.first())?,
                decimal(pair.get(1))?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_accepts_strings_and_numbers() {
        assert_eq!(decimal(Some(&json!("0.0125"))), Some(dec!(0.0125)));
        assert_eq!(decimal(Some(&json!(42))), Some(dec!(42)));
        assert_eq!(decimal(Some(&json!(""))), None);
        assert_eq!(decimal(Some(&json!(null))), None);
        assert_eq!(decimal(None), None);
    }

    #[test]
    fn test_price_levels() {
        let levels = price_levels(Some(&json!([["100.5", "2"], ["100", "0"]]))).unwrap();
        assert_eq!(levels.len(), 2);
        assert!(levels[1].is_removal());
        assert!(price_levels(Some(&json!([["bad", "1"]]))).is_none());
    }

    #[test]
    fn test_request_ids_increase() {
        let ids = RequestIds::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }
}
