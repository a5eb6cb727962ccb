use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a venue
///
/// Venue IDs are normalized to lowercase (e.g., "Paradex" becomes "paradex").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueId(String);

impl VenueId {
    /// Create a new venue ID (normalized to lowercase)
    pub fn new(id: impl Into<String>) -> Self {
        VenueId(id.into().to_lowercase())
    }

    /// Get the venue ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// AsterDEX perpetuals
    pub fn asterdex() -> Self {
        VenueId::new("asterdex")
    }

    /// Paradex perpetuals
    pub fn paradex() -> Self {
        VenueId::new("paradex")
    }

    /// Lighter
    pub fn lighter() -> Self {
        VenueId::new("lighter")
    }

    /// Extended
    pub fn extended() -> Self {
        VenueId::new("extended")
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        VenueId::new(s)
    }
}

impl From<String> for VenueId {
    fn from(s: String) -> Self {
        VenueId::new(s)
    }
}

/// A symbol qualified with its venue
///
/// Symbols are kept exactly as the venue spells them: market ids such as
/// `kBONK-USD-PERP` are case sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedSymbol {
    /// Venue identifier
    pub venue: VenueId,
    /// Venue-native market id
    pub symbol: String,
}

impl QualifiedSymbol {
    /// Create a new qualified symbol
    pub fn new(venue: impl Into<VenueId>, symbol: impl Into<String>) -> Self {
        QualifiedSymbol {
            venue: venue.into(),
            symbol: symbol.into(),
        }
    }

    /// Parse from "venue:symbol" format
    pub fn parse(s: &str) -> Option<Self> {
        let (venue, symbol) = s.split_once(':')?;
        if venue.is_empty() || symbol.is_empty() {
            return None;
        }
        Some(QualifiedSymbol::new(venue, symbol))
    }
}

impl fmt::Display for QualifiedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.symbol)
    }
}
