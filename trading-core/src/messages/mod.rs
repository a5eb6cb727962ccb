//! Venue Identifiers
//!
//! Types for identifying venues and symbols across the gateway.

mod exchange;

pub use exchange::{QualifiedSymbol, VenueId};
