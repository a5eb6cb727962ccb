mod funding_rate;
mod order;
mod position;
mod price_level;
mod ticker;
mod trade;

pub use funding_rate::FundingRate;
pub use order::{Order, OrderStatus};
pub use position::Position;
pub use price_level::PriceLevel;
pub use ticker::{BidAsk, Ticker};
pub use trade::Trade;
