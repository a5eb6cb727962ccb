//! Extended funding streams
//!
//! Every stream has its own URL; nothing is subscribed over the wire.

use serde_json::{Value, json};
use tracing::debug;
use trading_core::FundingRate;

use super::{decimal, timestamp};
use crate::domain::{
    ChannelRequest, ControlFrame, InboundFrame, Topic, Unsubscribe, VenueAdapter, VenueEvent,
    VenueId,
};
use crate::error::{ErrorTable, StreamError};

pub const DEFAULT_WS_URL: &str = "wss://api.starknet.extended.exchange";

const FUNDING_PATH: &str = "/stream.extended.exchange/v1/funding";

pub struct ExtendedAdapter {
    venue: VenueId,
    base_url: String,
    errors: ErrorTable,
}

impl ExtendedAdapter {
    pub fn new(base_url: &str) -> Self {
        ExtendedAdapter {
            venue: VenueId::extended(),
            base_url: base_url.trim_end_matches('/').to_string(),
            errors: ErrorTable::new(),
        }
    }

    fn check(&self, topic: Topic) -> Result<(), StreamError> {
        if self.supports(topic) {
            Ok(())
        } else {
            Err(StreamError::FatalConfiguration(format!(
                "extended has no {} stream",
                topic
            )))
        }
    }
}

impl VenueAdapter for ExtendedAdapter {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn supports(&self, topic: Topic) -> bool {
        topic == Topic::FundingRate
    }

    fn public_url(&self, topic: Topic, symbol: Option<&str>) -> Result<String, StreamError> {
        self.check(topic)?;
        Ok(match symbol {
            Some(market) => format!("{}{}/{}", self.base_url, FUNDING_PATH, market),
            None => format!("{}{}", self.base_url, FUNDING_PATH),
        })
    }

    fn channel(&self, topic: Topic, symbol: Option<&str>) -> Result<ChannelRequest, StreamError> {
        self.check(topic)?;
        Ok(ChannelRequest {
            channel: match symbol {
                Some(market) => format!("funding/{}", market),
                None => "funding".to_string(),
            },
            subscribe: None,
            unsubscribe: Unsubscribe::CloseConnection,
            request_id: None,
            resend_on_reconnect: true,
        })
    }

    fn classify(&self, raw: &str) -> InboundFrame {
        if raw.trim() == "pong" {
            return InboundFrame::Control(ControlFrame::Pong);
        }
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "extended: unparseable frame");
                return InboundFrame::Ignored;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("ping") {
            return InboundFrame::Control(ControlFrame::Ping {
                reply: Some(json!({ "type": "pong" }).to_string()),
            });
        }

        match value.get("data") {
            Some(Value::Array(items)) => {
                let events: Vec<VenueEvent> = items
                    .iter()
                    .filter_map(parse_funding)
                    .map(VenueEvent::FundingRate)
                    .collect();
                if events.is_empty() {
                    InboundFrame::Ignored
                } else {
                    InboundFrame::Aggregate(events)
                }
            }
            Some(data) => match parse_funding(data) {
                Some(rate) => InboundFrame::Update(vec![VenueEvent::FundingRate(rate)]),
                None => InboundFrame::Ignored,
            },
            None => InboundFrame::Ignored,
        }
    }

    fn error_table(&self) -> &ErrorTable {
        &self.errors
    }
}

fn parse_funding(data: &Value) -> Option<FundingRate> {
    let ts = timestamp(data.get("T"));
    Some(FundingRate {
        symbol: data.get("m")?.as_str()?.to_string(),
        funding_rate: decimal(data.get("f")),
        next_funding_rate: None,
        mark_price: None,
        index_price: None,
        funding_timestamp: ts,
        timestamp: ts,
    })
}
