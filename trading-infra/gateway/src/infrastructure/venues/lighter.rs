//! Lighter market statistics stream

use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use trading_core::{BidAsk, FundingRate};

use super::{decimal, text, timestamp};
use crate::domain::{
    ChannelRequest, ClientKeepalive, ControlFrame, InboundFrame, Topic, Unsubscribe, VenueAdapter,
    VenueEvent, VenueId,
};
use crate::error::{ErrorTable, RejectionKind, StreamError};

pub const DEFAULT_WS_URL: &str = "wss://mainnet.zklighter.elliot.ai/stream";

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

pub struct LighterAdapter {
    venue: VenueId,
    ws_url: String,
    errors: ErrorTable,
}

impl LighterAdapter {
    pub fn new(ws_url: &str) -> Self {
        LighterAdapter {
            venue: VenueId::lighter(),
            ws_url: ws_url.to_string(),
            errors: ErrorTable::new()
                .broad("too many", RejectionKind::RateLimit)
                .broad("invalid channel", RejectionKind::BadSymbol),
        }
    }

    fn frame(kind: &str, channel: &str) -> String {
        json!({ "type": kind, "channel": channel }).to_string()
    }

    fn market_stats(&self, message: &Value) -> InboundFrame {
        let Some(stats) = message.get("market_stats") else {
            return InboundFrame::Ignored;
        };
        let aggregate = message
            .get("channel")
            .and_then(Value::as_str)
            .is_some_and(|c| c.ends_with("all"));

        // one entry, a list, or a map keyed by market id
        let entries: Vec<&Value> = match stats {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) if map.contains_key("market_id") => vec![stats],
            Value::Object(map) => map.values().collect(),
            _ => Vec::new(),
        };

        let mut events = Vec::with_capacity(entries.len() * 2);
        for entry in entries {
            if let Some(rate) = parse_funding(entry) {
                events.push(VenueEvent::FundingRate(rate));
            }
            if let Some(quote) = parse_bid_ask(entry) {
                events.push(VenueEvent::BidAsk(quote));
            }
        }

        if events.is_empty() {
            InboundFrame::Ignored
        } else if aggregate || events.len() > 2 {
            InboundFrame::Aggregate(events)
        } else {
            InboundFrame::Update(events)
        }
    }
}

impl VenueAdapter for LighterAdapter {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn supports(&self, topic: Topic) -> bool {
        matches!(topic, Topic::FundingRate | Topic::BidAsk)
    }

    fn public_url(&self, _topic: Topic, _symbol: Option<&str>) -> Result<String, StreamError> {
        Ok(self.ws_url.clone())
    }

    fn channel(&self, topic: Topic, symbol: Option<&str>) -> Result<ChannelRequest, StreamError> {
        if !self.supports(topic) {
            return Err(StreamError::FatalConfiguration(format!(
                "lighter has no {} stream",
                topic
            )));
        }
        // funding and quotes share the per-market statistics channel
        let channel = format!("market_stats/{}", symbol.unwrap_or("all"));
        Ok(ChannelRequest {
            subscribe: Some(Self::frame("subscribe", &channel)),
            unsubscribe: Unsubscribe::Frame(Self::frame("unsubscribe", &channel)),
            request_id: None,
            resend_on_reconnect: true,
            channel,
        })
    }

    fn classify(&self, raw: &str) -> InboundFrame {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "lighter: unparseable frame");
                return InboundFrame::Ignored;
            }
        };

        if let Some(error) = value.get("error") {
            return InboundFrame::Control(ControlFrame::Error {
                request_id: None,
                code: text(error.get("code")).unwrap_or_default(),
                message: text(error.get("message")).unwrap_or_default(),
            });
        }

        match value.get("type").and_then(Value::as_str) {
            Some("ping") => InboundFrame::Control(ControlFrame::Ping {
                reply: Some(json!({ "type": "pong" }).to_string()),
            }),
            Some("pong") => InboundFrame::Control(ControlFrame::Pong),
            Some("connected") => InboundFrame::Control(ControlFrame::Welcome),
            Some(t) if t.starts_with("subscribed/") => {
                InboundFrame::Control(ControlFrame::Ack { request_id: None })
            }
            Some("update/market_stats") => self.market_stats(&value),
            _ => InboundFrame::Ignored,
        }
    }

    fn keepalive(&self) -> Option<ClientKeepalive> {
        Some(ClientKeepalive {
            interval: KEEPALIVE_INTERVAL,
            frame: json!({ "type": "ping" }).to_string(),
        })
    }

    fn error_table(&self) -> &ErrorTable {
        &self.errors
    }
}

/// Rates arrive in percent
fn percent(value: Option<&Value>) -> Option<Decimal> {
    decimal(value).map(|v| v / Decimal::ONE_HUNDRED)
}

fn parse_funding(stats: &Value) -> Option<FundingRate> {
    let funding_rate = percent(stats.get("funding_rate"));
    let next_funding_rate = percent(stats.get("current_funding_rate"));
    if funding_rate.is_none() && next_funding_rate.is_none() {
        return None;
    }
    let ts = timestamp(stats.get("funding_timestamp"));
    Some(FundingRate {
        symbol: text(stats.get("market_id"))?,
        funding_rate,
        next_funding_rate,
        mark_price: decimal(stats.get("mark_price")),
        index_price: decimal(stats.get("index_price")),
        funding_timestamp: ts,
        timestamp: ts,
    })
}

/// Quotes only when both sides are present; nothing is synthesized from last price
fn parse_bid_ask(stats: &Value) -> Option<BidAsk> {
    let bid = decimal(stats.get("best_bid_price")).or_else(|| decimal(stats.get("best_bid")))?;
    let ask = decimal(stats.get("best_ask_price")).or_else(|| decimal(stats.get("best_ask")))?;
    Some(BidAsk {
        symbol: text(stats.get("market_id"))?,
        bid,
        bid_volume: decimal(stats.get("best_bid_size"))
            .or_else(|| decimal(stats.get("best_bid_quantity"))),
        ask,
        ask_volume: decimal(stats.get("best_ask_size"))
            .or_else(|| decimal(stats.get("best_ask_quantity"))),
        timestamp: timestamp(stats.get("timestamp")),
    })
}
