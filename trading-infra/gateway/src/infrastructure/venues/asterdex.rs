//! AsterDEX perpetuals (Binance futures wire format)

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use trading_core::{
    BidAsk, FundingRate, Order, OrderStatus, Position, PositionSide, Side, Ticker, Trade,
};

use super::{RequestIds, decimal, price_levels, text, timestamp};
use crate::domain::{
    BookDelta, ChannelRequest, ControlFrame, InboundFrame, Topic, Unsubscribe, VenueAdapter,
    VenueEvent, VenueId,
};
use crate::error::{ErrorTable, RejectionKind, StreamError};

pub const DEFAULT_WS_URL: &str = "wss://fstream.asterdex.com/ws";

/// Channel shared by every private topic; the listen key in the URL selects it
const USER_DATA_CHANNEL: &str = "userData";

/// Subscription request frame
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "UPPERCASE")]
enum WsRequest {
    Subscribe { id: u64, params: Vec<String> },
    Unsubscribe { id: u64, params: Vec<String> },
}

pub struct AsterdexAdapter {
    venue: VenueId,
    ws_url: String,
    ids: RequestIds,
    errors: ErrorTable,
}

impl AsterdexAdapter {
    pub fn new(ws_url: &str) -> Self {
        AsterdexAdapter {
            venue: VenueId::asterdex(),
            ws_url: ws_url.trim_end_matches('/').to_string(),
            ids: RequestIds::new(),
            errors: error_table(),
        }
    }

    fn stream_name(topic: Topic, symbol: Option<&str>) -> Result<String, StreamError> {
        let name = match (topic, symbol.map(str::to_lowercase)) {
            (Topic::Trades, Some(s)) => format!("{}@aggTrade", s),
            (Topic::OrderBook, Some(s)) => format!("{}@depth@100ms", s),
            (Topic::Ticker, Some(s)) => format!("{}@ticker", s),
            (Topic::Ticker, None) => "!ticker@arr".to_string(),
            (Topic::BidAsk, Some(s)) => format!("{}@bookTicker", s),
            (Topic::BidAsk, None) => "!bookTicker".to_string(),
            (Topic::FundingRate, Some(s)) => format!("{}@markPrice@1s", s),
            (Topic::FundingRate, None) => "!markPrice@arr@1s".to_string(),
            (topic, _) => {
                return Err(StreamError::FatalConfiguration(format!(
                    "asterdex has no all-market {} stream",
                    topic
                )));
            }
        };
        Ok(name)
    }

    fn frame(&self, request: &WsRequest) -> Result<String, StreamError> {
        serde_json::to_string(request).map_err(|e| StreamError::FatalConfiguration(e.to_string()))
    }

    fn event(&self, data: &Value) -> Option<Vec<VenueEvent>> {
        let event_type = data.get("e")?.as_str()?;
        let events = match event_type {
            "depthUpdate" => vec![VenueEvent::BookDelta(parse_depth(data)?)],
            "aggTrade" => vec![VenueEvent::Trade(parse_agg_trade(data)?)],
            "bookTicker" => vec![VenueEvent::BidAsk(parse_book_ticker(data)?)],
            "markPriceUpdate" => vec![VenueEvent::FundingRate(parse_mark_price(data)?)],
            "24hrTicker" => vec![VenueEvent::Ticker(parse_ticker(data)?)],
            "ORDER_TRADE_UPDATE" => vec![VenueEvent::Order(parse_order(data)?)],
            "ACCOUNT_UPDATE" => parse_positions(data)?
                .into_iter()
                .map(VenueEvent::Position)
                .collect(),
            _ => {
                debug!(event_type, "asterdex: unhandled event type");
                return None;
            }
        };
        Some(events)
    }

    fn classify_object(&self, value: &Value) -> InboundFrame {
        // combined stream envelope
        if let Some(data) = value.get("data")
            && value.get("stream").is_some()
        {
            return self.classify_value(data);
        }

        let request_id = value.get("id").and_then(Value::as_u64);
        if let Some(error) = value.get("error") {
            return error_frame(request_id, error);
        }
        if value.get("code").is_some() && value.get("msg").is_some() {
            return error_frame(request_id, value);
        }
        if value.get("result").is_some() && request_id.is_some() {
            return InboundFrame::Control(ControlFrame::Ack { request_id });
        }

        if value.get("e").and_then(Value::as_str) == Some("listenKeyExpired") {
            return InboundFrame::Control(ControlFrame::SessionExpired);
        }

        match self.event(value) {
            Some(events) if !events.is_empty() => InboundFrame::Update(events),
            _ => InboundFrame::Ignored,
        }
    }

    fn classify_value(&self, value: &Value) -> InboundFrame {
        match value {
            Value::Array(items) => {
                let events: Vec<VenueEvent> = items
                    .iter()
                    .filter_map(|item| self.event(item))
                    .flatten()
                    .collect();
                if events.is_empty() {
                    InboundFrame::Ignored
                } else {
                    InboundFrame::Aggregate(events)
                }
            }
            Value::Object(_) => self.classify_object(value),
            _ => InboundFrame::Ignored,
        }
    }
}

impl VenueAdapter for AsterdexAdapter {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn supports(&self, _topic: Topic) -> bool {
        true
    }

    fn public_url(&self, _topic: Topic, _symbol: Option<&str>) -> Result<String, StreamError> {
        Ok(self.ws_url.clone())
    }

    fn private_url(&self, token: &str) -> Result<String, StreamError> {
        Ok(format!("{}/{}", self.ws_url, token))
    }

    fn channel(&self, topic: Topic, symbol: Option<&str>) -> Result<ChannelRequest, StreamError> {
        if topic.is_private() {
            return Ok(ChannelRequest {
                channel: USER_DATA_CHANNEL.to_string(),
                subscribe: None,
                unsubscribe: Unsubscribe::CloseConnection,
                request_id: None,
                resend_on_reconnect: true,
            });
        }

        let stream = Self::stream_name(topic, symbol)?;
        let id = self.ids.next();
        let subscribe = self.frame(&WsRequest::Subscribe {
            id,
            params: vec![stream.clone()],
        })?;
        let unsubscribe = self.frame(&WsRequest::Unsubscribe {
            id: self.ids.next(),
            params: vec![stream.clone()],
        })?;

        Ok(ChannelRequest {
            channel: stream,
            subscribe: Some(subscribe),
            unsubscribe: Unsubscribe::Frame(unsubscribe),
            request_id: Some(id),
            resend_on_reconnect: true,
        })
    }

    fn classify(&self, raw: &str) -> InboundFrame {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.classify_value(&value),
            Err(e) => {
                debug!(error = %e, "asterdex: unparseable frame");
                InboundFrame::Ignored
            }
        }
    }

    fn error_table(&self) -> &ErrorTable {
        &self.errors
    }
}

fn error_table() -> ErrorTable {
    ErrorTable::new()
        .exact_many(&["-1000", "-1007"], RejectionKind::Exchange)
        .exact_many(&["-1001", "-1003"], RejectionKind::RateLimit)
        .exact_many(
            &["-1002", "-1022", "-2014", "-2015"],
            RejectionKind::Authentication,
        )
        .exact("-1006", RejectionKind::DDoSProtection)
        .exact_many(
            &[
                "-1013", "-1021", "-1112", "-1114", "-1115", "-1116", "-1117", "-1125", "-1127",
                "-1130", "-2010", "-3005", "-3010",
            ],
            RejectionKind::InvalidOrder,
        )
        .exact_many(
            &[
                "-1100", "-1101", "-1102", "-1103", "-1104", "-1105", "-1108", "-1110", "-1111",
                "-3011", "-3022", "-3023",
            ],
            RejectionKind::BadRequest,
        )
        .exact("-1121", RejectionKind::BadSymbol)
        .exact("-1147", RejectionKind::InsufficientFunds)
        .exact_many(&["-2011", "-2013"], RejectionKind::OrderNotFound)
        .exact("-3012", RejectionKind::Exchange)
}

fn error_frame(request_id: Option<u64>, error: &Value) -> InboundFrame {
    InboundFrame::Control(ControlFrame::Error {
        request_id,
        code: text(error.get("code")).unwrap_or_default(),
        message: text(error.get("msg")).unwrap_or_default(),
    })
}

fn parse_depth(data: &Value) -> Option<BookDelta> {
    let mut delta = BookDelta::ranged(
        data.get("s")?.as_str()?,
        data.get("U")?.as_u64()?,
        data.get("u")?.as_u64()?,
    )
    .with_levels(price_levels(data.get("b"))?, price_levels(data.get("a"))?);
    delta.prev_seq = data.get("pu").and_then(Value::as_u64);
    if let Some(ts) = timestamp(data.get("T")).or_else(|| timestamp(data.get("E"))) {
        delta = delta.with_timestamp(ts);
    }
    Some(delta)
}

fn parse_agg_trade(data: &Value) -> Option<Trade> {
    // buyer is maker: the aggressor sold
    let side = data
        .get("m")
        .and_then(Value::as_bool)
        .map(|maker| if maker { Side::Sell } else { Side::Buy });
    Some(Trade {
        id: text(data.get("a"))?,
        symbol: data.get("s")?.as_str()?.to_string(),
        side,
        price: decimal(data.get("p"))?,
        amount: decimal(data.get("q"))?,
        timestamp: timestamp(data.get("T"))?,
    })
}

fn parse_book_ticker(data: &Value) -> Option<BidAsk> {
    Some(BidAsk {
        symbol: data.get("s")?.as_str()?.to_string(),
        bid: decimal(data.get("b"))?,
        bid_volume: decimal(data.get("B")),
        ask: decimal(data.get("a"))?,
        ask_volume: decimal(data.get("A")),
        timestamp: timestamp(data.get("T")).or_else(|| timestamp(data.get("E"))),
    })
}

fn parse_mark_price(data: &Value) -> Option<FundingRate> {
    Some(FundingRate {
        symbol: data.get("s")?.as_str()?.to_string(),
        funding_rate: decimal(data.get("r")),
        next_funding_rate: None,
        mark_price: decimal(data.get("p")),
        index_price: decimal(data.get("i")),
        funding_timestamp: timestamp(data.get("T")),
        timestamp: timestamp(data.get("E")),
    })
}

fn parse_ticker(data: &Value) -> Option<Ticker> {
    Some(Ticker {
        symbol: data.get("s")?.as_str()?.to_string(),
        last: decimal(data.get("c")),
        bid: decimal(data.get("b")),
        ask: decimal(data.get("a")),
        mark_price: None,
        index_price: None,
        volume_24h: decimal(data.get("v")),
        timestamp: timestamp(data.get("E")),
    })
}

fn parse_order(data: &Value) -> Option<Order> {
    let order = data.get("o")?;
    // market orders report a zero price
    let price = decimal(order.get("p")).filter(|p| !p.is_zero());
    Some(Order {
        id: text(order.get("i"))?,
        client_order_id: text(order.get("c")).filter(|c| !c.is_empty()),
        symbol: order.get("s")?.as_str()?.to_string(),
        side: Side::parse(order.get("S")?.as_str()?)?,
        order_type: order.get("o")?.as_str()?.to_lowercase(),
        status: OrderStatus::parse(order.get("X")?.as_str()?)?,
        price,
        amount: decimal(order.get("q"))?,
        filled: decimal(order.get("z")).unwrap_or(Decimal::ZERO),
        timestamp: timestamp(data.get("T")).or_else(|| timestamp(data.get("E")))?,
    })
}

fn parse_positions(data: &Value) -> Option<Vec<Position>> {
    let ts = timestamp(data.get("T")).or_else(|| timestamp(data.get("E")))?;
    let positions = data.get("a")?.get("P")?.as_array()?;
    Some(
        positions
            .iter()
            .filter_map(|p| {
                Some(Position {
                    symbol: p.get("s")?.as_str()?.to_string(),
                    side: PositionSide::parse(p.get("ps")?.as_str()?)?,
                    contracts: decimal(p.get("pa"))?,
                    entry_price: decimal(p.get("ep")).filter(|e| !e.is_zero()),
                    unrealized_pnl: decimal(p.get("up")),
                    timestamp: ts,
                })
            })
            .collect(),
    )
}
