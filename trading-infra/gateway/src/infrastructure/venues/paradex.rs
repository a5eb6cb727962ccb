//! Paradex perpetuals (JSON-RPC subscriptions)

use serde_json::{Value, json};
use tracing::debug;
use trading_core::{BidAsk, FundingRate, PriceLevel, Side, Ticker, Trade};

use super::{RequestIds, decimal, text, timestamp};
use crate::domain::{
    BookSnapshot, ChannelRequest, ControlFrame, InboundFrame, Topic, Unsubscribe, VenueAdapter,
    VenueEvent, VenueId,
};
use crate::error::{ErrorTable, RejectionKind, StreamError};

pub const DEFAULT_WS_URL: &str = "wss://ws.api.prod.paradex.trade/v1";

/// Depth and refresh rate of the pushed book snapshots
const BOOK_CHANNEL_SUFFIX: &str = "snapshot@15@100ms";

pub struct ParadexAdapter {
    venue: VenueId,
    ws_url: String,
    ids: RequestIds,
    errors: ErrorTable,
}

impl ParadexAdapter {
    pub fn new(ws_url: &str) -> Self {
        ParadexAdapter {
            venue: VenueId::paradex(),
            ws_url: ws_url.to_string(),
            ids: RequestIds::new(),
            errors: ErrorTable::new()
                .exact_many(&["-32600", "-32601", "-32602"], RejectionKind::BadRequest)
                .exact("-32603", RejectionKind::Exchange)
                .broad("invalid channel", RejectionKind::BadSymbol)
                .broad("rate limit", RejectionKind::RateLimit)
                .broad("unauthorized", RejectionKind::Authentication),
        }
    }

    fn channel_name(topic: Topic, symbol: Option<&str>) -> Result<String, StreamError> {
        let name = match (topic, symbol) {
            (Topic::Trades, Some(m)) => format!("trades.{}", m),
            (Topic::Trades, None) => "trades.ALL".to_string(),
            (Topic::OrderBook, Some(m)) => format!("order_book.{}.{}", m, BOOK_CHANNEL_SUFFIX),
            // one summary channel carries every market
            (Topic::Ticker | Topic::FundingRate, _) => "markets_summary".to_string(),
            (Topic::BidAsk, Some(m)) => format!("bbo.{}", m),
            (Topic::BidAsk, None) => "bbo.ALL".to_string(),
            (topic, _) => {
                return Err(StreamError::FatalConfiguration(format!(
                    "paradex has no {} stream for {}",
                    topic,
                    symbol.unwrap_or("all markets")
                )));
            }
        };
        Ok(name)
    }

    fn request(method: &str, channel: &str, id: u64) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": { "channel": channel },
            "id": id,
        })
        .to_string()
    }

    fn subscription(&self, params: &Value) -> InboundFrame {
        let Some(channel) = params.get("channel").and_then(Value::as_str) else {
            return InboundFrame::Ignored;
        };
        let Some(data) = params.get("data") else {
            return InboundFrame::Ignored;
        };
        let prefix = channel.split('.').next().unwrap_or_default();

        let events = match prefix {
            "trades" => parse_trade(data).map(|t| vec![VenueEvent::Trade(t)]),
            "order_book" => parse_book(data).map(|b| vec![VenueEvent::BookSnapshot(b)]),
            "markets_summary" => parse_summary(data),
            "bbo" => parse_bbo(data).map(|b| vec![VenueEvent::BidAsk(b)]),
            _ => None,
        };

        match events {
            Some(events) => InboundFrame::Update(events),
            None => {
                debug!(channel, "paradex: skipped subscription frame");
                InboundFrame::Ignored
            }
        }
    }
}

impl VenueAdapter for ParadexAdapter {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn supports(&self, topic: Topic) -> bool {
        !topic.is_private()
    }

    fn public_url(&self, _topic: Topic, _symbol: Option<&str>) -> Result<String, StreamError> {
        Ok(self.ws_url.clone())
    }

    fn channel(&self, topic: Topic, symbol: Option<&str>) -> Result<ChannelRequest, StreamError> {
        let channel = Self::channel_name(topic, symbol)?;
        let id = self.ids.next();
        Ok(ChannelRequest {
            subscribe: Some(Self::request("subscribe", &channel, id)),
            unsubscribe: Unsubscribe::Frame(Self::request("unsubscribe", &channel, self.ids.next())),
            request_id: Some(id),
            resend_on_reconnect: true,
            channel,
        })
    }

    fn classify(&self, raw: &str) -> InboundFrame {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "paradex: unparseable frame");
                return InboundFrame::Ignored;
            }
        };
        let request_id = value.get("id").and_then(Value::as_u64);

        if let Some(error) = value.get("error") {
            let mut message = text(error.get("message")).unwrap_or_default();
            if let Some(detail) = text(error.get("data")) {
                message = format!("{}: {}", message, detail);
            }
            return InboundFrame::Control(ControlFrame::Error {
                request_id,
                code: text(error.get("code")).unwrap_or_default(),
                message,
            });
        }
        if value.get("result").is_some() {
            return InboundFrame::Control(ControlFrame::Ack { request_id });
        }
        match value.get("params") {
            Some(params) if value.get("method").and_then(Value::as_str) == Some("subscription") => {
                self.subscription(params)
            }
            _ => InboundFrame::Ignored,
        }
    }

    fn error_table(&self) -> &ErrorTable {
        &self.errors
    }
}

fn parse_trade(data: &Value) -> Option<Trade> {
    Some(Trade {
        id: text(data.get("id"))?,
        symbol: data.get("market")?.as_str()?.to_string(),
        side: data.get("side").and_then(Value::as_str).and_then(Side::parse),
        price: decimal(data.get("price"))?,
        amount: decimal(data.get("size"))?,
        timestamp: timestamp(data.get("created_at"))?,
    })
}

fn parse_book(data: &Value) -> Option<BookSnapshot> {
    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for insert in data.get("inserts")?.as_array()? {
        let level = PriceLevel::new(decimal(insert.get("price"))?, decimal(insert.get("size"))?);
        match insert.get("side").and_then(Value::as_str) {
            Some("BUY") => bids.push(level),
            _ => asks.push(level),
        }
    }
    Some(BookSnapshot {
        symbol: data.get("market")?.as_str()?.to_string(),
        sequence: data.get("seq_no")?.as_u64()?,
        bids,
        asks,
        timestamp: timestamp(data.get("last_updated_at")),
    })
}

fn parse_summary(data: &Value) -> Option<Vec<VenueEvent>> {
    let symbol = data.get("symbol")?.as_str()?.to_string();
    let ts = timestamp(data.get("created_at"));
    let ticker = Ticker {
        symbol: symbol.clone(),
        last: decimal(data.get("last_traded_price")),
        bid: decimal(data.get("bid")),
        ask: decimal(data.get("ask")),
        mark_price: decimal(data.get("mark_price")),
        index_price: decimal(data.get("underlying_price")),
        volume_24h: decimal(data.get("volume_24h")),
        timestamp: ts,
    };
    let funding = FundingRate {
        symbol,
        funding_rate: decimal(data.get("funding_rate")),
        next_funding_rate: None,
        mark_price: decimal(data.get("mark_price")),
        index_price: decimal(data.get("underlying_price")),
        funding_timestamp: None,
        timestamp: ts,
    };
    let mut events = vec![VenueEvent::Ticker(ticker), VenueEvent::FundingRate(funding)];
    if let Some(quote) = quote(data, "symbol", "created_at") {
        events.push(VenueEvent::BidAsk(quote));
    }
    Some(events)
}

fn parse_bbo(data: &Value) -> Option<BidAsk> {
    quote(data, "market", "last_updated_at")
}

/// Best bid/ask; crossed or locked quotes are dropped
fn quote(data: &Value, symbol_field: &str, time_field: &str) -> Option<BidAsk> {
    let quote = BidAsk {
        symbol: data.get(symbol_field)?.as_str()?.to_string(),
        bid: decimal(data.get("bid"))?,
        bid_volume: decimal(data.get("bid_size")),
        ask: decimal(data.get("ask"))?,
        ask_volume: decimal(data.get("ask_size")),
        timestamp: timestamp(data.get(time_field)),
    };
    (quote.ask > quote.bid).then_some(quote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> ParadexAdapter {
        ParadexAdapter::new(DEFAULT_WS_URL)
    }

    #[test]
    fn test_channels() {
        let adapter = adapter();
        let book = adapter.channel(Topic::OrderBook, Some("BTC-USD-PERP")).unwrap();
        assert_eq!(book.channel, "order_book.BTC-USD-PERP.snapshot@15@100ms");
        let frame: Value = serde_json::from_str(book.subscribe.as_deref().unwrap()).unwrap();
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["method"], "subscribe");
        assert_eq!(frame["params"]["channel"], "order_book.BTC-USD-PERP.snapshot@15@100ms");

        assert_eq!(adapter.channel(Topic::Trades, None).unwrap().channel, "trades.ALL");
        assert_eq!(
            adapter.channel(Topic::FundingRate, Some("ETH-USD-PERP")).unwrap().channel,
            adapter.channel(Topic::Ticker, None).unwrap().channel
        );
        assert!(!adapter.supports(Topic::Orders));
        assert!(adapter.private_url("token").is_err());
    }

    #[test]
    fn test_parse_trade() {
        let raw = r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"trades.ALL",
            "data":{"id":"1718179273230201709233240002","market":"kBONK-USD-PERP","side":"BUY",
            "size":"34028","price":"0.028776","created_at":1718179273230,"trade_type":"FILL"}}}"#;
        match adapter().classify(raw) {
            InboundFrame::Update(events) => match &events[0] {
                VenueEvent::Trade(trade) => {
                    assert_eq!(trade.symbol, "kBONK-USD-PERP");
                    assert_eq!(trade.side, Some(Side::Buy));
                    assert_eq!(trade.amount, dec!(34028));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_book_snapshot() {
        let raw = r#"{"jsonrpc":"2.0","method":"subscription","params":{
            "channel":"order_book.BTC-USD-PERP.snapshot@15@100ms",
            "data":{"seq_no":14127815,"market":"BTC-USD-PERP","last_updated_at":1718267837265,
            "update_type":"s","inserts":[{"side":"BUY","price":"67629.7","size":"0.992"},
            {"side":"SELL","price":"69378.6","size":"3.137"}],"updates":[],"deletes":[]}}}"#;
        match adapter().classify(raw) {
            InboundFrame::Update(events) => match &events[0] {
                VenueEvent::BookSnapshot(book) => {
                    assert_eq!(book.sequence, 14127815);
                    assert_eq!(book.bids, vec![PriceLevel::new(dec!(67629.7), dec!(0.992))]);
                    assert_eq!(book.asks.len(), 1);
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_summary_yields_ticker_funding_and_quote() {
        let raw = r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"markets_summary",
            "data":{"symbol":"ORDI-USD-PERP","oracle_price":"49.80885481","mark_price":"49.80885481",
            "last_traded_price":"62.038","bid":"49.822","ask":"58.167","volume_24h":"0",
            "created_at":1718334307698,"underlying_price":"47.93","funding_rate":"0.03919997509811",
            "price_change_rate_24h":""}}}"#;
        match adapter().classify(raw) {
            InboundFrame::Update(events) => {
                assert_eq!(events.len(), 3);
                assert_eq!(events[0].topic(), Topic::Ticker);
                assert_eq!(events[2].topic(), Topic::BidAsk);
                match &events[1] {
                    VenueEvent::FundingRate(rate) => {
                        assert_eq!(rate.funding_rate, Some(dec!(0.03919997509811)));
                        assert_eq!(rate.index_price, Some(dec!(47.93)));
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_crossed_bbo_is_dropped() {
        let frame = |bid: &str, ask: &str| {
            format!(
                r#"{{"jsonrpc":"2.0","method":"subscription","params":{{"channel":"bbo.BTC-USD-PERP",
                "data":{{"seq_no":153,"market":"BTC-USD-PERP","last_updated_at":1700000000000,
                "bid":"{}","bid_size":"0.1","ask":"{}","ask_size":"0.2"}}}}}}"#,
                bid, ask
            )
        };
        let adapter = adapter();
        assert!(matches!(adapter.classify(&frame("67000", "67001")), InboundFrame::Update(_)));
        assert_eq!(adapter.classify(&frame("67001", "67001")), InboundFrame::Ignored);
        assert_eq!(adapter.classify(&frame("67002", "67001")), InboundFrame::Ignored);
    }

    #[test]
    fn test_error_frame() {
        let raw = r#"{"jsonrpc":"2.0","id":0,"error":{"code":-32600,
            "message":"invalid subscribe request","data":"invalid channel"}}"#;
        let adapter = adapter();
        match adapter.classify(raw) {
            InboundFrame::Control(ControlFrame::Error {
                request_id,
                code,
                message,
            }) => {
                assert_eq!(request_id, Some(0));
                assert_eq!(code, "-32600");
                assert!(message.contains("invalid channel"));
                assert_eq!(adapter.error_table().classify(&code, &message), RejectionKind::BadRequest);
                assert_eq!(
                    adapter.error_table().classify("-1", &message),
                    RejectionKind::BadSymbol
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
