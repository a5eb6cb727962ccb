//! Integration test: StreamEngine <-> scripted venue connections
//!
//! A mock transport hands every connection the engine opens to the test,
//! which plays the venue: it reads subscribe frames and pushes raw frames
//! back exactly as the venue would.

use async_trait::async_trait;
use gateway::infrastructure::{AsterdexAdapter, ExtendedAdapter, LighterAdapter, ParadexAdapter};
use gateway::{
    BackoffPolicy, BookSnapshot, BookState, ErrorKind, FetchError, MarketEvent, MarketStream,
    SessionGrant, SessionIssuer, SessionState, SnapshotFetcher, StreamEngine, StreamError, Topic,
    Transport, TransportChannels, TransportError, VenueId, VenueRegistration, WireMessage,
};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use trading_core::PriceLevel;

const WAIT: Duration = Duration::from_secs(2);

/// The venue side of one connection
struct Peer {
    url: String,
    sent: mpsc::Receiver<WireMessage>,
    push: mpsc::Sender<WireMessage>,
}

impl Peer {
    /// Next text frame the engine sent
    async fn frame(&mut self) -> Value {
        loop {
            match timeout(WAIT, self.sent.recv()).await.expect("no frame from engine") {
                Some(WireMessage::Text(text)) => {
                    return serde_json::from_str(&text).expect("engine sent invalid JSON");
                }
                Some(_) => continue,
                None => panic!("engine closed the connection"),
            }
        }
    }

    /// True when no text frame arrives within `window`
    async fn quiet(&mut self, window: Duration) -> bool {
        loop {
            match timeout(window, self.sent.recv()).await {
                Err(_) => return true,
                Ok(Some(WireMessage::Text(_))) => return false,
                Ok(Some(_)) => continue,
                Ok(None) => return true,
            }
        }
    }

    async fn send(&self, raw: &str) {
        self.push
            .send(WireMessage::Text(raw.to_string()))
            .await
            .expect("engine dropped the connection");
    }

    /// Wait for the engine to close its side
    async fn closed(&mut self) -> bool {
        loop {
            match timeout(WAIT, self.sent.recv()).await {
                Ok(Some(WireMessage::Close)) | Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}

/// Refuses every connection
struct UnreachableTransport {
    attempts: AtomicUsize,
}

#[async_trait]
impl Transport for UnreachableTransport {
    async fn connect(&self, url: &str) -> Result<TransportChannels, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Connection(format!("{} refused", url)))
    }
}

struct MockTransport {
    peers: mpsc::UnboundedSender<Peer>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<TransportChannels, TransportError> {
        let (outbound, sent) = mpsc::channel(64);
        let (push, inbound) = mpsc::channel(64);
        self.peers
            .send(Peer {
                url: url.to_string(),
                sent,
                push,
            })
            .map_err(|_| TransportError::Connection("test finished".to_string()))?;
        Ok(TransportChannels { outbound, inbound })
    }
}

/// Serves scripted snapshot sequences; the last one repeats
struct MockFetcher {
    calls: AtomicUsize,
    sequences: Mutex<VecDeque<u64>>,
}

impl MockFetcher {
    fn new(sequences: &[u64]) -> Arc<Self> {
        Arc::new(MockFetcher {
            calls: AtomicUsize::new(0),
            sequences: Mutex::new(sequences.iter().copied().collect()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotFetcher for MockFetcher {
    async fn fetch_snapshot(&self, symbol: &str, _depth: usize) -> Result<BookSnapshot, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sequence = {
            let mut sequences = self.sequences.lock();
            if sequences.len() > 1 {
                sequences.pop_front()
            } else {
                sequences.front().copied()
            }
        }
        .ok_or_else(|| FetchError::Network("no snapshot scripted".to_string()))?;

        Ok(BookSnapshot {
            symbol: symbol.to_string(),
            sequence,
            bids: vec![PriceLevel::new(dec!(100), dec!(1))],
            asks: vec![PriceLevel::new(dec!(101), dec!(1))],
            timestamp: None,
        })
    }
}

struct MockIssuer;

#[async_trait]
impl SessionIssuer for MockIssuer {
    async fn issue(&self) -> Result<SessionGrant, FetchError> {
        Ok(SessionGrant {
            token: "listen-key-1".to_string(),
            validity: Duration::from_secs(3600),
        })
    }

    async fn renew(&self, _token: &str) -> Result<(), FetchError> {
        Ok(())
    }
}

struct Harness {
    engine: StreamEngine,
    peers: mpsc::UnboundedReceiver<Peer>,
}

fn fast_backoff(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_attempts,
        jitter: 0.0,
    }
}

impl Harness {
    fn new(venues: Vec<VenueRegistration>) -> Self {
        Self::with_heartbeat(venues, Duration::ZERO)
    }

    fn with_heartbeat(venues: Vec<VenueRegistration>, heartbeat: Duration) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let (tx, peers) = mpsc::unbounded_channel();
        let builder = StreamEngine::builder()
            .transport(Arc::new(MockTransport { peers: tx }))
            .backoff(fast_backoff(0))
            .heartbeat_timeout(heartbeat);
        let engine = venues
            .into_iter()
            .fold(builder, |builder, venue| builder.venue(venue))
            .build()
            .expect("engine should build");
        Harness { engine, peers }
    }

    async fn peer(&mut self) -> Peer {
        timeout(WAIT, self.peers.recv())
            .await
            .expect("engine never connected")
            .expect("transport gone")
    }
}

fn paradex() -> VenueRegistration {
    VenueRegistration::new(Arc::new(ParadexAdapter::new("wss://paradex.test/v1")))
}

fn asterdex(fetcher: Arc<MockFetcher>) -> VenueRegistration {
    VenueRegistration::new(Arc::new(AsterdexAdapter::new("wss://asterdex.test/ws")))
        .with_fetcher(fetcher)
}

async fn events(stream: &mut MarketStream) -> Vec<MarketEvent> {
    stream.recv_timeout(WAIT).await.expect("stream failed")
}

/// Read books until one at `sequence` arrives
async fn book_at(stream: &mut MarketStream, sequence: u64) -> Arc<gateway::OrderBookSnapshot> {
    loop {
        for event in events(stream).await {
            if let MarketEvent::OrderBook(book) = event
                && book.sequence == sequence
            {
                return book;
            }
        }
    }
}

fn depth_update(first: u64, last: u64, prev: u64) -> String {
    format!(
        r#"{{"e":"depthUpdate","E":1700000000001,"T":1700000000000,"s":"BTCUSDT",
            "U":{},"u":{},"pu":{},"b":[["99.5","2"]],"a":[]}}"#,
        first, last, prev
    )
}

fn paradex_trade(market: &str, id: u64) -> String {
    format!(
        r#"{{"jsonrpc":"2.0","method":"subscription","params":{{"channel":"trades.{m}",
            "data":{{"id":"{id}","market":"{m}","side":"BUY","price":"65000.5","size":"0.25",
            "created_at":1700000000000}}}}}}"#,
        m = market,
        id = id
    )
}

/// Subscribe frames name their channel differently per venue
fn asterdex_stream(frame: &Value) -> String {
    assert_eq!(frame["method"], "SUBSCRIBE");
    frame["params"][0].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_shared_subscription_fans_out() {
    let mut harness = Harness::new(vec![paradex()]);
    let venue = VenueId::paradex();

    let mut first = harness
        .engine
        .subscribe(&venue, Topic::Trades, Some("BTC-USD-PERP"))
        .await
        .unwrap();
    let mut second = harness
        .engine
        .subscribe(&venue, Topic::Trades, Some("BTC-USD-PERP"))
        .await
        .unwrap();

    let mut peer = harness.peer().await;
    let frame = peer.frame().await;
    assert_eq!(frame["method"], "subscribe");
    assert_eq!(frame["params"]["channel"], "trades.BTC-USD-PERP");
    assert!(peer.quiet(Duration::from_millis(100)).await, "second subscriber must not resubscribe");

    peer.send(&paradex_trade("BTC-USD-PERP", 1)).await;

    for stream in [&mut first, &mut second] {
        match events(stream).await.as_slice() {
            [MarketEvent::Trade(trade)] => {
                assert_eq!(trade.price, dec!(65000.5));
                assert_eq!(trade.amount, dec!(0.25));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(harness.engine.trades(&venue, "BTC-USD-PERP", None, None).len(), 1);
    assert_eq!(harness.engine.connection_count(), 1);
    assert_eq!(harness.engine.subscription_count(), 1);

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_book_primes_and_reprimes_after_reconnect() {
    let fetcher = MockFetcher::new(&[100, 300]);
    let mut harness = Harness::new(vec![asterdex(Arc::clone(&fetcher))]);
    let venue = VenueId::asterdex();

    let mut books = harness
        .engine
        .subscribe(&venue, Topic::OrderBook, Some("BTCUSDT"))
        .await
        .unwrap();
    let _trades = harness
        .engine
        .subscribe(&venue, Topic::Trades, Some("BTCUSDT"))
        .await
        .unwrap();
    let _quotes = harness
        .engine
        .subscribe(&venue, Topic::BidAsk, Some("BTCUSDT"))
        .await
        .unwrap();

    let mut peer = harness.peer().await;
    assert_eq!(peer.url, "wss://asterdex.test/ws");
    let mut channels = Vec::new();
    for _ in 0..3 {
        channels.push(asterdex_stream(&peer.frame().await));
    }
    assert_eq!(
        channels,
        ["btcusdt@depth@100ms", "btcusdt@aggTrade", "btcusdt@bookTicker"]
    );
    assert_eq!(harness.engine.book_state(&venue, "BTCUSDT"), BookState::Unprimed);

    peer.send(&depth_update(100, 101, 99)).await;
    let book = book_at(&mut books, 101).await;
    assert_eq!(book.best_bid().map(|l| l.price), Some(dec!(100)));
    assert_eq!(book.bids.len(), 2);
    assert_eq!(book.best_ask().map(|l| l.price), Some(dec!(101)));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(harness.engine.book_state(&venue, "BTCUSDT"), BookState::Primed);

    drop(peer);

    let mut peer = harness.peer().await;
    let mut channels = Vec::new();
    for _ in 0..3 {
        channels.push(asterdex_stream(&peer.frame().await));
    }
    assert_eq!(channels.len(), 3);
    assert!(channels.contains(&"btcusdt@depth@100ms".to_string()));
    assert_eq!(harness.engine.book_state(&venue, "BTCUSDT"), BookState::Unprimed);
    assert!(harness.engine.order_book(&venue, "BTCUSDT").is_none());

    peer.send(&depth_update(300, 301, 299)).await;
    let book = book_at(&mut books, 301).await;
    assert_eq!(book.sequence, 301);
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(
        harness.engine.order_book(&venue, "BTCUSDT").map(|b| b.sequence),
        Some(301)
    );

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_gap_triggers_single_refetch() {
    let fetcher = MockFetcher::new(&[100, 200]);
    let mut harness = Harness::new(vec![asterdex(Arc::clone(&fetcher))]);
    let venue = VenueId::asterdex();

    let mut books = harness
        .engine
        .subscribe(&venue, Topic::OrderBook, Some("BTCUSDT"))
        .await
        .unwrap();
    let mut peer = harness.peer().await;
    peer.frame().await;

    peer.send(&depth_update(100, 101, 99)).await;
    book_at(&mut books, 101).await;

    // pu=150 does not continue a book at 101
    peer.send(&depth_update(151, 160, 150)).await;
    peer.send(&depth_update(161, 170, 160)).await;

    let book = book_at(&mut books, 200).await;
    assert_eq!(book.sequence, 200);
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(harness.engine.book_state(&venue, "BTCUSDT"), BookState::Primed);

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_timeout_on_one_symbol_leaves_others_alone() {
    let mut harness = Harness::new(vec![paradex()]);
    let venue = VenueId::paradex();

    let mut btc = harness
        .engine
        .subscribe(&venue, Topic::Ticker, Some("BTC-USD-PERP"))
        .await
        .unwrap();
    let mut eth = harness
        .engine
        .subscribe(&venue, Topic::Ticker, Some("ETH-USD-PERP"))
        .await
        .unwrap();

    let mut peer = harness.peer().await;
    let frame = peer.frame().await;
    assert_eq!(frame["params"]["channel"], "markets_summary");
    assert!(peer.quiet(Duration::from_millis(100)).await);

    peer.send(
        r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"markets_summary",
            "data":{"symbol":"BTC-USD-PERP","mark_price":"65010","last_traded_price":"65000",
            "bid":"64999","ask":"65001","funding_rate":"0.0001","created_at":1700000000000}}}"#,
    )
    .await;

    match eth.recv_timeout(Duration::from_millis(200)).await {
        Err(error) => assert_eq!(error.kind(), ErrorKind::Timeout),
        Ok(events) => panic!("ETH got {:?}", events),
    }
    match events(&mut btc).await.as_slice() {
        [MarketEvent::Ticker(ticker)] => assert_eq!(ticker.last, Some(dec!(65000))),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        harness.engine.latest(&venue, "BTC-USD-PERP", Topic::FundingRate),
        Some(MarketEvent::FundingRate(_))
    ));

    // the timed out stream is still subscribed
    peer.send(
        r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"markets_summary",
            "data":{"symbol":"ETH-USD-PERP","last_traded_price":"3500","created_at":1700000000000}}}"#,
    )
    .await;
    match events(&mut eth).await.as_slice() {
        [MarketEvent::Ticker(ticker)] => assert_eq!(ticker.symbol, "ETH-USD-PERP"),
        other => panic!("unexpected {:?}", other),
    }

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_rejection_fails_only_the_rejected_stream() {
    let mut harness = Harness::new(vec![paradex()]);
    let venue = VenueId::paradex();

    let mut good = harness
        .engine
        .subscribe(&venue, Topic::Trades, Some("BTC-USD-PERP"))
        .await
        .unwrap();
    let mut bad = harness
        .engine
        .subscribe(&venue, Topic::Trades, Some("FOO"))
        .await
        .unwrap();

    let mut peer = harness.peer().await;
    let mut rejected_id = None;
    for _ in 0..2 {
        let frame = peer.frame().await;
        if frame["params"]["channel"] == "trades.FOO" {
            rejected_id = frame["id"].as_u64();
        }
    }
    let rejected_id = rejected_id.expect("trades.FOO was never subscribed");

    peer.send(&format!(
        r#"{{"jsonrpc":"2.0","id":{},"error":{{"code":-32600,"message":"invalid channel"}}}}"#,
        rejected_id
    ))
    .await;

    match timeout(WAIT, bad.recv()).await.expect("no rejection delivered") {
        Some(Err(StreamError::VenueRejection { code, .. })) => assert_eq!(code, "-32600"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(timeout(WAIT, bad.recv()).await.expect("stream left open").is_none());

    peer.send(&paradex_trade("BTC-USD-PERP", 7)).await;
    match events(&mut good).await.as_slice() {
        [MarketEvent::Trade(trade)] => assert_eq!(trade.id, "7"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(harness.engine.subscription_count(), 1);

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_dropping_last_subscriber_unsubscribes() {
    let mut harness = Harness::new(vec![paradex()]);
    let venue = VenueId::paradex();

    let stream = harness
        .engine
        .subscribe(&venue, Topic::BidAsk, Some("ETH-USD-PERP"))
        .await
        .unwrap();
    let mut peer = harness.peer().await;
    assert_eq!(peer.frame().await["method"], "subscribe");

    stream.unsubscribe();

    let frame = peer.frame().await;
    assert_eq!(frame["method"], "unsubscribe");
    assert_eq!(frame["params"]["channel"], "bbo.ETH-USD-PERP");
    assert_eq!(harness.engine.subscription_count(), 0);

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_url_scoped_stream_closes_when_idle() {
    let mut harness = Harness::new(vec![VenueRegistration::new(Arc::new(
        ExtendedAdapter::new("wss://extended.test"),
    ))]);
    let venue = VenueId::extended();

    let mut stream = harness
        .engine
        .subscribe(&venue, Topic::FundingRate, Some("BTC-USD"))
        .await
        .unwrap();
    let mut peer = harness.peer().await;
    assert!(peer.url.ends_with("/funding/BTC-USD"), "url was {}", peer.url);

    peer.send(r#"{"data":{"m":"BTC-USD","T":1700000000000,"f":"0.00012"}}"#)
        .await;
    match events(&mut stream).await.as_slice() {
        [MarketEvent::FundingRate(rate)] => assert_eq!(rate.funding_rate, Some(dec!(0.00012))),
        other => panic!("unexpected {:?}", other),
    }

    drop(stream);
    assert!(peer.closed().await, "idle connection stayed open");

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_private_stream_ends_when_session_expires() {
    let mut harness = Harness::new(vec![
        VenueRegistration::new(Arc::new(AsterdexAdapter::new("wss://asterdex.test/ws")))
            .with_issuer(Arc::new(MockIssuer)),
    ]);
    let venue = VenueId::asterdex();

    let mut orders = harness
        .engine
        .subscribe(&venue, Topic::Orders, None)
        .await
        .unwrap();
    assert_eq!(harness.engine.session_state(&venue), Some(SessionState::Active));

    let mut peer = harness.peer().await;
    assert_eq!(peer.url, "wss://asterdex.test/ws/listen-key-1");
    assert!(peer.quiet(Duration::from_millis(100)).await);

    peer.send(
        r#"{"e":"ORDER_TRADE_UPDATE","E":1700000000001,"T":1700000000000,
            "o":{"s":"BTCUSDT","c":"mine","S":"BUY","o":"LIMIT","f":"GTC",
            "q":"0.5","p":"64000","X":"NEW","i":42,"z":"0"}}"#,
    )
    .await;
    match events(&mut orders).await.as_slice() {
        [MarketEvent::Order(order)] => {
            assert_eq!(order.id, "42");
            assert_eq!(order.price, Some(dec!(64000)));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(harness.engine.orders(&venue, None, None, None).len(), 1);

    peer.send(r#"{"e":"listenKeyExpired","E":1700000001000}"#).await;
    match timeout(WAIT, orders.recv()).await.expect("no expiry delivered") {
        Some(Err(error)) => assert_eq!(error.kind(), ErrorKind::AuthExpired),
        other => panic!("unexpected {:?}", other),
    }
    assert!(peer.closed().await);
    assert_eq!(harness.engine.session_state(&venue), Some(SessionState::NoSession));

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_application_ping_is_answered() {
    let mut harness = Harness::new(vec![VenueRegistration::new(Arc::new(LighterAdapter::new(
        "wss://lighter.test/stream",
    )))]);
    let venue = VenueId::lighter();

    let _stream = harness
        .engine
        .subscribe(&venue, Topic::FundingRate, Some("1"))
        .await
        .unwrap();
    let mut peer = harness.peer().await;
    assert_eq!(peer.frame().await["type"], "subscribe");

    peer.send(r#"{"type":"ping"}"#).await;
    assert_eq!(peer.frame().await["type"], "pong");

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_topic_is_rejected_up_front() {
    let harness = Harness::new(vec![paradex()]);
    let error = harness
        .engine
        .subscribe(&VenueId::paradex(), Topic::Orders, None)
        .await
        .err()
        .expect("paradex has no order stream");
    assert_eq!(error.kind(), ErrorKind::FatalConfiguration);
    assert_eq!(harness.engine.connection_count(), 0);
}

#[tokio::test]
async fn test_released_book_goes_back_to_unprimed() {
    let fetcher = MockFetcher::new(&[100]);
    let mut harness = Harness::new(vec![asterdex(Arc::clone(&fetcher))]);
    let venue = VenueId::asterdex();

    let mut books = harness
        .engine
        .subscribe(&venue, Topic::OrderBook, Some("BTCUSDT"))
        .await
        .unwrap();
    let mut peer = harness.peer().await;
    assert_eq!(asterdex_stream(&peer.frame().await), "btcusdt@depth@100ms");

    peer.send(&depth_update(100, 101, 99)).await;
    book_at(&mut books, 101).await;
    assert_eq!(harness.engine.book_state(&venue, "BTCUSDT"), BookState::Primed);

    books.unsubscribe();

    let frame = peer.frame().await;
    assert_eq!(frame["method"], "UNSUBSCRIBE");
    assert_eq!(frame["params"][0], "btcusdt@depth@100ms");
    assert_eq!(harness.engine.book_state(&venue, "BTCUSDT"), BookState::Unprimed);
    assert!(harness.engine.order_book(&venue, "BTCUSDT").is_none());

    // deltas still in flight do not revive the released book
    peer.send(&depth_update(102, 102, 101)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.engine.order_book(&venue, "BTCUSDT").is_none());

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn test_retry_budget_ends_the_stream() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let transport = Arc::new(UnreachableTransport {
        attempts: AtomicUsize::new(0),
    });
    let engine = StreamEngine::builder()
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .backoff(fast_backoff(3))
        .heartbeat_timeout(Duration::ZERO)
        .venue(paradex())
        .build()
        .expect("engine should build");
    let venue = VenueId::paradex();

    let mut stream = engine
        .subscribe(&venue, Topic::Trades, Some("BTC-USD-PERP"))
        .await
        .unwrap();

    for _ in 0..2 {
        match stream.recv_timeout(WAIT).await {
            Err(error) => {
                assert_eq!(error.kind(), ErrorKind::TransientNetwork);
                assert!(error.is_retryable());
            }
            Ok(events) => panic!("unexpected {:?}", events),
        }
    }
    match stream.recv_timeout(WAIT).await {
        Err(error @ StreamError::RetriesExhausted { attempts: 3, .. }) => {
            assert_eq!(error.kind(), ErrorKind::Unreachable);
            assert!(!error.is_retryable());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(timeout(WAIT, stream.recv()).await.unwrap().is_none());
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(engine.subscription_count(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_silent_connection_is_replaced() {
    let mut harness = Harness::with_heartbeat(vec![paradex()], Duration::from_millis(200));
    let venue = VenueId::paradex();

    let mut trades = harness
        .engine
        .subscribe(&venue, Topic::Trades, Some("BTC-USD-PERP"))
        .await
        .unwrap();

    let mut silent = harness.peer().await;
    assert_eq!(silent.frame().await["params"]["channel"], "trades.BTC-USD-PERP");
    assert!(silent.closed().await, "silent connection should be dropped");

    let mut peer = harness.peer().await;
    assert_eq!(peer.frame().await["params"]["channel"], "trades.BTC-USD-PERP");

    peer.send(&paradex_trade("BTC-USD-PERP", 7)).await;
    let received = loop {
        match trades.recv_timeout(WAIT).await {
            Ok(events) => break events,
            Err(error) => assert!(error.is_retryable(), "unexpected {:?}", error),
        }
    };
    assert!(matches!(received.as_slice(), [MarketEvent::Trade(trade)] if trade.id == "7"));

    harness.engine.shutdown().await;
}
