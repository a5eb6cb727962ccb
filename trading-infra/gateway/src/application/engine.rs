//! Stream engine
//!
//! Wires the registry, reconciler, caches, router, connection manager and
//! session keepalives together and exposes the subscription API.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use trading_core::{Order, Position, Timestamp, Trade};

use super::backoff::BackoffPolicy;
use super::connection_manager::{ConnectionManager, ConnectionNotice, ConnectionSettings};
use super::event_store::{CacheLimits, EventStore};
use super::keepalive::{SessionKeepalive, SessionState};
use super::reconciler::{BookSettings, OrderBookReconciler};
use super::registry::{StreamItem, SubscriptionRegistry, WaiterSender};
use super::router::MessageRouter;
use super::stream::MarketStream;
use crate::config::{ConfigError, GatewayConfigFile};
use crate::domain::{
    BookState, Endpoint, MarketEvent, OrderBookSnapshot, QualifiedSymbol, SessionIssuer,
    SnapshotFetcher, StreamKey, Topic, Transport, VenueAdapter, VenueId,
};
use crate::error::StreamError;
use crate::infrastructure::{RestClient, WsTransport, adapter_for};

/// Everything the engine needs to know about one venue
pub struct VenueRegistration {
    adapter: Arc<dyn VenueAdapter>,
    fetcher: Option<Arc<dyn SnapshotFetcher>>,
    issuer: Option<Arc<dyn SessionIssuer>>,
    book: BookSettings,
    connection: Option<ConnectionSettings>,
}

impl VenueRegistration {
    pub fn new(adapter: Arc<dyn VenueAdapter>) -> Self {
        VenueRegistration {
            adapter,
            fetcher: None,
            issuer: None,
            book: BookSettings::default(),
            connection: None,
        }
    }

    /// Snapshot source for venues streaming book deltas
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Token source for authenticated streams
    pub fn with_issuer(mut self, issuer: Arc<dyn SessionIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn with_book_settings(mut self, book: BookSettings) -> Self {
        self.book = book;
        self
    }

    pub fn with_connection_settings(mut self, connection: ConnectionSettings) -> Self {
        self.connection = Some(connection);
        self
    }
}

pub struct StreamEngineBuilder {
    transport: Option<Arc<dyn Transport>>,
    connection: ConnectionSettings,
    cache_limits: CacheLimits,
    renew_fraction: f64,
    venues: Vec<VenueRegistration>,
}

impl Default for StreamEngineBuilder {
    fn default() -> Self {
        StreamEngineBuilder {
            transport: None,
            connection: ConnectionSettings::default(),
            cache_limits: CacheLimits::default(),
            renew_fraction: 0.5,
            venues: Vec::new(),
        }
    }
}

impl StreamEngineBuilder {
    /// Builder populated with every enabled venue of `config`
    pub fn from_config(config: &GatewayConfigFile) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut builder = StreamEngineBuilder::default()
            .backoff(BackoffPolicy::from(&config.global.reconnect))
            .heartbeat_timeout(Duration::from_millis(config.global.heartbeat_timeout_ms))
            .cache_limits(CacheLimits::from(&config.global.caches))
            .renew_fraction(config.global.session.renew_fraction);

        for venue in config.enabled_venues() {
            let mut registration = VenueRegistration::new(adapter_for(venue)?)
                .with_book_settings(BookSettings::from(&venue.order_book))
                .with_connection_settings(config.connection_settings(venue));

            let rest_url = venue.rest_url.as_ref().filter(|_| {
                let rest_capable = VenueId::new(&venue.id) == VenueId::asterdex();
                if !rest_capable {
                    tracing::warn!("{} has no REST snapshot or session support, ignoring rest_url", venue.id);
                }
                rest_capable
            });
            if let Some(rest_url) = rest_url {
                let client = Arc::new(RestClient::new(
                    rest_url.as_str(),
                    venue.api_key.clone().unwrap_or_default(),
                ));
                registration = registration.with_fetcher(client.clone());
                if venue.api_key.is_some() {
                    registration = registration.with_issuer(client);
                }
            }
            builder = builder.venue(registration);
        }
        Ok(builder)
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.connection.backoff = backoff;
        self
    }

    /// Zero disables the silence check
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.connection.heartbeat_timeout = timeout;
        self
    }

    pub fn cache_limits(mut self, limits: CacheLimits) -> Self {
        self.cache_limits = limits;
        self
    }

    pub fn renew_fraction(mut self, fraction: f64) -> Self {
        self.renew_fraction = fraction;
        self
    }

    pub fn venue(mut self, registration: VenueRegistration) -> Self {
        self.venues.push(registration);
        self
    }

    /// Assemble the engine; must run inside a Tokio runtime
    pub fn build(self) -> Result<StreamEngine, StreamError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(StreamError::FatalConfiguration(
                "stream engine must be built inside a Tokio runtime".to_string(),
            ));
        }

        let registry = Arc::new(SubscriptionRegistry::new());
        let store = Arc::new(EventStore::new(self.cache_limits));

        let mut adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::new();
        let mut reconciler = OrderBookReconciler::new(Arc::clone(&registry));
        let mut settings = HashMap::new();
        let mut issuers = Vec::new();

        for registration in self.venues {
            let venue = registration.adapter.venue().clone();
            if adapters.contains_key(&venue) {
                return Err(StreamError::FatalConfiguration(format!(
                    "venue {} registered twice",
                    venue
                )));
            }
            reconciler = reconciler.with_venue(venue.clone(), registration.book, registration.fetcher);
            if let Some(connection) = registration.connection {
                settings.insert(venue.clone(), connection);
            }
            if let Some(issuer) = registration.issuer {
                issuers.push((venue.clone(), issuer));
            }
            adapters.insert(venue, registration.adapter);
        }
        let reconciler = Arc::new(reconciler);

        let router = adapters.values().fold(
            MessageRouter::new(Arc::clone(&registry), Arc::clone(&reconciler), Arc::clone(&store)),
            |router, adapter| router.with_adapter(Arc::clone(adapter)),
        );

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WsTransport::new()) as Arc<dyn Transport>);
        let (connections, notices) = ConnectionManager::new(
            transport,
            Arc::new(router),
            Arc::clone(&registry),
            Arc::clone(&reconciler),
            settings,
            self.connection,
        );

        let sessions: HashMap<VenueId, Arc<SessionKeepalive>> = issuers
            .into_iter()
            .map(|(venue, issuer)| {
                let errors = adapters
                    .get(&venue)
                    .map(|a| a.error_table().clone())
                    .unwrap_or_default();
                let keepalive = SessionKeepalive::new(
                    venue.clone(),
                    issuer,
                    self.renew_fraction,
                    errors,
                    Arc::downgrade(&connections),
                );
                (venue, keepalive)
            })
            .collect();

        let supervisor = tokio::spawn(supervise(notices, sessions.clone()));

        tracing::info!("Stream engine ready with {} venue(s)", adapters.len());
        Ok(StreamEngine {
            adapters,
            registry,
            reconciler,
            store,
            connections,
            sessions,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }
}

/// React to connection events that need engine-level handling
async fn supervise(
    mut notices: mpsc::UnboundedReceiver<ConnectionNotice>,
    sessions: HashMap<VenueId, Arc<SessionKeepalive>>,
) {
    while let Some(notice) = notices.recv().await {
        match notice {
            ConnectionNotice::SessionExpired(endpoint) => {
                if let Some(session) = sessions.get(&endpoint.venue) {
                    session.expire().await;
                }
            }
            ConnectionNotice::Failed(endpoint) => {
                tracing::error!("{} unreachable, subscriptions on it were failed", endpoint);
            }
        }
    }
}

/// Streaming synchronization engine
pub struct StreamEngine {
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    registry: Arc<SubscriptionRegistry>,
    reconciler: Arc<OrderBookReconciler>,
    store: Arc<EventStore>,
    connections: Arc<ConnectionManager>,
    sessions: HashMap<VenueId, Arc<SessionKeepalive>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl StreamEngine {
    pub fn builder() -> StreamEngineBuilder {
        StreamEngineBuilder::default()
    }

    /// Engine with every enabled venue of `config` on the WebSocket transport
    pub fn from_config(config: &GatewayConfigFile) -> Result<Self, StreamError> {
        StreamEngineBuilder::from_config(config)
            .map_err(|e| StreamError::FatalConfiguration(e.to_string()))?
            .build()
    }

    /// Subscribe to one symbol's stream, or to the whole topic when `symbol` is `None`
    pub async fn subscribe(
        &self,
        venue: &VenueId,
        topic: Topic,
        symbol: Option<&str>,
    ) -> Result<MarketStream, StreamError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut stream = self.stream(receiver);
        self.open(&mut stream, &sender, venue, topic, symbol).await?;
        Ok(stream)
    }

    /// One stream fed by several symbols
    pub async fn subscribe_many(
        &self,
        venue: &VenueId,
        topic: Topic,
        symbols: &[&str],
    ) -> Result<MarketStream, StreamError> {
        if symbols.is_empty() {
            return self.subscribe_all(venue, topic).await;
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut stream = self.stream(receiver);
        for symbol in symbols {
            self.open(&mut stream, &sender, venue, topic, Some(symbol)).await?;
        }
        Ok(stream)
    }

    pub async fn subscribe_all(&self, venue: &VenueId, topic: Topic) -> Result<MarketStream, StreamError> {
        self.subscribe(venue, topic, None).await
    }

    /// Wait for the next update of one stream
    ///
    /// The subscription is released afterwards unless others share it.
    pub async fn watch(
        &self,
        venue: &VenueId,
        topic: Topic,
        symbol: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<MarketEvent>, StreamError> {
        let mut stream = self.subscribe(venue, topic, symbol).await?;
        stream.recv_timeout(timeout).await
    }

    fn stream(&self, receiver: mpsc::UnboundedReceiver<StreamItem>) -> MarketStream {
        MarketStream::new(
            receiver,
            Arc::clone(&self.registry),
            Arc::downgrade(&self.connections),
        )
    }

    fn adapter(&self, venue: &VenueId) -> Result<&Arc<dyn VenueAdapter>, StreamError> {
        self.adapters
            .get(venue)
            .ok_or_else(|| StreamError::FatalConfiguration(format!("unknown venue {}", venue)))
    }

    async fn endpoint(
        &self,
        adapter: &dyn VenueAdapter,
        topic: Topic,
        symbol: Option<&str>,
    ) -> Result<Endpoint, StreamError> {
        let venue = adapter.venue().clone();
        if !topic.is_private() {
            return Ok(Endpoint::public(venue, adapter.public_url(topic, symbol)?));
        }

        let session = self.sessions.get(&venue).ok_or_else(|| {
            StreamError::FatalConfiguration(format!("{} has no session credentials", venue))
        })?;
        let token = session.acquire().await?;
        let endpoint = Endpoint::private(venue, adapter.private_url(&token.value)?);
        session.bind(endpoint.clone());
        Ok(endpoint)
    }

    async fn open(
        &self,
        stream: &mut MarketStream,
        sender: &WaiterSender,
        venue: &VenueId,
        topic: Topic,
        symbol: Option<&str>,
    ) -> Result<(), StreamError> {
        let adapter = Arc::clone(self.adapter(venue)?);
        if !adapter.supports(topic) {
            return Err(StreamError::FatalConfiguration(format!(
                "{} does not stream {}",
                venue, topic
            )));
        }

        let endpoint = self.endpoint(adapter.as_ref(), topic, symbol).await?;
        let request = adapter.channel(topic, symbol)?;
        let key = match symbol {
            Some(symbol) => StreamKey::symbol(venue.clone(), topic, symbol),
            None => StreamKey::aggregate(venue.clone(), topic),
        };

        let registration =
            self.registry
                .register(key.clone(), endpoint.clone(), request.channel.clone(), sender.clone());
        stream.track(key.clone(), registration.waiter);

        if registration.first {
            tracing::debug!("Subscribing {} via {}", key, endpoint);
            self.connections.acquire(&endpoint, key, request)?;
        } else if let (Topic::OrderBook, Some(symbol)) = (topic, symbol) {
            // late joiners start from the current book
            if let Some(book) = self.order_book(venue, symbol) {
                let _ = sender.send(Ok(vec![MarketEvent::OrderBook(book)]));
            }
        }
        Ok(())
    }

    /// Current consistent book, if the symbol is primed
    pub fn order_book(&self, venue: &VenueId, symbol: &str) -> Option<Arc<OrderBookSnapshot>> {
        let key = QualifiedSymbol::new(venue.clone(), symbol);
        if !self.reconciler.state(&key).is_ready() {
            return None;
        }
        self.reconciler.snapshot(&key)
    }

    pub fn book_state(&self, venue: &VenueId, symbol: &str) -> BookState {
        self.reconciler.state(&QualifiedSymbol::new(venue.clone(), symbol))
    }

    pub fn trades(
        &self,
        venue: &VenueId,
        symbol: &str,
        since: Option<Timestamp>,
        limit: Option<usize>,
    ) -> Vec<Trade> {
        self.store
            .trades(&QualifiedSymbol::new(venue.clone(), symbol), since, limit)
    }

    pub fn orders(
        &self,
        venue: &VenueId,
        symbol: Option<&str>,
        since: Option<Timestamp>,
        limit: Option<usize>,
    ) -> Vec<Order> {
        self.store.orders(venue, symbol, since, limit)
    }

    pub fn positions(&self, venue: &VenueId, symbol: Option<&str>) -> Vec<Position> {
        self.store.positions(venue, symbol)
    }

    /// Most recent ticker, bid/ask or funding rate
    pub fn latest(&self, venue: &VenueId, symbol: &str, topic: Topic) -> Option<MarketEvent> {
        self.store
            .latest(&QualifiedSymbol::new(venue.clone(), symbol), topic)
    }

    pub fn session_state(&self, venue: &VenueId) -> Option<SessionState> {
        self.sessions.get(venue).map(|s| s.state())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.connection_count()
    }

    /// Keys with at least one live subscriber
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Close every connection; open streams end with a closed error
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down stream engine");
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }
        for session in self.sessions.values() {
            session.shutdown().await;
        }
        self.connections.shutdown().await;
        self.reconciler.clear();
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_default_config;

    fn registration<'a>(builder: &'a StreamEngineBuilder, venue: &VenueId) -> &'a VenueRegistration {
        builder
            .venues
            .iter()
            .find(|r| r.adapter.venue() == venue)
            .expect("venue registered")
    }

    #[test]
    fn test_rest_client_only_for_asterdex() {
        let mut config = load_default_config().unwrap();
        for venue in &mut config.venues {
            venue.rest_url = Some("https://api.example.test/v1".to_string());
            venue.api_key = Some("key".to_string());
        }

        let builder = StreamEngineBuilder::from_config(&config).unwrap();
        let aster = registration(&builder, &VenueId::asterdex());
        assert!(aster.fetcher.is_some());
        assert!(aster.issuer.is_some());

        for venue in [VenueId::paradex(), VenueId::lighter(), VenueId::extended()] {
            let other = registration(&builder, &venue);
            assert!(other.fetcher.is_none(), "{} got a snapshot fetcher", venue);
            assert!(other.issuer.is_none(), "{} got a session issuer", venue);
        }
    }
}
