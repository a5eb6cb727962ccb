//! Connection manager
//!
//! One worker task per endpoint owns the transport. Callers talk to it
//! through a command channel, so concurrent requests for the same endpoint
//! converge on one connection and its subscriptions are reference counted
//! per channel.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use super::backoff::BackoffPolicy;
use super::reconciler::OrderBookReconciler;
use super::registry::SubscriptionRegistry;
use super::router::{MessageRouter, RouteAction};
use crate::domain::{
    ChannelRequest, Endpoint, QualifiedSymbol, StreamKey, Topic, Transport, TransportChannels,
    Unsubscribe, VenueId, WireMessage,
};
use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Reconnect and liveness settings for one venue
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub backoff: BackoffPolicy,
    /// Silence after which the connection is considered dead; zero disables
    pub heartbeat_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            backoff: BackoffPolicy::default(),
            heartbeat_timeout: Duration::from_secs(600),
        }
    }
}

/// Events the engine must react to outside a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionNotice {
    SessionExpired(Endpoint),
    /// Gave up reconnecting
    Failed(Endpoint),
}

enum Command {
    Send(String),
    Acquire {
        key: StreamKey,
        request: ChannelRequest,
    },
    Release {
        key: StreamKey,
        channel: String,
    },
    Close(StreamError),
}

/// Handle to the worker serving one endpoint
#[derive(Clone)]
pub struct ConnectionHandle {
    endpoint: Endpoint,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Queue a frame; frames sent while reconnecting are dropped
    pub fn send(&self, frame: impl Into<String>) -> Result<(), StreamError> {
        self.commands
            .send(Command::Send(frame.into()))
            .map_err(|_| StreamError::Closed(self.endpoint.to_string()))
    }

    /// Wait until the connection is open, or fail if it was torn down
    pub async fn wait_open(&self) -> Result<(), StreamError> {
        let mut state = self.state.clone();
        loop {
            match *state.borrow_and_update() {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Closed => {
                    return Err(StreamError::Closed(self.endpoint.to_string()));
                }
                ConnectionState::Connecting | ConnectionState::Closing => {}
            }
            state
                .changed()
                .await
                .map_err(|_| StreamError::Closed(self.endpoint.to_string()))?;
        }
    }
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    router: Arc<MessageRouter>,
    registry: Arc<SubscriptionRegistry>,
    reconciler: Arc<OrderBookReconciler>,
    settings: HashMap<VenueId, ConnectionSettings>,
    default_settings: ConnectionSettings,
    connections: Mutex<HashMap<Endpoint, ConnectionHandle>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    notices: mpsc::UnboundedSender<ConnectionNotice>,
    shutting_down: AtomicBool,
    this: Weak<ConnectionManager>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<MessageRouter>,
        registry: Arc<SubscriptionRegistry>,
        reconciler: Arc<OrderBookReconciler>,
        settings: HashMap<VenueId, ConnectionSettings>,
        default_settings: ConnectionSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionNotice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let manager = Arc::new_cyclic(|this| ConnectionManager {
            transport,
            router,
            registry,
            reconciler,
            settings,
            default_settings,
            connections: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            notices,
            shutting_down: AtomicBool::new(false),
            this: this.clone(),
        });
        (manager, notice_rx)
    }

    /// Get the live connection for `endpoint`, starting one if needed
    pub fn ensure(&self, endpoint: &Endpoint) -> Result<ConnectionHandle, StreamError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(StreamError::Closed("engine is shutting down".to_string()));
        }

        let mut connections = self.connections.lock();
        if let Some(handle) = connections.get(endpoint)
            && handle.is_alive()
        {
            return Ok(handle.clone());
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let settings = self
            .settings
            .get(&endpoint.venue)
            .cloned()
            .unwrap_or_else(|| self.default_settings.clone());
        let keepalive = self
            .router
            .adapter(&endpoint.venue)
            .and_then(|adapter| adapter.keepalive());

        let worker = ConnectionWorker {
            endpoint: endpoint.clone(),
            manager: self.this.clone(),
            transport: Arc::clone(&self.transport),
            router: Arc::clone(&self.router),
            registry: Arc::clone(&self.registry),
            reconciler: Arc::clone(&self.reconciler),
            settings,
            keepalive_interval: keepalive.as_ref().map(|k| k.interval),
            keepalive_frame: keepalive.map(|k| k.frame),
            commands: command_rx,
            own: commands.clone(),
            state: state_tx,
            notices: self.notices.clone(),
            channels: IndexMap::new(),
            pending: HashMap::new(),
        };

        let handle = ConnectionHandle {
            endpoint: endpoint.clone(),
            commands,
            state: state_rx,
        };
        connections.insert(endpoint.clone(), handle.clone());

        let join = tokio::spawn(worker.run());
        let mut workers = self.workers.lock();
        workers.retain(|w| !w.is_finished());
        workers.push(join);

        Ok(handle)
    }

    /// Add `key` to `request.channel` on `endpoint`, subscribing on first use
    pub fn acquire(
        &self,
        endpoint: &Endpoint,
        key: StreamKey,
        request: ChannelRequest,
    ) -> Result<(), StreamError> {
        let mut command = Command::Acquire { key, request };
        // a worker retiring between ensure and send hands back the command
        for _ in 0..2 {
            let handle = self.ensure(endpoint)?;
            match handle.commands.send(command) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => command = returned,
            }
        }
        Err(StreamError::Closed(endpoint.to_string()))
    }

    /// Drop `key` from its channel; the last key out unsubscribes
    ///
    /// A released book stops receiving deltas, so it goes back to unprimed.
    pub fn release(&self, endpoint: &Endpoint, key: StreamKey, channel: String) {
        if key.topic == Topic::OrderBook
            && let Some(symbol) = &key.symbol
        {
            self.reconciler
                .reset([&QualifiedSymbol::new(key.venue.clone(), symbol.as_str())]);
        }

        let Some(handle) = self.connections.lock().get(endpoint).cloned() else {
            tracing::debug!("{} already closed, nothing to unsubscribe for {}", endpoint, channel);
            return;
        };
        if let Err(mpsc::error::SendError(_)) = handle.commands.send(Command::Release { key, channel }) {
            tracing::warn!("Unsubscribe on {} not delivered, connection is closing", endpoint);
        }
    }

    pub fn send(&self, endpoint: &Endpoint, frame: impl Into<String>) -> Result<(), StreamError> {
        self.ensure(endpoint)?.send(frame)
    }

    /// Tear down one connection; its waiters receive `reason`
    pub fn close(&self, endpoint: &Endpoint, reason: StreamError) {
        if let Some(handle) = self.connections.lock().remove(endpoint) {
            let _ = handle.commands.send(Command::Close(reason));
        }
    }

    pub fn state(&self, endpoint: &Endpoint) -> Option<ConnectionState> {
        self.connections.lock().get(endpoint).map(|h| h.state())
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|h| h.is_alive())
            .count()
    }

    /// Close every connection and wait for the workers to finish
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let handles: Vec<ConnectionHandle> =
            self.connections.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            let _ = handle
                .commands
                .send(Command::Close(StreamError::Closed("engine shut down".to_string())));
        }
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!("Connection worker ended abnormally: {}", e);
            }
        }
    }

    /// Forget `endpoint` if it is still served by the worker owning `own`
    fn retire(&self, endpoint: &Endpoint, own: &mpsc::UnboundedSender<Command>) {
        let mut connections = self.connections.lock();
        if connections
            .get(endpoint)
            .is_some_and(|h| h.commands.same_channel(own))
        {
            connections.remove(endpoint);
        }
    }
}

struct ChannelEntry {
    request: ChannelRequest,
    keys: HashSet<StreamKey>,
    /// Subscribed on the current connection
    sent: bool,
}

enum Teardown {
    Frame(String),
    /// Nothing left on a URL-scoped connection
    Idle,
}

enum Exit {
    /// Closed on request; waiters get the reason
    Closed(StreamError),
    /// Last channel released on a URL-scoped connection
    Idle,
    /// Transport lost; reconnect
    Disconnected(String),
}

enum Flow {
    Continue,
    Exit(Exit),
}

struct ConnectionWorker {
    endpoint: Endpoint,
    manager: Weak<ConnectionManager>,
    transport: Arc<dyn Transport>,
    router: Arc<MessageRouter>,
    registry: Arc<SubscriptionRegistry>,
    reconciler: Arc<OrderBookReconciler>,
    settings: ConnectionSettings,
    keepalive_interval: Option<Duration>,
    keepalive_frame: Option<String>,
    commands: mpsc::UnboundedReceiver<Command>,
    own: mpsc::UnboundedSender<Command>,
    state: watch::Sender<ConnectionState>,
    notices: mpsc::UnboundedSender<ConnectionNotice>,
    channels: IndexMap<String, ChannelEntry>,
    /// Request id -> channel, until the venue acks or rejects
    pending: HashMap<u64, String>,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            self.state.send_replace(ConnectionState::Connecting);
            tracing::debug!("Connecting to {}", self.endpoint);

            let transport = Arc::clone(&self.transport);
            let url = self.endpoint.url.clone();
            let connect = async move { transport.connect(&url).await };
            tokio::pin!(connect);

            let result = loop {
                tokio::select! {
                    result = &mut connect => break result,
                    command = self.commands.recv() => {
                        if let Flow::Exit(exit) = self.offline_command(command) {
                            self.finish(exit);
                            return;
                        }
                    }
                }
            };

            match result {
                Ok(io) => {
                    failures = 0;
                    self.state.send_replace(ConnectionState::Open);
                    tracing::info!("Connected to {}", self.endpoint);

                    match self.serve(io).await {
                        Exit::Disconnected(reason) => {
                            tracing::warn!("{} disconnected: {}", self.endpoint, reason);
                            self.on_disconnect();
                            let delay = self.settings.backoff.delay(0);
                            if let Some(exit) = self.pause(delay).await {
                                self.finish(exit);
                                return;
                            }
                        }
                        exit => {
                            self.finish(exit);
                            return;
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    if self.settings.backoff.exhausted(failures) {
                        tracing::error!(
                            "Giving up on {} after {} failed attempts: {}",
                            self.endpoint,
                            failures,
                            e
                        );
                        let _ = self
                            .notices
                            .send(ConnectionNotice::Failed(self.endpoint.clone()));
                        let error = StreamError::RetriesExhausted {
                            endpoint: self.endpoint.to_string(),
                            attempts: failures,
                        };
                        self.finish(Exit::Closed(error));
                        return;
                    }

                    let error = StreamError::TransientNetwork {
                        endpoint: self.endpoint.to_string(),
                        message: e.to_string(),
                    };
                    self.registry.notify_endpoint(&self.endpoint, &error);

                    let delay = self.settings.backoff.delay(failures - 1);
                    tracing::warn!(
                        "Connection to {} failed ({}), retrying in {:?}",
                        self.endpoint,
                        e,
                        delay
                    );
                    if let Some(exit) = self.pause(delay).await {
                        self.finish(exit);
                        return;
                    }
                }
            }
        }
    }

    /// Sleep while still accepting commands
    async fn pause(&mut self, delay: Duration) -> Option<Exit> {
        let wake = tokio::time::sleep(delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => return None,
                command = self.commands.recv() => {
                    if let Flow::Exit(exit) = self.offline_command(command) {
                        return Some(exit);
                    }
                }
            }
        }
    }

    async fn serve(&mut self, io: TransportChannels) -> Exit {
        let TransportChannels {
            outbound,
            mut inbound,
        } = io;

        match self.subscribe_pending(&outbound).await {
            Ok(0) => {}
            Ok(count) => tracing::debug!("{} subscribed {} channels", self.endpoint, count),
            Err(_) => return Exit::Disconnected("transport closed while subscribing".to_string()),
        }

        let timeout = self.settings.heartbeat_timeout;
        let mut heartbeat = (!timeout.is_zero())
            .then(|| Self::ticker((timeout / 4).max(Duration::from_millis(50))));
        let mut keepalive = self.keepalive_interval.map(Self::ticker);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(WireMessage::Text(text)) => {
                        last_seen = Instant::now();
                        for action in self.router.route(&self.endpoint, &text) {
                            if let Flow::Exit(exit) = self.on_action(action, &outbound).await {
                                return exit;
                            }
                        }
                    }
                    Some(WireMessage::Ping(payload)) => {
                        last_seen = Instant::now();
                        if outbound.send(WireMessage::Pong(payload)).await.is_err() {
                            return Exit::Disconnected("transport closed".to_string());
                        }
                    }
                    Some(WireMessage::Pong(_)) => last_seen = Instant::now(),
                    Some(WireMessage::Close) | None => {
                        return Exit::Disconnected("closed by peer".to_string());
                    }
                },
                command = self.commands.recv() => {
                    if let Flow::Exit(exit) = self.online_command(command, &outbound).await {
                        if !matches!(exit, Exit::Disconnected(_)) {
                            self.state.send_replace(ConnectionState::Closing);
                            let _ = outbound.send(WireMessage::Close).await;
                        }
                        return exit;
                    }
                },
                _ = Self::tick(&mut heartbeat) => {
                    if last_seen.elapsed() > timeout {
                        return Exit::Disconnected(format!("no traffic for {:?}", timeout));
                    }
                },
                _ = Self::tick(&mut keepalive) => {
                    if let Some(frame) = &self.keepalive_frame
                        && outbound.send(WireMessage::Text(frame.clone())).await.is_err()
                    {
                        return Exit::Disconnected("transport closed".to_string());
                    }
                },
            }
        }
    }

    fn ticker(period: Duration) -> Interval {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }

    async fn tick(interval: &mut Option<Interval>) {
        match interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Send subscribe frames for every channel not yet live on this connection
    async fn subscribe_pending(
        &mut self,
        outbound: &mpsc::Sender<WireMessage>,
    ) -> Result<usize, mpsc::error::SendError<WireMessage>> {
        let mut frames = Vec::new();
        for (channel, entry) in self.channels.iter_mut().filter(|(_, e)| !e.sent) {
            entry.sent = true;
            if let Some(id) = entry.request.request_id {
                self.pending.insert(id, channel.clone());
            }
            if let Some(frame) = &entry.request.subscribe {
                frames.push(frame.clone());
            }
        }
        let count = frames.len();
        for frame in frames {
            outbound.send(WireMessage::Text(frame)).await?;
        }
        Ok(count)
    }

    fn acquire(&mut self, key: StreamKey, request: ChannelRequest) {
        match self.channels.get_mut(&request.channel) {
            Some(entry) => {
                entry.keys.insert(key);
            }
            None => {
                tracing::debug!("{} subscribing to {}", self.endpoint, request.channel);
                self.channels.insert(
                    request.channel.clone(),
                    ChannelEntry {
                        request,
                        keys: HashSet::from([key]),
                        sent: false,
                    },
                );
            }
        }
    }

    fn release(&mut self, key: &StreamKey, channel: &str) -> Option<Teardown> {
        let entry = self.channels.get_mut(channel)?;
        entry.keys.remove(key);
        if !entry.keys.is_empty() {
            return None;
        }

        let entry = self.channels.shift_remove(channel)?;
        tracing::debug!("{} unsubscribing from {}", self.endpoint, channel);
        if let Some(id) = entry.request.request_id {
            self.pending.remove(&id);
        }
        match entry.request.unsubscribe {
            Unsubscribe::Frame(frame) if entry.sent => Some(Teardown::Frame(frame)),
            Unsubscribe::CloseConnection if self.channels.is_empty() => Some(Teardown::Idle),
            _ => None,
        }
    }

    fn offline_command(&mut self, command: Option<Command>) -> Flow {
        match command {
            None => Flow::Exit(Exit::Closed(StreamError::Closed(self.endpoint.to_string()))),
            Some(Command::Close(reason)) => Flow::Exit(Exit::Closed(reason)),
            Some(Command::Send(_)) => {
                tracing::debug!("{} not connected, dropping outbound frame", self.endpoint);
                Flow::Continue
            }
            Some(Command::Acquire { key, request }) => {
                self.acquire(key, request);
                Flow::Continue
            }
            Some(Command::Release { key, channel }) => match self.release(&key, &channel) {
                Some(Teardown::Idle) => Flow::Exit(Exit::Idle),
                _ => Flow::Continue,
            },
        }
    }

    async fn online_command(
        &mut self,
        command: Option<Command>,
        outbound: &mpsc::Sender<WireMessage>,
    ) -> Flow {
        let frame = match command {
            Some(Command::Send(frame)) => Some(frame),
            Some(Command::Acquire { key, request }) => {
                self.acquire(key, request);
                if self.subscribe_pending(outbound).await.is_err() {
                    return Flow::Exit(Exit::Disconnected("transport closed".to_string()));
                }
                None
            }
            Some(Command::Release { key, channel }) => match self.release(&key, &channel) {
                Some(Teardown::Frame(frame)) => Some(frame),
                Some(Teardown::Idle) => return Flow::Exit(Exit::Idle),
                None => None,
            },
            other => return self.offline_command(other),
        };

        if let Some(frame) = frame
            && outbound.send(WireMessage::Text(frame)).await.is_err()
        {
            return Flow::Exit(Exit::Disconnected("transport closed".to_string()));
        }
        Flow::Continue
    }

    async fn on_action(&mut self, action: RouteAction, outbound: &mpsc::Sender<WireMessage>) -> Flow {
        match action {
            RouteAction::Reply(frame) => {
                if outbound.send(WireMessage::Text(frame)).await.is_err() {
                    return Flow::Exit(Exit::Disconnected("transport closed".to_string()));
                }
            }
            RouteAction::Acknowledged(request_id) => {
                if let Some(channel) = request_id.and_then(|id| self.pending.remove(&id)) {
                    tracing::debug!("{} confirmed {}", self.endpoint, channel);
                }
            }
            RouteAction::Rejected { request_id, error } => {
                let channel = request_id.and_then(|id| self.pending.remove(&id));
                match channel.and_then(|c| self.channels.shift_remove(&c)) {
                    Some(entry) => {
                        tracing::warn!(
                            "{} rejected {}: {}",
                            self.endpoint,
                            entry.request.channel,
                            error
                        );
                        for key in &entry.keys {
                            self.registry.fail_and_remove(key, &error);
                        }
                    }
                    None => tracing::warn!("{} error with no pending request: {}", self.endpoint, error),
                }
            }
            RouteAction::SessionExpired => {
                tracing::warn!("{} session expired", self.endpoint);
                let _ = self
                    .notices
                    .send(ConnectionNotice::SessionExpired(self.endpoint.clone()));
            }
        }
        Flow::Continue
    }

    fn on_disconnect(&mut self) {
        // books carried here lost continuity
        let books: Vec<QualifiedSymbol> = self
            .registry
            .keys_for_endpoint(&self.endpoint)
            .into_iter()
            .filter(|key| key.topic == Topic::OrderBook)
            .filter_map(|key| key.symbol.map(|symbol| QualifiedSymbol::new(key.venue, symbol)))
            .collect();
        self.reconciler.reset(books.iter());

        let dropped: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, entry)| !entry.request.resend_on_reconnect)
            .map(|(channel, _)| channel.clone())
            .collect();
        for channel in dropped {
            if let Some(entry) = self.channels.shift_remove(&channel) {
                let error = StreamError::Closed(format!("{} on {}", channel, self.endpoint));
                for key in &entry.keys {
                    self.registry.fail_and_remove(key, &error);
                }
            }
        }

        for entry in self.channels.values_mut() {
            entry.sent = false;
        }
        self.pending.clear();
    }

    fn finish(mut self, exit: Exit) {
        self.state.send_replace(ConnectionState::Closing);
        let manager = self.manager.upgrade();
        if let Some(manager) = &manager {
            manager.retire(&self.endpoint, &self.own);
        }

        // commands that raced with retirement
        self.commands.close();
        let mut leftovers = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Acquire { key, request } = command {
                leftovers.push((key, request));
            }
        }

        match exit {
            Exit::Idle => {
                tracing::debug!("{} idle, closed", self.endpoint);
                if let Some(manager) = &manager {
                    for (key, request) in leftovers {
                        if let Err(e) = manager.acquire(&self.endpoint, key.clone(), request) {
                            self.registry.fail_and_remove(&key, &e);
                        }
                    }
                }
            }
            Exit::Closed(reason) => {
                tracing::info!("Closed {}: {}", self.endpoint, reason);
                self.registry.drain_endpoint(&self.endpoint, &reason);
            }
            Exit::Disconnected(reason) => {
                let error = StreamError::Closed(reason);
                self.registry.drain_endpoint(&self.endpoint, &error);
            }
        }

        self.state.send_replace(ConnectionState::Closed);
    }
}
