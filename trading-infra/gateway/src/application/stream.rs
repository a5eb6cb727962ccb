//! Subscriber handle
//!
//! A `MarketStream` owns one waiter per key it was opened for. Dropping it
//! removes those waiters, and the last waiter of a key releases the wire
//! subscription.

use futures_util::stream::Stream;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

use super::connection_manager::ConnectionManager;
use super::registry::{StreamItem, SubscriptionRegistry, WaiterId};
use crate::domain::{MarketEvent, StreamKey};
use crate::error::StreamError;

pub struct MarketStream {
    receiver: mpsc::UnboundedReceiver<StreamItem>,
    memberships: Vec<(StreamKey, WaiterId)>,
    registry: Arc<SubscriptionRegistry>,
    connections: Weak<ConnectionManager>,
}

impl MarketStream {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<StreamItem>,
        registry: Arc<SubscriptionRegistry>,
        connections: Weak<ConnectionManager>,
    ) -> Self {
        MarketStream {
            receiver,
            memberships: Vec::new(),
            registry,
            connections,
        }
    }

    pub(crate) fn track(&mut self, key: StreamKey, waiter: WaiterId) {
        self.memberships.push((key, waiter));
    }

    pub fn keys(&self) -> impl Iterator<Item = &StreamKey> {
        self.memberships.iter().map(|(key, _)| key)
    }

    /// Next batch of events or error; `None` once every key was torn down
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.receiver.recv().await
    }

    /// Next batch of events, failing with [`StreamError::Timeout`] if none arrives in time
    ///
    /// A timeout leaves the subscription in place.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<MarketEvent>, StreamError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => Err(StreamError::Closed("subscription ended".to_string())),
            Err(_) => Err(StreamError::Timeout(timeout)),
        }
    }

    /// Already queued item, if any
    pub fn try_recv(&mut self) -> Option<StreamItem> {
        self.receiver.try_recv().ok()
    }

    /// Release every key of this stream; same as dropping it
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for MarketStream {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for MarketStream {
    fn drop(&mut self) {
        let connections = self.connections.upgrade();
        for (key, waiter) in self.memberships.drain(..) {
            if let Some(released) = self.registry.remove(&key, waiter)
                && let Some(connections) = &connections
            {
                connections.release(&released.endpoint, key, released.channel);
            }
        }
    }
}
