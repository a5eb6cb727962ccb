use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::{BackoffPolicy, BookSettings, CacheLimits, ConnectionSettings};

/// Root of the gateway configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigFile {
    pub venues: Vec<VenueConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
}

/// One venue's endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub ws_url: String,
    #[serde(default)]
    pub private_ws_url: Option<String>,
    /// Base URL for order book snapshots and session keys
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Symbols the demo binary subscribes to when none are given
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub order_book: OrderBookConfig,
    /// Overrides the global heartbeat timeout
    #[serde(default)]
    pub heartbeat_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookConfig {
    #[serde(default = "default_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: usize,
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: default_buffer_size(),
            max_depth: None,
            snapshot_depth: default_snapshot_depth(),
        }
    }
}

impl From<&OrderBookConfig> for BookSettings {
    fn from(config: &OrderBookConfig) -> Self {
        BookSettings {
            max_buffer_size: config.max_buffer_size,
            max_depth: config.max_depth,
            snapshot_depth: config.snapshot_depth,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default)]
    pub caches: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            caches: CacheConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 0 retries forever
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        BackoffPolicy {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
            jitter: config.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_limit")]
    pub trades_limit: usize,
    #[serde(default = "default_cache_limit")]
    pub orders_limit: usize,
    #[serde(default = "default_cache_limit")]
    pub positions_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            trades_limit: default_cache_limit(),
            orders_limit: default_cache_limit(),
            positions_limit: default_cache_limit(),
        }
    }
}

impl From<&CacheConfig> for CacheLimits {
    fn from(config: &CacheConfig) -> Self {
        CacheLimits {
            trades: config.trades_limit,
            orders: config.orders_limit,
            positions: config.positions_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Renew once this fraction of the token's validity has elapsed
    #[serde(default = "default_renew_fraction")]
    pub renew_fraction: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renew_fraction: default_renew_fraction(),
        }
    }
}

impl GatewayConfigFile {
    /// Connection settings for `venue`, honoring its heartbeat override
    pub fn connection_settings(&self, venue: &VenueConfig) -> ConnectionSettings {
        let heartbeat_ms = venue
            .heartbeat_timeout_ms
            .unwrap_or(self.global.heartbeat_timeout_ms);
        ConnectionSettings {
            backoff: BackoffPolicy::from(&self.global.reconnect),
            heartbeat_timeout: Duration::from_millis(heartbeat_ms),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_buffer_size() -> usize {
    1000
}

fn default_snapshot_depth() -> usize {
    100
}

fn default_heartbeat_timeout_ms() -> u64 {
    600_000
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_jitter() -> f64 {
    0.2
}

fn default_cache_limit() -> usize {
    1000
}

fn default_renew_fraction() -> f64 {
    0.5
}
