use std::path::Path;
use thiserror::Error;

use super::types::{GatewayConfigFile, VenueConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("No enabled venues in config")]
    NoEnabledVenues,
    #[error("Venue not found: {0}")]
    VenueNotFound(String),
    #[error("Unknown venue: {0}")]
    UnknownVenue(String),
    #[error("Invalid URL for {venue}: {url}")]
    InvalidUrl { venue: String, url: String },
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Load gateway configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<GatewayConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: GatewayConfigFile = serde_json::from_str(&content)?;
    Ok(config)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<GatewayConfigFile, ConfigError> {
    let config: GatewayConfigFile = serde_json::from_str(json)?;
    Ok(config)
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<GatewayConfigFile, ConfigError> {
    let default_config = include_str!("gateway_config.json");
    load_config_from_str(default_config)
}

impl GatewayConfigFile {
    /// Get only enabled venues
    pub fn enabled_venues(&self) -> Vec<&VenueConfig> {
        self.venues.iter().filter(|v| v.enabled).collect()
    }

    /// Get a specific venue by ID
    pub fn get_venue(&self, id: &str) -> Option<&VenueConfig> {
        self.venues.iter().find(|v| v.id.eq_ignore_ascii_case(id))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let enabled = self.enabled_venues();
        if enabled.is_empty() {
            return Err(ConfigError::NoEnabledVenues);
        }

        for venue in enabled {
            let urls = std::iter::once(&venue.ws_url)
                .chain(venue.private_ws_url.as_ref())
                .chain(venue.rest_url.as_ref());
            for url in urls {
                if url::Url::parse(url).is_err() {
                    return Err(ConfigError::InvalidUrl {
                        venue: venue.id.clone(),
                        url: url.clone(),
                    });
                }
            }
            if venue.order_book.max_buffer_size == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "order_book.max_buffer_size",
                    value: "0".to_string(),
                });
            }
        }

        let reconnect = &self.global.reconnect;
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.jitter",
                value: reconnect.jitter.to_string(),
            });
        }
        if reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_delay_ms",
                value: reconnect.initial_delay_ms.to_string(),
            });
        }
        let fraction = self.global.session.renew_fraction;
        if fraction <= 0.0 || fraction >= 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "session.renew_fraction",
                value: fraction.to_string(),
            });
        }
        Ok(())
    }
}
