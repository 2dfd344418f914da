// This file is part of cfcache.
// Copyright (c) 2019, Cloudflare. All rights reserved.
// See LICENSE for licensing information.

//! Client configuration.

use std::convert::TryFrom;
use std::time::Duration;

use crate::error::{CacheError, WrapError};

/// Port used when a server address does not carry one.
pub const DEFAULT_PORT: u16 = 11211;

/// Configuration for the cache client and its per-server pools.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server addresses, each `host` or `host:port`.
    pub servers: Vec<String>,
    /// Timeout applied to both directions of each socket.
    pub send_receive_timeout: Duration,
    /// Idle-pool floor below which connections are never recycled for age.
    pub min_pool_size: usize,
    /// Idle-pool ceiling enforced when a connection is returned.
    pub max_pool_size: usize,
    /// Idle connections older than this are destroyed on return once the
    /// pool holds at least `min_pool_size` of them.
    pub socket_recycle_age: Duration,
    /// Prefix prepended to every key on the wire. Excluded from hashing, so
    /// changing it never reshards the cluster.
    pub key_prefix: String,
    /// How long a server stays dead after a failed connect before another
    /// attempt is allowed.
    pub dead_server_retry_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            servers: Vec::new(),
            send_receive_timeout: Duration::from_millis(2000),
            min_pool_size: 5,
            max_pool_size: 10,
            socket_recycle_age: Duration::from_secs(30 * 60),
            key_prefix: String::new(),
            dead_server_retry_interval: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Default configuration for the given servers.
    pub fn new(servers: Vec<String>) -> ClientConfig {
        ClientConfig {
            servers,
            ..ClientConfig::default()
        }
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.servers.is_empty() {
            return Err(CacheError::Configuration(String::from(
                "at least one server address is required",
            )));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(CacheError::Configuration(String::from(
                "min_pool_size must not exceed max_pool_size",
            )));
        }
        Ok(())
    }

    /// Parse a config from a file.
    ///
    /// Only `servers` is required; every other field keeps its default when
    /// absent. Durations are given as `send_receive_timeout` (milliseconds),
    /// `socket_recycle_age` and `dead_server_retry_interval` (seconds).
    pub fn parse(filename: &str) -> Result<ClientConfig, config::ConfigError> {
        let mut settings = config::Config::new();
        settings.merge(config::File::with_name(filename))?;

        let mut parsed = ClientConfig::default();

        for server in settings.get_array("servers")? {
            parsed.servers.push(server.to_string());
        }

        if let Some(millis) = get_unsigned(&settings, "send_receive_timeout")? {
            parsed.send_receive_timeout = Duration::from_millis(millis);
        }
        if let Some(size) = get_unsigned(&settings, "min_pool_size")? {
            parsed.min_pool_size = size as usize;
        }
        if let Some(size) = get_unsigned(&settings, "max_pool_size")? {
            parsed.max_pool_size = size as usize;
        }
        if let Some(seconds) = get_unsigned(&settings, "socket_recycle_age")? {
            parsed.socket_recycle_age = Duration::from_secs(seconds);
        }
        if let Some(seconds) = get_unsigned(&settings, "dead_server_retry_interval")? {
            parsed.dead_server_retry_interval = Duration::from_secs(seconds);
        }
        match settings.get_str("key_prefix") {
            Err(config::ConfigError::NotFound(_)) => {}
            Err(error) => return Err(error),
            Ok(prefix) => parsed.key_prefix = prefix,
        }

        parsed.validate().wrap_err()?;
        Ok(parsed)
    }
}

/// Read an optional non-negative integer setting.
// The `get_int` interface hands back an `i64`, so range-check it here once
// instead of at every call site.
fn get_unsigned(settings: &config::Config, key: &str) -> Result<Option<u64>, config::ConfigError> {
    match settings.get_int(key) {
        // If it's a not-found error, the caller keeps its default.
        Err(config::ConfigError::NotFound(_)) => Ok(None),

        // Any other error means the user intended to set the value but it
        // did not parse.
        Err(error) => Err(error),

        Ok(val) => match u64::try_from(val) {
            Ok(val) => Ok(Some(val)),
            Err(_) => Err(config::ConfigError::Message(format!(
                "{} is not a valid non-negative integer",
                key
            ))),
        },
    }
}
