// This file is part of cfcache.
// Copyright (c) 2019, Cloudflare. All rights reserved.
// See LICENSE for licensing information.

//! The protocol engine.
//!
//! Commands are validated and encoded here, replies parsed, and the
//! per-server pools driven. Transport and protocol failures never escape a
//! command call: the connection involved is closed, the failure is logged,
//! and the command returns its sentinel (`false`, `None`, or a null slot).

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use slog::{debug, warn};

use crate::config::{ClientConfig, DEFAULT_PORT};
use crate::error::CacheError;
use crate::hash::hash_key;
use crate::pool::{PoolLease, PoolOptions, PoolStatus, SocketPool};
use crate::ring::HashRing;
use crate::value::{FromCacheValue, ToCacheValue};

/// Longest key accepted by the protocol, in bytes.
const MAX_KEY_LENGTH: usize = 250;

/// When a value should expire on the server.
#[derive(Clone, Copy, Debug)]
pub enum Expiry {
    /// The value never expires.
    Never,
    /// Expire after the given duration.
    In(Duration),
    /// Expire at an absolute point in time.
    At(SystemTime),
}

impl Expiry {
    /// The non-negative integer sent on the wire; zero means "never".
    fn wire_seconds(&self) -> u64 {
        match *self {
            Expiry::Never => 0,
            Expiry::In(duration) => duration.as_secs(),
            Expiry::At(when) => match when.duration_since(UNIX_EPOCH) {
                Ok(since_epoch) => since_epoch.as_secs(),
                // Pre-epoch timestamps are unrepresentable; expire as soon
                // as the server allows.
                Err(_) => 1,
            },
        }
    }
}

enum StoreCommand {
    Set,
    Add,
    Replace,
}

impl fmt::Display for StoreCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StoreCommand::Set => write!(f, "set"),
            StoreCommand::Add => write!(f, "add"),
            StoreCommand::Replace => write!(f, "replace"),
        }
    }
}

/// One server's entry in the status report.
#[derive(Clone, Debug)]
pub struct ServerStatus {
    pub pool: PoolStatus,
    /// Reply to a `version` probe issued through the normal acquire path,
    /// `None` when the server is dead or misbehaving.
    pub version: Option<String>,
}

/// A pooled client for a cluster of cache servers.
///
/// The client is cheap to share: every method takes `&self`, and callers on
/// multiple threads get concurrency from the per-server pools.
pub struct Client {
    pools: Vec<Arc<SocketPool>>,
    hosts: Vec<String>,
    ring: HashRing,
    key_prefix: String,
    logger: slog::Logger,
    in_flight: AtomicUsize,
}

impl Client {
    /// Create a client for the given cluster.
    ///
    /// Host strings accept `host` or `host:port`; the port defaults to
    /// 11211. Every address is resolved here; an unresolvable address or an
    /// inconsistent configuration aborts construction. No connections are
    /// opened until the first command.
    pub fn new(config: ClientConfig, logger: &slog::Logger) -> Result<Client, CacheError> {
        config.validate()?;

        let options = PoolOptions {
            send_receive_timeout: config.send_receive_timeout,
            min_pool_size: config.min_pool_size,
            max_pool_size: config.max_pool_size,
            socket_recycle_age: config.socket_recycle_age,
            dead_server_retry_interval: config.dead_server_retry_interval,
        };

        let mut hosts = Vec::with_capacity(config.servers.len());
        let mut pools = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let (host, addr) = resolve_server(server)?;
            pools.push(Arc::new(SocketPool::new(
                host.clone(),
                addr,
                options.clone(),
                logger,
            )));
            hosts.push(host);
        }

        let ring = HashRing::new(&hosts);
        Ok(Client {
            pools,
            hosts,
            ring,
            key_prefix: config.key_prefix,
            logger: logger.clone(),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Store a value unconditionally. Returns whether the server stored it.
    pub fn set<V: ToCacheValue>(
        &self,
        key: &str,
        value: V,
        expiry: Expiry,
    ) -> Result<bool, CacheError> {
        self.store(StoreCommand::Set, key, value, expiry, None)
    }

    /// Like `set`, with an explicit key hash overriding the computed one.
    pub fn set_with_hash<V: ToCacheValue>(
        &self,
        key: &str,
        hash: u32,
        value: V,
        expiry: Expiry,
    ) -> Result<bool, CacheError> {
        self.store(StoreCommand::Set, key, value, expiry, Some(hash))
    }

    /// Store a value only if the key does not exist yet.
    pub fn add<V: ToCacheValue>(
        &self,
        key: &str,
        value: V,
        expiry: Expiry,
    ) -> Result<bool, CacheError> {
        self.store(StoreCommand::Add, key, value, expiry, None)
    }

    /// Store a value only if the key already exists.
    pub fn replace<V: ToCacheValue>(
        &self,
        key: &str,
        value: V,
        expiry: Expiry,
    ) -> Result<bool, CacheError> {
        self.store(StoreCommand::Replace, key, value, expiry, None)
    }

    /// Store a counter as its decimal string, so `increment` and
    /// `decrement` work on it afterwards.
    pub fn set_counter(&self, key: &str, value: u64) -> Result<bool, CacheError> {
        self.store(StoreCommand::Set, key, value, Expiry::Never, None)
    }

    /// Fetch a single value. `None` when the key is missing, the owning
    /// server is dead, or the value cannot be deserialized.
    pub fn get<V: FromCacheValue>(&self, key: &str) -> Result<Option<V>, CacheError> {
        self.get_impl(key, None)
    }

    /// Like `get`, with an explicit key hash overriding the computed one.
    pub fn get_with_hash<V: FromCacheValue>(
        &self,
        key: &str,
        hash: u32,
    ) -> Result<Option<V>, CacheError> {
        self.get_impl(key, Some(hash))
    }

    /// Fetch many keys at once.
    ///
    /// Keys are grouped by owning server and each server sees one batched
    /// request. The result is aligned with `keys`: duplicates fill every
    /// slot they came from, and keys the servers did not return stay `None`.
    pub fn get_multi<V: FromCacheValue>(
        &self,
        keys: &[&str],
    ) -> Result<Vec<Option<V>>, CacheError> {
        for key in keys {
            validate_key(key)?;
        }
        let _guard = InFlightGuard::enter(&self.in_flight);

        let mut results: Vec<Option<V>> = Vec::with_capacity(keys.len());
        for _ in 0..keys.len() {
            results.push(None);
        }

        // Server index -> key -> every position that requested it.
        let mut by_server: HashMap<usize, HashMap<&str, Vec<usize>>> = HashMap::new();
        for (position, key) in keys.iter().enumerate() {
            let server = self.ring.server_for(hash_key(key.as_bytes()));
            by_server
                .entry(server)
                .or_insert_with(HashMap::new)
                .entry(*key)
                .or_insert_with(Vec::new)
                .push(position);
        }

        for (server, positions) in by_server {
            let pool = &self.pools[server];
            let mut lease = match pool.acquire() {
                Some(lease) => lease,
                // Dead server: its slots stay null.
                None => continue,
            };

            let mut request = String::from("get");
            for key in positions.keys() {
                request.push(' ');
                request.push_str(&self.wire_key(key));
            }
            request.push_str("\r\n");

            match self.read_values(&mut lease, request.as_bytes()) {
                Ok(blocks) => {
                    for block in blocks {
                        // The server echoes the wire key, prefix included;
                        // strip it before mapping back to positions.
                        let raw = match self.strip_prefix(&block.key) {
                            Some(raw) => raw,
                            None => {
                                debug!(self.logger, "reply key is missing the prefix";
                                       "key" => block.key.clone());
                                continue;
                            }
                        };
                        let slots = match positions.get(raw) {
                            Some(slots) => slots,
                            None => {
                                debug!(self.logger, "server returned an unrequested key";
                                       "key" => block.key.clone());
                                continue;
                            }
                        };
                        for &position in slots {
                            match V::from_cache_value(block.payload.clone(), block.flags) {
                                Ok(value) => results[position] = Some(value),
                                Err(err) => {
                                    warn!(self.logger, "cannot deserialize value";
                                          "key" => block.key.clone(),
                                          "error" => err.to_string());
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    self.fail(&mut lease, self.pools[server].host(), err);
                }
            }
        }

        Ok(results)
    }

    /// Delete a key. Returns whether the server knew it.
    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.delete_impl(key, None, None)
    }

    /// Like `delete`, with an explicit key hash overriding the computed one.
    pub fn delete_with_hash(&self, key: &str, hash: u32) -> Result<bool, CacheError> {
        self.delete_impl(key, None, Some(hash))
    }

    /// Delete a key with the protocol's optional time argument, which blocks
    /// `add` and `replace` on the key for that long.
    pub fn delete_with_time(&self, key: &str, time: Expiry) -> Result<bool, CacheError> {
        self.delete_impl(key, Some(time), None)
    }

    /// Increase a counter. `None` when the key does not exist.
    pub fn increment(&self, key: &str, delta: u64) -> Result<Option<u64>, CacheError> {
        self.counter("incr", key, delta, None)
    }

    pub fn increment_with_hash(
        &self,
        key: &str,
        hash: u32,
        delta: u64,
    ) -> Result<Option<u64>, CacheError> {
        self.counter("incr", key, delta, Some(hash))
    }

    /// Decrease a counter; the server clamps at zero. `None` when the key
    /// does not exist.
    pub fn decrement(&self, key: &str, delta: u64) -> Result<Option<u64>, CacheError> {
        self.counter("decr", key, delta, None)
    }

    pub fn decrement_with_hash(
        &self,
        key: &str,
        hash: u32,
        delta: u64,
    ) -> Result<Option<u64>, CacheError> {
        self.counter("decr", key, delta, Some(hash))
    }

    /// Flush every server. True only when every server acknowledged.
    pub fn flush_all(&self) -> bool {
        self.flush_all_impl(None)
    }

    /// Flush every server after a delay.
    pub fn flush_all_delayed(&self, delay: Duration) -> bool {
        self.flush_all_impl(Some(delay.as_secs()))
    }

    /// Fetch the `stats` map from every server. A dead or misbehaving
    /// server yields `None`.
    pub fn stats(&self) -> Vec<(String, Option<HashMap<String, String>>)> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        self.pools
            .iter()
            .map(|pool| (pool.host().to_owned(), self.stats_for(pool)))
            .collect()
    }

    /// Ask every server for its version string.
    pub fn version(&self) -> Vec<(String, Option<String>)> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        self.pools
            .iter()
            .map(|pool| (pool.host().to_owned(), self.probe_version(pool)))
            .collect()
    }

    /// Per-server pool counters plus a `version` probe.
    ///
    /// The probe goes through the normal acquire path, so a dead pool is
    /// reported as dead without connecting before its retry deadline.
    pub fn status(&self) -> Vec<ServerStatus> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        self.pools
            .iter()
            .map(|pool| {
                let version = self.probe_version(pool);
                ServerStatus {
                    version,
                    pool: pool.status(),
                }
            })
            .collect()
    }

    /// Number of commands currently executing across all threads.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The resolved `host:port` strings, in configuration order.
    pub fn servers(&self) -> &[String] {
        &self.hosts
    }

    fn store<V: ToCacheValue>(
        &self,
        command: StoreCommand,
        key: &str,
        value: V,
        expiry: Expiry,
        hash: Option<u32>,
    ) -> Result<bool, CacheError> {
        validate_key(key)?;
        let _guard = InFlightGuard::enter(&self.in_flight);

        // Serialize before anything touches the network.
        let mut payload = Vec::with_capacity(value.length());
        if let Err(err) = value.write_to(&mut payload) {
            warn!(self.logger, "value serialization failed";
                  "key" => key.to_owned(),
                  "error" => err.to_string());
            return Ok(false);
        }

        let mut request = format!(
            "{} {} {} {} {}\r\n",
            command,
            self.wire_key(key),
            value.flags(),
            expiry.wire_seconds(),
            payload.len()
        )
        .into_bytes();
        request.extend_from_slice(&payload);
        request.extend_from_slice(b"\r\n");

        let pool = self.pool_for(key, hash);
        let mut lease = match pool.acquire() {
            Some(lease) => lease,
            None => return Ok(false),
        };
        match self.round_trip(&mut lease, &request) {
            Ok(line) => Ok(line.starts_with(b"STORED")),
            Err(err) => {
                self.fail(&mut lease, key, err);
                Ok(false)
            }
        }
    }

    fn get_impl<V: FromCacheValue>(
        &self,
        key: &str,
        hash: Option<u32>,
    ) -> Result<Option<V>, CacheError> {
        validate_key(key)?;
        let _guard = InFlightGuard::enter(&self.in_flight);

        let request = format!("get {}\r\n", self.wire_key(key)).into_bytes();
        let pool = self.pool_for(key, hash);
        let mut lease = match pool.acquire() {
            Some(lease) => lease,
            None => return Ok(None),
        };
        match self.read_values(&mut lease, &request) {
            Ok(blocks) => {
                for block in blocks {
                    match V::from_cache_value(block.payload, block.flags) {
                        Ok(value) => return Ok(Some(value)),
                        Err(err) => {
                            warn!(self.logger, "cannot deserialize value";
                                  "key" => key.to_owned(),
                                  "error" => err.to_string());
                            return Ok(None);
                        }
                    }
                }
                Ok(None)
            }
            Err(err) => {
                self.fail(&mut lease, key, err);
                Ok(None)
            }
        }
    }

    fn delete_impl(
        &self,
        key: &str,
        time: Option<Expiry>,
        hash: Option<u32>,
    ) -> Result<bool, CacheError> {
        validate_key(key)?;
        let _guard = InFlightGuard::enter(&self.in_flight);

        let request = match time {
            Some(time) => format!(
                "delete {} {}\r\n",
                self.wire_key(key),
                time.wire_seconds()
            ),
            None => format!("delete {}\r\n", self.wire_key(key)),
        }
        .into_bytes();

        let pool = self.pool_for(key, hash);
        let mut lease = match pool.acquire() {
            Some(lease) => lease,
            None => return Ok(false),
        };
        match self.round_trip(&mut lease, &request) {
            Ok(line) => Ok(line.starts_with(b"DELETED")),
            Err(err) => {
                self.fail(&mut lease, key, err);
                Ok(false)
            }
        }
    }

    fn counter(
        &self,
        verb: &str,
        key: &str,
        delta: u64,
        hash: Option<u32>,
    ) -> Result<Option<u64>, CacheError> {
        validate_key(key)?;
        let _guard = InFlightGuard::enter(&self.in_flight);

        let request = format!("{} {} {}\r\n", verb, self.wire_key(key), delta).into_bytes();
        let pool = self.pool_for(key, hash);
        let mut lease = match pool.acquire() {
            Some(lease) => lease,
            None => return Ok(None),
        };
        match self.round_trip(&mut lease, &request) {
            Ok(line) => {
                if line.starts_with(b"NOT_FOUND") {
                    return Ok(None);
                }
                // Some servers pad the decimal with NULs or spaces.
                let text = String::from_utf8_lossy(&line);
                let trimmed =
                    text.trim_matches(|c: char| c == '\0' || c == ' ' || c == '\r' || c == '\n');
                match trimmed.parse::<u64>() {
                    Ok(number) => Ok(Some(number)),
                    Err(_) => {
                        warn!(self.logger, "unparseable counter reply";
                              "key" => key.to_owned(),
                              "reply" => text.clone().into_owned());
                        Ok(None)
                    }
                }
            }
            Err(err) => {
                self.fail(&mut lease, key, err);
                Ok(None)
            }
        }
    }

    fn flush_all_impl(&self, delay: Option<u64>) -> bool {
        let _guard = InFlightGuard::enter(&self.in_flight);

        let request = match delay {
            Some(seconds) => format!("flush_all {}\r\n", seconds),
            None => String::from("flush_all\r\n"),
        }
        .into_bytes();

        let mut all_ok = true;
        for pool in &self.pools {
            let mut lease = match pool.acquire() {
                Some(lease) => lease,
                None => {
                    all_ok = false;
                    continue;
                }
            };
            match self.round_trip(&mut lease, &request) {
                Ok(line) => {
                    if !line.starts_with(b"OK") {
                        all_ok = false;
                    }
                }
                Err(err) => {
                    self.fail(&mut lease, pool.host(), err);
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    fn stats_for(&self, pool: &Arc<SocketPool>) -> Option<HashMap<String, String>> {
        let mut lease = pool.acquire()?;
        if let Err(err) = lease.connection().write(b"stats\r\n") {
            self.fail(&mut lease, pool.host(), err);
            return None;
        }

        let mut stats = HashMap::new();
        loop {
            let line = match lease.connection().read_response() {
                Ok(line) => line,
                Err(err) => {
                    self.fail(&mut lease, pool.host(), err);
                    return None;
                }
            };
            if line.starts_with(b"END") {
                return Some(stats);
            }
            let text = match str::from_utf8(&line) {
                Ok(text) => text,
                Err(_) => {
                    self.fail(
                        &mut lease,
                        pool.host(),
                        CacheError::Protocol(String::from("stats line is not UTF-8")),
                    );
                    return None;
                }
            };
            // STAT <name> <value>, where the value may contain spaces.
            let mut parts = text.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("STAT"), Some(name), Some(value)) => {
                    stats.insert(name.to_owned(), value.to_owned());
                }
                _ => {
                    self.fail(
                        &mut lease,
                        pool.host(),
                        CacheError::Protocol(format!("unexpected stats line: {}", text)),
                    );
                    return None;
                }
            }
        }
    }

    fn probe_version(&self, pool: &Arc<SocketPool>) -> Option<String> {
        let mut lease = pool.acquire()?;
        match self.round_trip(&mut lease, b"version\r\n") {
            Ok(line) => {
                let text = String::from_utf8_lossy(&line).into_owned();
                if text.starts_with("VERSION ") {
                    Some(text["VERSION ".len()..].to_owned())
                } else {
                    warn!(self.logger, "unexpected version reply";
                          "server" => pool.host().to_owned(),
                          "reply" => text);
                    None
                }
            }
            Err(err) => {
                self.fail(&mut lease, pool.host(), err);
                None
            }
        }
    }

    /// Write a request and read its single reply line.
    fn round_trip(&self, lease: &mut PoolLease, request: &[u8]) -> Result<Vec<u8>, CacheError> {
        lease.connection().write(request)?;
        lease.connection().read_response()
    }

    /// Write a request and read `VALUE` blocks until the terminating `END`.
    fn read_values(
        &self,
        lease: &mut PoolLease,
        request: &[u8],
    ) -> Result<Vec<ValueBlock>, CacheError> {
        lease.connection().write(request)?;
        let mut blocks = Vec::new();
        loop {
            let line = lease.connection().read_response()?;
            if line.starts_with(b"END") {
                return Ok(blocks);
            }
            let header = parse_value_header(&line)?;
            let payload = lease.connection().read_exact_bytes(header.length)?;
            // The CRLF after the payload.
            lease.connection().skip_line()?;
            blocks.push(ValueBlock {
                key: header.key,
                flags: header.flags,
                payload,
            });
        }
    }

    /// Record a failed command. Transport and protocol failures poison the
    /// stream and close the connection; a rejection line was fully consumed,
    /// so the connection stays usable.
    fn fail(&self, lease: &mut PoolLease, context: &str, err: CacheError) {
        match err {
            CacheError::ServerRejected(_) => {}
            _ => lease.close(),
        }
        warn!(self.logger, "command failed";
              "context" => context.to_owned(),
              "error" => err.to_string());
    }

    fn pool_for(&self, key: &str, hash: Option<u32>) -> &Arc<SocketPool> {
        let hash = hash.unwrap_or_else(|| hash_key(key.as_bytes()));
        &self.pools[self.ring.server_for(hash)]
    }

    /// The key as sent on the wire. Hashing always uses the raw key, so the
    /// prefix never affects server placement.
    fn wire_key(&self, key: &str) -> String {
        let mut wire = String::with_capacity(self.key_prefix.len() + key.len());
        wire.push_str(&self.key_prefix);
        wire.push_str(key);
        wire
    }

    fn strip_prefix<'a>(&self, reply_key: &'a str) -> Option<&'a str> {
        if self.key_prefix.is_empty() {
            return Some(reply_key);
        }
        if reply_key.starts_with(&self.key_prefix) {
            Some(&reply_key[self.key_prefix.len()..])
        } else {
            None
        }
    }
}

struct ValueBlock {
    key: String,
    flags: u16,
    payload: Vec<u8>,
}

struct ValueHeader {
    key: String,
    flags: u16,
    length: usize,
}

/// Parse `VALUE <key> <flags> <bytes>`.
fn parse_value_header(line: &[u8]) -> Result<ValueHeader, CacheError> {
    let text = str::from_utf8(line)
        .map_err(|_| CacheError::Protocol(String::from("value header is not UTF-8")))?;
    let mut parts = text.split(' ');
    if parts.next() != Some("VALUE") {
        return Err(CacheError::Protocol(format!(
            "expected a VALUE block, got: {}",
            text
        )));
    }
    let key = parts
        .next()
        .ok_or_else(|| CacheError::Protocol(String::from("value header is missing the key")))?;
    let flags = parts
        .next()
        .and_then(|field| field.parse::<u16>().ok())
        .ok_or_else(|| CacheError::Protocol(String::from("value header has a bad flags field")))?;
    let length = parts
        .next()
        .and_then(|field| field.parse::<usize>().ok())
        .ok_or_else(|| CacheError::Protocol(String::from("value header has a bad length field")))?;
    Ok(ValueHeader {
        key: key.to_owned(),
        flags,
        length,
    })
}

/// Check a key before it goes anywhere near a socket.
fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey(String::from("key is empty")));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "key is longer than {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    for &byte in key.as_bytes() {
        // Space and the ASCII control whitespace set: HT, LF, VT, FF, CR.
        if byte == b' ' || (byte >= 0x09 && byte <= 0x0d) {
            return Err(CacheError::InvalidKey(String::from(
                "key contains whitespace or control characters",
            )));
        }
    }
    Ok(())
}

/// Resolve `host`, `host:port`, or a literal socket address.
fn resolve_server(server: &str) -> Result<(String, SocketAddr), CacheError> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok((addr.to_string(), addr));
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        let addr = SocketAddr::new(ip, DEFAULT_PORT);
        return Ok((addr.to_string(), addr));
    }

    let (host, port) = match server.rfind(':') {
        // A lone colon separates a hostname from a port; more than one
        // means a bare IPv6 literal without a port.
        Some(colon) if !server[..colon].contains(':') => {
            let port = server[colon + 1..].parse::<u16>().map_err(|_| {
                CacheError::Configuration(format!("invalid port in server address {}", server))
            })?;
            (&server[..colon], port)
        }
        _ => (server, DEFAULT_PORT),
    };

    let mut addrs = (host, port).to_socket_addrs().map_err(|err| {
        CacheError::Configuration(format!("cannot resolve {}: {}", server, err))
    })?;
    match addrs.next() {
        Some(addr) => Ok((format!("{}:{}", host, port), addr)),
        None => Err(CacheError::Configuration(format!(
            "cannot resolve {}",
            server
        ))),
    }
}

/// Counts an operation for as long as it runs, on every exit path.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> InFlightGuard<'a> {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(counter)
    }
}

impl<'a> Drop for InFlightGuard<'a> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
