// This file is part of cfcache.
// Copyright (c) 2019, Cloudflare. All rights reserved.
// See LICENSE for licensing information.

//! Per-server connection pool.
//!
//! Each server gets one pool: a mutex-guarded LIFO of idle connections plus
//! the liveness state that isolates a dead server from the rest of the
//! cluster. The mutex is never held across I/O.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use lazy_static::lazy_static;
use prometheus::{opts, register_counter, register_int_counter, IntCounter};
use slog::{error, info};

use crate::connection::PooledConnection;

lazy_static! {
    static ref DEAD_SERVER_COUNTER: IntCounter = register_int_counter!(
        "cache_servers_marked_dead_total",
        "Number of times a server was marked dead"
    )
    .unwrap();
    static ref RECONNECT_COUNTER: IntCounter = register_int_counter!(
        "cache_server_reconnects_total",
        "Number of successful reconnects after a dead period"
    )
    .unwrap();
}

/// Pool behaviour knobs, copied out of the client configuration.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    pub send_receive_timeout: Duration,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub socket_recycle_age: Duration,
    pub dead_server_retry_interval: Duration,
}

/// Whether the server is currently reachable.
///
/// Dead state is entered only on a failed connect, never on a per-command
/// failure, and left only once a new connect succeeds.
#[derive(Clone, Copy, Debug)]
enum Liveness {
    Alive,
    /// No connect attempts until the deadline passes.
    Dead(Instant),
}

#[derive(Clone, Debug, Default)]
struct PoolCounters {
    new_sockets: u64,
    failed_new_sockets: u64,
    reused_sockets: u64,
    died_in_pool: u64,
    died_on_return: u64,
    dirty_on_return: u64,
    reconnects: u64,
}

struct PoolState {
    /// Idle connections; the most recently returned sits at the back and is
    /// acquired first, to ride TCP keep-alive as long as possible.
    idle: Vec<PooledConnection>,
    acquired: usize,
    liveness: Liveness,
    counters: PoolCounters,
}

/// Point-in-time snapshot of one pool, for the status interface.
#[derive(Clone, Debug)]
pub struct PoolStatus {
    pub host: String,
    pub idle: usize,
    pub acquired: usize,
    pub new_sockets: u64,
    pub failed_new_sockets: u64,
    pub reused_sockets: u64,
    pub died_in_pool: u64,
    pub died_on_return: u64,
    pub dirty_on_return: u64,
    pub reconnects: u64,
    pub alive: bool,
    /// When the next connect attempt is allowed, for a dead server.
    pub retry_at: Option<SystemTime>,
}

/// Connection pool for a single server.
pub struct SocketPool {
    host: String,
    addr: SocketAddr,
    options: PoolOptions,
    state: Mutex<PoolState>,
    logger: slog::Logger,
}

impl SocketPool {
    pub fn new(
        host: String,
        addr: SocketAddr,
        options: PoolOptions,
        logger: &slog::Logger,
    ) -> SocketPool {
        SocketPool {
            host,
            addr,
            options,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                acquired: 0,
                liveness: Liveness::Alive,
                counters: PoolCounters::default(),
            }),
            logger: logger.clone(),
        }
    }

    /// The `host:port` this pool serves.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Lease a connection, reusing an idle one when possible.
    ///
    /// Returns `None` when the server is in its dead-retry window or a fresh
    /// connect fails. Acquisition never blocks on other leases: when the
    /// idle list is empty a new connection is constructed, regardless of how
    /// many are already out.
    pub fn acquire(self: &Arc<Self>) -> Option<PoolLease> {
        loop {
            let popped = {
                let mut state = self.lock_state();
                if let Liveness::Dead(until) = state.liveness {
                    if Instant::now() < until {
                        return None;
                    }
                }
                match state.idle.pop() {
                    Some(conn) => Some(conn),
                    None => {
                        state.counters.new_sockets += 1;
                        None
                    }
                }
            };

            let mut conn = match popped {
                Some(conn) => conn,
                None => break,
            };

            // Liveness is checked outside the lock: it peeks at the socket.
            if conn.is_alive() {
                let mut state = self.lock_state();
                state.acquired += 1;
                state.counters.reused_sockets += 1;
                return Some(PoolLease::new(self.clone(), conn));
            }
            conn.close();
            self.lock_state().counters.died_in_pool += 1;
        }

        match PooledConnection::open(&self.addr, self.options.send_receive_timeout) {
            Ok(conn) => {
                let mut state = self.lock_state();
                if let Liveness::Dead(_) = state.liveness {
                    state.counters.reconnects += 1;
                    RECONNECT_COUNTER.inc();
                    info!(self.logger, "server revived after dead period";
                          "server" => self.host.clone());
                }
                state.liveness = Liveness::Alive;
                state.acquired += 1;
                Some(PoolLease::new(self.clone(), conn))
            }
            Err(err) => {
                let retry_at = Instant::now() + self.options.dead_server_retry_interval;
                let mut state = self.lock_state();
                state.counters.failed_new_sockets += 1;
                state.liveness = Liveness::Dead(retry_at);
                DEAD_SERVER_COUNTER.inc();
                error!(self.logger, "cannot connect, marking server dead";
                       "server" => self.host.clone(),
                       "error" => err.to_string());
                None
            }
        }
    }

    /// Take a connection back from a lease.
    fn release(&self, mut conn: PooledConnection) {
        {
            let mut state = self.lock_state();
            state.acquired = state.acquired.saturating_sub(1);
            if conn.is_destroyed() {
                state.counters.died_on_return += 1;
                return;
            }
        }

        // Leftover bytes mean the caller and the server disagreed about
        // framing; the stream cannot be trusted for another command.
        if conn.has_unread_data() {
            conn.drain();
            conn.close();
            self.lock_state().counters.dirty_on_return += 1;
            return;
        }

        let age = conn.age();
        let mut state = self.lock_state();
        let full = state.idle.len() >= self.options.max_pool_size;
        let expired = state.idle.len() >= self.options.min_pool_size
            && age > self.options.socket_recycle_age;
        if full || expired {
            drop(state);
            conn.close();
        } else {
            state.idle.push(conn);
        }
    }

    /// Snapshot the pool's counters and liveness.
    pub fn status(&self) -> PoolStatus {
        let state = self.lock_state();
        let (alive, retry_at) = match state.liveness {
            Liveness::Alive => (true, None),
            Liveness::Dead(until) => {
                let remaining = until.saturating_duration_since(Instant::now());
                (false, Some(SystemTime::now() + remaining))
            }
        };
        PoolStatus {
            host: self.host.clone(),
            idle: state.idle.len(),
            acquired: state.acquired,
            new_sockets: state.counters.new_sockets,
            failed_new_sockets: state.counters.failed_new_sockets,
            reused_sockets: state.counters.reused_sockets,
            died_in_pool: state.counters.died_in_pool,
            died_on_return: state.counters.died_on_return,
            dirty_on_return: state.counters.dirty_on_return,
            reconnects: state.counters.reconnects,
            alive,
            retry_at,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<PoolState> {
        self.state.lock().expect("BUG: pool mutex poisoned")
    }
}

/// A leased connection that finds its way home on every exit path.
///
/// Dropping the lease returns the connection to its pool; a connection the
/// caller closed first is treated as dead on return.
pub struct PoolLease {
    pool: Arc<SocketPool>,
    conn: Option<PooledConnection>,
}

impl PoolLease {
    fn new(pool: Arc<SocketPool>, conn: PooledConnection) -> PoolLease {
        PoolLease {
            pool,
            conn: Some(conn),
        }
    }

    /// The leased connection.
    pub fn connection(&mut self) -> &mut PooledConnection {
        self.conn
            .as_mut()
            .expect("BUG: lease accessed after release")
    }

    /// Close the connection; the pool will discard it on return.
    pub fn close(&mut self) {
        self.connection().close();
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
