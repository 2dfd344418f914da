// This file is part of cfcache.
// Copyright (c) 2019, Cloudflare. All rights reserved.
// See LICENSE for licensing information.

//! Error taxonomy and traits for working with errors.

use std::error::Error;
use std::fmt;
use std::io;

/// Errors raised by the cache client.
///
/// After construction succeeds, command calls absorb transport and protocol
/// failures into their sentinel return values and log them; the only variant
/// that can escape a command call is `InvalidKey`.
#[derive(Debug)]
pub enum CacheError {
    /// The key is empty, too long, or contains whitespace or control bytes.
    /// Detected locally; nothing is written to the network.
    InvalidKey(String),
    /// The client configuration is unusable, or a server address did not
    /// resolve at construction time.
    Configuration(String),
    /// Connect, read, or write failure, including timeouts.
    Transport(io::Error),
    /// The reply stream violated the framing rules: an empty reply line, a
    /// malformed block header, or a desynchronised stream.
    Protocol(String),
    /// The server answered with `ERROR`, `CLIENT_ERROR`, or `SERVER_ERROR`.
    ServerRejected(String),
    /// The server reported that the key does not exist.
    NotFound,
    /// The server declined to store the value (e.g. `add` on an existing
    /// key or `replace` on a missing one).
    NotStored,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CacheError::InvalidKey(reason) => write!(f, "invalid key: {}", reason),
            CacheError::Configuration(reason) => write!(f, "configuration error: {}", reason),
            CacheError::Transport(err) => write!(f, "transport error: {}", err),
            CacheError::Protocol(reason) => write!(f, "protocol error: {}", reason),
            CacheError::ServerRejected(line) => write!(f, "server rejected command: {}", line),
            CacheError::NotFound => write!(f, "not found"),
            CacheError::NotStored => write!(f, "not stored"),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> CacheError {
        CacheError::Transport(err)
    }
}

/// `WrapError` allows the implementor to wrap its own error type in another error type.
pub trait WrapError<T: Error> {
    /// The returned type in case that the result has no error.
    type Item;

    /// Wrapping an error in the error type `T`.
    fn wrap_err(self) -> Result<Self::Item, T>;
}

/// Trait implementation for `config::ConfigError`.
// The reason that we have a lifetime bound 'static is that we want T to either contain no lifetime
// parameter or contain only the 'static lifetime parameter.
impl<S, T> WrapError<config::ConfigError> for Result<S, T>
where
    T: 'static + Error + Send + Sync,
{
    /// Don't change the returned type, in case there is no error.
    type Item = S;

    fn wrap_err(self) -> Result<S, config::ConfigError> {
        self.map_err(|error| config::ConfigError::Foreign(Box::new(error)))
    }
}
