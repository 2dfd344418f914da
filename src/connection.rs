// This file is part of cfcache.
// Copyright (c) 2019, Cloudflare. All rights reserved.
// See LICENSE for licensing information.

//! Framed I/O over a single TCP connection.
//!
//! The text protocol interleaves CRLF-terminated command lines with
//! length-prefixed value blocks, so the connection offers exactly those two
//! read shapes plus a classification step for reply lines.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::error::CacheError;

/// One live connection, owned by a pool and leased to one caller at a time.
pub struct PooledConnection {
    reader: BufReader<TcpStream>,
    created: Instant,
    destroyed: bool,
}

impl PooledConnection {
    /// Connect to a pre-resolved endpoint.
    ///
    /// The timeout applies to the connect itself and to both directions of
    /// the established socket. Nagle's algorithm is disabled: requests are
    /// small and latency-bound.
    pub(crate) fn open(addr: &SocketAddr, timeout: Duration) -> Result<PooledConnection, CacheError> {
        let stream = TcpStream::connect_timeout(addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        Ok(PooledConnection {
            reader: BufReader::new(stream),
            created: Instant::now(),
            destroyed: false,
        })
    }

    /// How long ago this connection was established.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Write the whole buffer and flush it.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), CacheError> {
        let stream = self.reader.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Read one line, up to and excluding the CRLF terminator.
    ///
    /// A bare CR followed by anything but LF is part of the line: both bytes
    /// are emitted and scanning continues.
    pub fn read_line(&mut self) -> Result<Vec<u8>, CacheError> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte != b'\r' {
                line.push(byte);
                continue;
            }
            let next = self.read_byte()?;
            if next == b'\n' {
                return Ok(line);
            }
            line.push(b'\r');
            line.push(next);
        }
    }

    /// Read exactly `count` bytes.
    pub fn read_exact_bytes(&mut self, count: usize) -> Result<Vec<u8>, CacheError> {
        let mut buffer = vec![0u8; count];
        self.reader.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Discard bytes up to and including the next CRLF.
    pub fn skip_line(&mut self) -> Result<(), CacheError> {
        self.read_line().map(|_| ())
    }

    /// Read one reply line and classify it.
    ///
    /// An empty line is a protocol violation; a line starting with `ERROR`,
    /// `CLIENT_ERROR`, or `SERVER_ERROR` is a peer rejection. Anything else
    /// is handed back for command-specific parsing.
    pub fn read_response(&mut self) -> Result<Vec<u8>, CacheError> {
        let line = self.read_line()?;
        if line.is_empty() {
            return Err(CacheError::Protocol(String::from("empty reply line")));
        }
        if line.starts_with(b"ERROR")
            || line.starts_with(b"CLIENT_ERROR")
            || line.starts_with(b"SERVER_ERROR")
        {
            return Err(CacheError::ServerRejected(
                String::from_utf8_lossy(&line).into_owned(),
            ));
        }
        Ok(line)
    }

    /// Whether the socket is still connected and usable for reads.
    pub fn is_alive(&self) -> bool {
        if self.destroyed {
            return false;
        }
        if !self.reader.buffer().is_empty() {
            return true;
        }
        let stream = self.reader.get_ref();
        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let alive = match stream.peek(&mut probe) {
            // An orderly shutdown by the peer reads as zero bytes.
            Ok(0) => false,
            // Unread data; the return path treats it as a dirty connection.
            Ok(_) => true,
            Err(ref err) if err.kind() == ErrorKind::WouldBlock => true,
            Err(_) => false,
        };
        let _ = stream.set_nonblocking(false);
        alive
    }

    /// Whether the peer sent bytes the caller never consumed.
    pub fn has_unread_data(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        if !self.reader.buffer().is_empty() {
            return true;
        }
        let stream = self.reader.get_ref();
        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut probe = [0u8; 1];
        let dirty = match stream.peek(&mut probe) {
            Ok(n) => n > 0,
            Err(_) => false,
        };
        let _ = stream.set_nonblocking(false);
        dirty
    }

    /// Consume and discard whatever is currently readable, without blocking
    /// on the read timeout.
    pub fn drain(&mut self) {
        let buffered = self.reader.buffer().len();
        self.reader.consume(buffered);

        let stream = self.reader.get_ref();
        if stream.set_nonblocking(true).is_err() {
            return;
        }
        let mut reader = stream;
        let mut sink = [0u8; 512];
        loop {
            match reader.read(&mut sink) {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = stream.set_nonblocking(false);
    }

    /// Shut down both directions and mark the connection destroyed. Errors
    /// are swallowed; the connection is unusable either way.
    pub fn close(&mut self) {
        if self.destroyed {
            return;
        }
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        self.destroyed = true;
    }

    /// Whether `close` has been called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn read_byte(&mut self) -> Result<u8, CacheError> {
        let mut byte = [0u8; 1];
        self.reader.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}
