//! The serializer seam.
//!
//! The core treats a value as opaque bytes plus a 16-bit flags tag stored
//! alongside it on the server. Anything richer than bytes, strings, and
//! counter integers is the concern of an external serializer implementing
//! these traits.

use std::io;
use std::io::Write;
use std::str;
use std::str::FromStr;

use crate::error::CacheError;

/// Flag values stamped by the built-in implementations.
pub enum Flags {
    Bytes = 0,
}

/// Determines how a value is serialized on its way to the server.
pub trait ToCacheValue {
    /// The 16-bit type tag stored next to the value.
    fn flags(&self) -> u16;

    /// Payload length in bytes, used for the command header.
    fn length(&self) -> usize;

    /// Write the payload bytes.
    fn write_to(&self, writer: &mut dyn Write) -> io::Result<()>;
}

impl<'a> ToCacheValue for &'a [u8] {
    fn flags(&self) -> u16 {
        Flags::Bytes as u16
    }

    fn length(&self) -> usize {
        self.len()
    }

    fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(self)
    }
}

impl ToCacheValue for Vec<u8> {
    fn flags(&self) -> u16 {
        Flags::Bytes as u16
    }

    fn length(&self) -> usize {
        self.len()
    }

    fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(self)
    }
}

impl<'a> ToCacheValue for &'a str {
    fn flags(&self) -> u16 {
        Flags::Bytes as u16
    }

    fn length(&self) -> usize {
        self.as_bytes().len()
    }

    fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(self.as_bytes())
    }
}

impl ToCacheValue for String {
    fn flags(&self) -> u16 {
        Flags::Bytes as u16
    }

    fn length(&self) -> usize {
        self.as_bytes().len()
    }

    fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(self.as_bytes())
    }
}

// Counters are stored as their decimal string so that incr/decr keep working
// on the server side.
impl ToCacheValue for u64 {
    fn flags(&self) -> u16 {
        Flags::Bytes as u16
    }

    fn length(&self) -> usize {
        self.to_string().len()
    }

    fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(self.to_string().as_bytes())
    }
}

/// Determines how a value is deserialized after retrieval.
pub trait FromCacheValue: Sized {
    fn from_cache_value(value: Vec<u8>, flags: u16) -> Result<Self, CacheError>;
}

impl FromCacheValue for (Vec<u8>, u16) {
    fn from_cache_value(value: Vec<u8>, flags: u16) -> Result<Self, CacheError> {
        Ok((value, flags))
    }
}

impl FromCacheValue for Vec<u8> {
    fn from_cache_value(value: Vec<u8>, _: u16) -> Result<Self, CacheError> {
        Ok(value)
    }
}

impl FromCacheValue for String {
    fn from_cache_value(value: Vec<u8>, _: u16) -> Result<Self, CacheError> {
        String::from_utf8(value)
            .map_err(|_| CacheError::Protocol(String::from("value is not valid UTF-8")))
    }
}

impl FromCacheValue for u64 {
    fn from_cache_value(value: Vec<u8>, _: u16) -> Result<Self, CacheError> {
        let text = str::from_utf8(&value)
            .map_err(|_| CacheError::Protocol(String::from("counter is not valid UTF-8")))?;
        u64::from_str(text.trim())
            .map_err(|_| CacheError::Protocol(String::from("counter is not a decimal integer")))
    }
}
