// This file is part of cfcache.
// Copyright (c) 2019, Cloudflare. All rights reserved.
// See LICENSE for licensing information.

//! Consistent-hash continuum mapping key hashes to servers.
//!
//! Each server contributes a fixed number of points to a circular 32-bit
//! keyspace, so adding or removing one server out of N reassigns only about
//! 1/N of the keys.

use std::collections::HashMap;

use crate::hash::hash_key;

/// Number of continuum points generated per server.
pub const POINTS_PER_SERVER: usize = 30;

/// The continuum. Built once at client construction and immutable afterwards,
/// so it can be shared freely between threads.
///
/// Must be built from at least one host.
#[derive(Debug)]
pub struct HashRing {
    /// Ring points sorted ascending by hash. The second element is the index
    /// of the owning server in the order hosts were supplied.
    points: Vec<(u32, usize)>,
    /// Set when the ring was built from exactly one host. Sole-host
    /// deployments must keep working even if hashing degenerates, so lookup
    /// short-circuits without consulting the continuum.
    single: Option<usize>,
}

impl HashRing {
    /// Build the continuum for the given hosts.
    ///
    /// Point 0 of a host is the hash of its UTF-8 bytes; each subsequent
    /// point hashes the decimal string of the previous point's value. When
    /// two points collide, the first server to claim the hash keeps it.
    pub fn new(hosts: &[String]) -> HashRing {
        let mut claimed: HashMap<u32, usize> = HashMap::new();
        for (index, host) in hosts.iter().enumerate() {
            let mut point = hash_key(host.as_bytes());
            claimed.entry(point).or_insert(index);
            for _ in 1..POINTS_PER_SERVER {
                point = hash_key(point.to_string().as_bytes());
                claimed.entry(point).or_insert(index);
            }
        }

        let mut points: Vec<(u32, usize)> = claimed.into_iter().collect();
        points.sort_by_key(|&(point, _)| point);

        let single = if hosts.len() == 1 { Some(0) } else { None };
        HashRing { points, single }
    }

    /// Index of the server owning `hash`: the server of the smallest ring
    /// point at or after `hash`, wrapping to the first point.
    pub fn server_for(&self, hash: u32) -> usize {
        if let Some(index) = self.single {
            return index;
        }
        match self.points.binary_search_by_key(&hash, |&(point, _)| point) {
            Ok(at) => self.points[at].1,
            Err(after) if after == self.points.len() => self.points[0].1,
            Err(after) => self.points[after].1,
        }
    }

    /// Number of distinct points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
