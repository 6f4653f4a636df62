//! Inbound nonce replay protection.
//!
//! Grounded on the two-bucket scheme in `peer.go`'s `PktProcess`: a
//! sliding window of 256 recently-seen nonces held as two rotating
//! sets of capacity 128, for datagram substrates where reordering is
//! expected. Stream substrates instead use strict in-order delivery.

use std::collections::HashSet;

pub const BUCKET_CAPACITY: usize = 128;

/// Outcome of presenting a freshly-decrypted nonce to the replay
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVerdict {
    Accept,
    Replayed,
}

/// Reorderable replay window: accepts any of the last `2 * BUCKET_CAPACITY`
/// nonces exactly once, tolerating out-of-order arrival within that
/// span. Used for UDP-style substrates.
pub struct ReorderableWindow {
    bucket0: HashSet<u64>,
    bucket1: HashSet<u64>,
    latest: u64,
}

impl ReorderableWindow {
    pub fn new() -> Self {
        Self {
            bucket0: HashSet::with_capacity(BUCKET_CAPACITY),
            bucket1: HashSet::with_capacity(BUCKET_CAPACITY),
            latest: 0,
        }
    }

    pub fn check(&mut self, nonce: u64) -> ReplayVerdict {
        if self.bucket0.contains(&nonce)
            || self.bucket1.contains(&nonce)
            || nonce + 2 * BUCKET_CAPACITY as u64 + 1 <= self.latest
        {
            return ReplayVerdict::Replayed;
        }
        self.bucket0.insert(nonce);
        if self.bucket0.len() >= BUCKET_CAPACITY {
            self.bucket1 = std::mem::replace(&mut self.bucket0, HashSet::with_capacity(BUCKET_CAPACITY));
        }
        if nonce > self.latest {
            self.latest = nonce;
        }
        ReplayVerdict::Accept
    }
}

impl Default for ReorderableWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Strict in-order replay window: only the exact next expected nonce
/// is accepted. Used for stream substrates, which already guarantee
/// ordered delivery.
pub struct StrictWindow {
    expect: u64,
}

impl StrictWindow {
    pub fn new(first_expected: u64) -> Self {
        Self { expect: first_expected }
    }

    pub fn check(&mut self, nonce: u64) -> ReplayVerdict {
        if nonce != self.expect {
            return ReplayVerdict::Replayed;
        }
        self.expect += 2;
        ReplayVerdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorderable_accepts_out_of_order_within_window() {
        let mut w = ReorderableWindow::new();
        assert_eq!(w.check(5), ReplayVerdict::Accept);
        assert_eq!(w.check(3), ReplayVerdict::Accept);
        assert_eq!(w.check(3), ReplayVerdict::Replayed);
    }

    #[test]
    fn reorderable_rejects_far_behind_latest() {
        let mut w = ReorderableWindow::new();
        w.check(10_000);
        assert_eq!(w.check(2), ReplayVerdict::Replayed);
    }

    #[test]
    fn reorderable_rotates_buckets_at_capacity() {
        let mut w = ReorderableWindow::new();
        for n in 0..BUCKET_CAPACITY as u64 {
            assert_eq!(w.check(n * 2), ReplayVerdict::Accept);
        }
        // Still within the combined window, so an early nonce from
        // bucket1 must still be accepted exactly once.
        assert_eq!(w.check(1_000_000), ReplayVerdict::Accept);
    }

    #[test]
    fn strict_requires_exact_order() {
        let mut w = StrictWindow::new(2);
        assert_eq!(w.check(4), ReplayVerdict::Replayed);
        assert_eq!(w.check(2), ReplayVerdict::Accept);
        assert_eq!(w.check(2), ReplayVerdict::Replayed);
        assert_eq!(w.check(4), ReplayVerdict::Accept);
    }
}
