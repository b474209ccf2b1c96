// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub type SessionId = u64;

/// Distinguishes a local client connection from a federated peer link.
///
/// Both kinds speak the same wire protocol; routing differs in which trie
/// and registry they touch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionKind {
    LocalTcp,
    LocalWs,
    PeerInbound,
    PeerOutbound,
}

impl SessionKind {
    #[must_use]
    pub const fn is_peer(self) -> bool {
        matches!(self, Self::PeerInbound | Self::PeerOutbound)
    }
}

/// Process-wide counters, updated atomically on every packet boundary.
///
/// These back the `$SYS/broker/...` topics emitted by the stats publisher.
#[derive(Debug, Default)]
pub struct GlobalState {
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub msg_received: AtomicU64,
    pub msg_sent: AtomicU64,
    pub pub_received: AtomicU64,
    pub pub_sent: AtomicU64,
    pub clients_connected: AtomicI64,
    pub clients_disconnected: AtomicU64,
    pub clients_maximum: AtomicI64,
    pub clients_total: AtomicU64,
    pub retained_count: AtomicI64,
    pub subscriptions_count: AtomicI64,
}

impl GlobalState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_client_connected(&self) {
        let connected = self.clients_connected.fetch_add(1, Ordering::Relaxed) + 1;
        self.clients_total.fetch_add(1, Ordering::Relaxed);
        self.clients_maximum.fetch_max(connected, Ordering::Relaxed);
    }

    pub fn on_client_disconnected(&self) {
        self.clients_connected.fetch_sub(1, Ordering::Relaxed);
        self.clients_disconnected.fetch_add(1, Ordering::Relaxed);
    }
}

/// Seconds since the Unix epoch, used for both `$SYS/broker/timestamp` and
/// QoS 2 pending-entry TTLs.
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
