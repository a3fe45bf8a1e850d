// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Instant;

/// Live peer set: endpoint of every node believed to hold our ledger,
/// stamped with the instant of its last heartbeat.
///
/// Writers are the UDP listener (upsert on heartbeat) and the heartbeat
/// emitter (remove on expiry); readers take a snapshot so a walk never
/// races an eviction.
#[derive(Default)]
pub struct PeerTable {
    inner: Mutex<HashMap<SocketAddr, Instant>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a heartbeat from `endpoint`, creating the entry on first
    /// contact.
    pub fn upsert(&self, endpoint: SocketAddr) {
        self.lock().insert(endpoint, Instant::now());
    }

    /// Adds every endpoint with a fresh timestamp; the heartbeat cycle
    /// confirms or reaps them from there.
    pub fn merge(&self, endpoints: impl IntoIterator<Item = SocketAddr>) {
        let now = Instant::now();
        let mut guard = self.lock();
        for endpoint in endpoints {
            guard.insert(endpoint, now);
        }
    }

    pub fn remove(&self, endpoint: &SocketAddr) {
        self.lock().remove(endpoint);
    }

    /// Point-in-time copy for iteration.
    pub fn snapshot(&self) -> Vec<(SocketAddr, Instant)> {
        self.lock().iter().map(|(a, t)| (*a, *t)).collect()
    }

    /// The endpoints alone, for PEER responses.
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, Instant>> {
        self.inner.lock().expect("peer table lock poisoned")
    }
}
