// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

pub mod conf;

use std::sync::Arc;

use async_trait::async_trait;
use node_data::encoding;
use node_data::message::Message;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::{LongLivedService, SessionState};

/// Emits a heartbeat to every known peer each period and reaps the peers
/// whose own heartbeats have gone stale. This service is the sole evictor;
/// it walks a snapshot so removals never invalidate the iteration.
pub struct HeartbeatSrv {
    socket: Arc<UdpSocket>,
}

impl HeartbeatSrv {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl LongLivedService for HeartbeatSrv {
    async fn execute(
        &mut self,
        state: Arc<SessionState>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<usize> {
        let params = state.conf().heartbeat;
        // The payload never changes for the lifetime of the session.
        let beat = encoding::encode_datagram(&Message::heartbeat(
            state.ledger_id(),
        ))?;

        let mut tick = tokio::time::interval(params.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(0),
                _ = tick.tick() => {}
            }

            for (peer, last_beat) in state.peers().snapshot() {
                if last_beat.elapsed() > params.ttl {
                    info!("removing dead peer {peer}");
                    state.peers().remove(&peer);
                } else {
                    trace!("heartbeat to {peer}");
                    if let Err(e) = self.socket.send_to(&beat, peer).await {
                        debug!("heartbeat to {peer} failed: {e}");
                    }
                }
            }
        }
    }

    /// Returns service name.
    fn name(&self) -> &'static str {
        "heartbeat"
    }
}
