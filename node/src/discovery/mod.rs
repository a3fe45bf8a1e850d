// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::sync::Arc;

use async_trait::async_trait;
use node_data::encoding::{self, MAX_DATAGRAM};
use node_data::message::{Envelope, Message, Topics};
use serde_json::json;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::{LongLivedService, SessionState};

/// Answers DISCOVER broadcasts with our ledger id and feeds incoming
/// heartbeats into the peer table. This channel is best-effort: anything
/// malformed is dropped without a reply.
pub struct DiscoverySrv {
    socket: Arc<UdpSocket>,
}

impl DiscoverySrv {
    /// The socket is shared with the heartbeat emitter so every datagram
    /// we send originates from the port peers have on record for us.
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl LongLivedService for DiscoverySrv {
    async fn execute(
        &mut self,
        state: Arc<SessionState>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<usize> {
        info!(
            "listening for discovery and heartbeats on {}",
            self.socket.local_addr().map_err(anyhow::Error::from)?
        );

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, sender) = tokio::select! {
                _ = shutdown.changed() => return Ok(0),
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("udp recv failed: {e}");
                        continue;
                    }
                },
            };

            let msg = match encoding::decode_datagram(&buf[..len]) {
                Ok(Envelope::Message(msg)) => msg,
                Ok(Envelope::Block(_)) => {
                    trace!("stray block datagram from {sender}, ignored");
                    continue;
                }
                Err(e) => {
                    trace!("undecodable datagram from {sender}: {e}");
                    continue;
                }
            };

            match msg.topic() {
                Topics::Discover => {
                    debug!("discovery inquiry from {sender}, responding");
                    let reply = Message::success(json!(state.ledger_id()));
                    match encoding::encode_datagram(&reply) {
                        Ok(bytes) => {
                            if let Err(e) =
                                self.socket.send_to(&bytes, sender).await
                            {
                                debug!("discovery reply to {sender} failed: {e}");
                            }
                        }
                        Err(e) => warn!("could not encode discovery reply: {e}"),
                    }
                }
                Topics::Heartbeat => {
                    // Only heartbeats for our own ledger count as liveness.
                    if msg.payload_str() == Some(state.ledger_id().as_str()) {
                        trace!("heartbeat from {sender}");
                        state.peers().upsert(sender);
                    } else {
                        trace!("heartbeat for a foreign ledger from {sender}");
                    }
                }
                other => {
                    trace!("unexpected {other:?} datagram from {sender}");
                }
            }
        }
    }

    /// Returns service name.
    fn name(&self) -> &'static str {
        "discovery"
    }
}
