// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

pub mod conf;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use node_data::message::{self, Envelope, Message, Topics};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::{network, LongLivedService, SessionState};

/// Implements the request-for-data side of the protocol.
///
/// Serves one framed request per connection: JOIN hands out the root public
/// key, LEDGER streams the chain (optionally after a cursor), PEER lists
/// the live peer set. Each accepted connection runs in its own task; a
/// semaphore caps how many run at once.
pub struct BrokerSrv {
    listener: Option<TcpListener>,
}

impl BrokerSrv {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener: Some(listener),
        }
    }
}

#[async_trait]
impl LongLivedService for BrokerSrv {
    async fn execute(
        &mut self,
        state: Arc<SessionState>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<usize> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("broker already started"))?;

        let limit = Arc::new(Semaphore::new(
            state.conf().broker.max_ongoing_requests,
        ));
        info!(
            "serving ledger requests on {}",
            listener.local_addr().map_err(anyhow::Error::from)?
        );

        loop {
            // Wait until we may serve another request before accepting it.
            let permit = tokio::select! {
                _ = shutdown.changed() => return Ok(0),
                permit = limit.clone().acquire_owned() => permit?,
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown.changed() => return Ok(0),
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                },
            };

            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer, &state).await {
                    debug!("closing connection from {peer}: {e}");
                }
                drop(permit);
            });
        }
    }

    /// Returns service name.
    fn name(&self) -> &'static str {
        "broker"
    }
}

/// Runs the per-connection state machine: read one framed request, answer
/// it, half-close, drain until the peer hangs up.
///
/// Frame-level failures (bad header, short read, undecodable JSON) abort
/// the connection without a response. A well-formed message that asks the
/// wrong thing gets a FAILURE.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: &SessionState,
) -> anyhow::Result<()> {
    let width = state.conf().frame_width;
    let timeout = state.conf().broker.request_timeout;

    let request = tokio::time::timeout(
        timeout,
        network::read_frame(&mut stream, width),
    )
    .await
    .map_err(|_| anyhow!("request timed out"))??;

    let response = match request {
        Envelope::Message(msg) => {
            debug!("request {:?} from {peer}", msg.topic());
            dispatch(&msg, state).await
        }
        Envelope::Block(_) => Message::failure(),
    };

    network::write_frame(&mut stream, &response.into(), width).await?;

    // Half-close the write side, then read-to-close so the peer decides
    // when the exchange is over.
    stream.shutdown().await?;
    let mut sink = [0u8; 512];
    let drain = async {
        while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
    };
    let _ = tokio::time::timeout(timeout, drain).await;

    Ok(())
}

async fn dispatch(msg: &Message, state: &SessionState) -> Message {
    match msg.topic() {
        Topics::Join => {
            if msg.payload_str() != Some(state.ledger_id().as_str()) {
                debug!("join request for a ledger we do not hold");
                return Message::failure();
            }
            match state.with_ledger(|l| l.root_key().to_pem()).await {
                Ok(pem) => Message::success(json!(pem)),
                Err(e) => {
                    error!("could not encode root key: {e}");
                    Message::failure()
                }
            }
        }
        Topics::Ledger => {
            let cursor = msg.payload_str().map(str::to_owned);
            let blocks = state
                .with_ledger(|l| l.to_list(cursor.as_deref()))
                .await;
            match blocks {
                Ok(blocks) => match serde_json::to_value(&blocks) {
                    Ok(payload) => Message::success(payload),
                    Err(e) => {
                        error!("could not encode ledger: {e}");
                        Message::failure()
                    }
                },
                Err(e) => {
                    debug!("ledger request rejected: {e}");
                    Message::failure()
                }
            }
        }
        Topics::Peer => {
            Message::success(message::peers_payload(&state.peers().endpoints()))
        }
        other => {
            debug!("unsupported request type {other:?}");
            Message::failure()
        }
    }
}
