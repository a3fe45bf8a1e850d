// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! Transient client side of the protocol: LAN discovery broadcasts and the
//! join handshake against a seed node.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use node_data::encoding::{self, CodecError, MAX_DATAGRAM};
use node_data::keys::{KeyId, PublicKey};
use node_data::ledger::{Ledger, LedgerError};
use node_data::message::{Envelope, Message};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::conf::Config;
use crate::{network, NodeError};

/// Ledgers found on the LAN: identity → every endpoint that answered
/// for it. Duplicate answers merge into the set.
pub type Discovered = HashMap<KeyId, HashSet<SocketAddr>>;

/// Broadcasts a DISCOVER query and collects SUCCESS replies until the
/// configured window closes. Malformed replies are logged and skipped.
pub async fn discover(
    target: Option<IpAddr>,
    conf: &Config,
) -> Result<Discovered, NodeError> {
    let socket = broadcast_socket()?;
    let target = SocketAddr::new(
        target.unwrap_or(IpAddr::V4(Ipv4Addr::BROADCAST)),
        conf.bind_port,
    );

    info!(
        "searching for ledgers at {} for {:?}",
        target, conf.discovery_timeout
    );
    let query = encoding::encode_datagram(&Message::discover())?;
    socket
        .send_to(&query, target)
        .await
        .map_err(NodeError::Network)?;

    let mut found = Discovered::new();
    let deadline = Instant::now() + conf.discovery_timeout;
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let (len, sender) = match tokio::time::timeout(
            remaining,
            socket.recv_from(&mut buf),
        )
        .await
        {
            Err(_) => break,
            Ok(Err(e)) => {
                debug!("discovery recv failed: {e}");
                continue;
            }
            Ok(Ok(received)) => received,
        };

        match encoding::decode_datagram(&buf[..len]) {
            Ok(Envelope::Message(reply)) if reply.is_success() => {
                match reply.payload_str() {
                    Some(id) => {
                        debug!(
                            "discovered ledger {} at {sender}",
                            node_data::to_str(id)
                        );
                        found
                            .entry(KeyId::from(id))
                            .or_default()
                            .insert(sender);
                    }
                    None => debug!("reply without a ledger id from {sender}"),
                }
            }
            Ok(_) => debug!("unexpected discovery reply from {sender}"),
            Err(e) => debug!("malformed discovery reply from {sender}: {e}"),
        }
    }

    info!("discovery finished, {} ledger(s) found", found.len());
    Ok(found)
}

/// Runs the join handshake against `seed`:
///
/// 1. JOIN with the expected ledger id; anything but SUCCESS refuses us.
/// 2. The returned public key must hash to the id we asked for.
/// 3. A full LEDGER sync replayed into a fresh chain; any invalid block
///    aborts the join.
/// 4. A PEER exchange seeds the peer table (best-effort).
pub async fn join(
    seed: SocketAddr,
    expected: &KeyId,
    conf: &Config,
) -> Result<(Ledger, Vec<SocketAddr>), NodeError> {
    info!("requesting to join ledger {expected:?} via {seed}");

    let reply = request(seed, Message::join(expected), conf).await?;
    if !reply.is_success() {
        return Err(NodeError::JoinRefused);
    }
    let pem = reply.payload_str().ok_or(NodeError::JoinRefused)?;
    let root_key = PublicKey::from_pem(pem)?;
    if root_key.key_id() != expected {
        return Err(NodeError::IdentityMismatch {
            expected: expected.clone(),
            actual: root_key.key_id().clone(),
        });
    }

    let reply = request(seed, Message::ledger_request(None), conf).await?;
    if !reply.is_success() {
        return Err(NodeError::JoinRefused);
    }
    let mut blocks = reply
        .payload_blocks()
        .map_err(|e| NodeError::Codec(CodecError::Decode(e)))?
        .into_iter();

    let root = blocks.next().ok_or(NodeError::LedgerInvalid(
        LedgerError::InvalidRoot("empty ledger sync"),
    ))?;
    let mut ledger = Ledger::new(root).map_err(NodeError::LedgerInvalid)?;
    for block in blocks {
        ledger.append(block).map_err(NodeError::LedgerInvalid)?;
    }
    if ledger.id() != expected {
        return Err(NodeError::IdentityMismatch {
            expected: expected.clone(),
            actual: ledger.id().clone(),
        });
    }
    info!("synced {} block(s) from {seed}", ledger.len());

    // Peer sync is advisory: the table self-heals through heartbeats, so a
    // refusal here does not abort the join.
    let mut peers = Vec::new();
    match request(seed, Message::peer_request(), conf).await {
        Ok(reply) if reply.is_success() => match reply.payload_peers() {
            Ok(list) => peers = list,
            Err(e) => warn!("ignoring malformed peer list from {seed}: {e}"),
        },
        Ok(_) => warn!("peer request refused by {seed}"),
        Err(e) => warn!("peer sync with {seed} failed: {e}"),
    }

    Ok((ledger, peers))
}

/// One request/response exchange over a fresh TCP connection.
pub async fn request(
    target: SocketAddr,
    msg: Message,
    conf: &Config,
) -> Result<Message, NodeError> {
    let timeout = conf.broker.request_timeout;

    let mut stream =
        tokio::time::timeout(timeout, TcpStream::connect(target))
            .await
            .map_err(|_| NodeError::Timeout)?
            .map_err(NodeError::Network)?;

    network::write_frame(&mut stream, &msg.into(), conf.frame_width).await?;

    let reply =
        tokio::time::timeout(timeout, network::read_frame(&mut stream, conf.frame_width))
            .await
            .map_err(|_| NodeError::Timeout)??;

    reply
        .into_message()
        .ok_or(NodeError::Codec(CodecError::InvalidFrame))
}

/// A UDP socket that may talk to the broadcast address. Discovery owns it
/// for the duration of one query.
fn broadcast_socket() -> Result<UdpSocket, NodeError> {
    use socket2::{Domain, Protocol, Socket, Type};

    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, 0).into();
    let bind = || -> io::Result<UdpSocket> {
        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        UdpSocket::from_std(socket.into())
    };

    bind().map_err(|e| NodeError::BindFailure(e, addr))
}
