// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! End-to-end scenarios over real sockets on the loopback interface.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;

use node::conf::Config;
use node::{client, network, Node, NodeError};
use node_data::encoding;
use node_data::keys::{self, KeyId, KeyPair};
use node_data::ledger::Block;
use node_data::message::{Envelope, Message, Topics};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::{sleep, timeout, Instant};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Loopback config with an OS-assigned port and a heartbeat cycle quick
/// enough to observe expiry in a test.
fn fast_config() -> Config {
    let mut conf = Config::default();
    conf.bind_ip = LOCALHOST;
    conf.bind_port = 0;
    conf.discovery_timeout = Duration::from_millis(700);
    conf.heartbeat.period = Duration::from_millis(100);
    conf.heartbeat.ttl = Duration::from_millis(400);
    conf
}

fn root_pair() -> &'static KeyPair {
    static PAIR: OnceLock<KeyPair> = OnceLock::new();
    PAIR.get_or_init(|| KeyPair::generate().expect("keygen"))
}

fn other_pair() -> &'static KeyPair {
    static PAIR: OnceLock<KeyPair> = OnceLock::new();
    PAIR.get_or_init(|| KeyPair::generate().expect("keygen"))
}

async fn founded_node() -> (Node, KeyId, SocketAddr) {
    let node = Node::new(fast_config());
    let id = node.found(root_pair().clone()).await.expect("found");
    let endpoint = node.status().await.expect("status").endpoint;
    (node, id, endpoint)
}

#[tokio::test]
async fn discovery_finds_a_founded_ledger() {
    let (node, id, endpoint) = founded_node().await;

    let mut conf = fast_config();
    conf.bind_port = endpoint.port();
    let found = client::discover(Some(LOCALHOST), &conf)
        .await
        .expect("discover");

    let endpoints = found.get(&id).expect("our ledger is advertised");
    assert!(endpoints.contains(&endpoint));

    node.leave().await.expect("leave");
}

#[tokio::test]
async fn join_syncs_ledger_and_peers() {
    let (a, id, a_endpoint) = founded_node().await;

    let b = Node::new(fast_config());
    let joined = b.join(&id, a_endpoint).await.expect("join");
    assert_eq!(joined, id);

    let status = b.status().await.expect("status");
    assert_eq!(status.ledger_id, id);
    assert_eq!(status.blocks, 1);
    assert!(!status.holds_root_key);
    assert!(status.peers.iter().any(|(addr, _)| *addr == a_endpoint));
    assert!(a.status().await.expect("status").holds_root_key);

    let chain = b.ledger().await.expect("ledger");
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].pubkey_hash(), &id);

    // Heartbeats make the relationship mutual within a few periods.
    let deadline = Instant::now() + Duration::from_secs(3);
    while a.status().await.expect("status").peers.is_empty() {
        assert!(Instant::now() < deadline, "a never heard b's heartbeat");
        sleep(Duration::from_millis(50)).await;
    }

    b.leave().await.expect("leave");
    a.leave().await.expect("leave");
}

#[tokio::test]
async fn join_with_wrong_identity_is_refused() {
    let (a, _, endpoint) = founded_node().await;

    let wrong = KeyId::from(keys::hash_hex(b"some other ledger").as_str());
    let b = Node::new(fast_config());

    match b.join(&wrong, endpoint).await {
        Err(NodeError::JoinRefused) => {}
        other => panic!("expected JoinRefused, got {other:?}"),
    }
    assert!(matches!(b.status().await, Err(NodeError::NotMember)));

    a.leave().await.expect("leave");
}

#[tokio::test]
async fn silent_peers_are_reaped() {
    let (a, id, endpoint) = founded_node().await;
    let conf = fast_config();

    let socket =
        UdpSocket::bind((LOCALHOST, 0)).await.expect("bind probe socket");
    let our_addr = socket.local_addr().expect("local addr");

    // A heartbeat for a foreign ledger must not register us.
    let foreign = encoding::encode_datagram(&Message::heartbeat(
        &KeyId::from("deadbeef"),
    ))
    .expect("encode");
    socket.send_to(&foreign, endpoint).await.expect("send");
    sleep(Duration::from_millis(200)).await;
    assert!(a.status().await.expect("status").peers.is_empty());

    // Beat with the right id until the table shows us.
    let beat =
        encoding::encode_datagram(&Message::heartbeat(&id)).expect("encode");
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        socket.send_to(&beat, endpoint).await.expect("send");
        let peers = a.status().await.expect("status").peers;
        if peers.iter().any(|(addr, _)| *addr == our_addr) {
            break;
        }
        assert!(Instant::now() < deadline, "heartbeat never registered");
        sleep(Duration::from_millis(50)).await;
    }

    // Go silent; the emitter reaps us within ttl + a few periods.
    sleep(conf.heartbeat.ttl + conf.heartbeat.period * 4).await;
    assert!(a.status().await.expect("status").peers.is_empty());

    a.leave().await.expect("leave");
}

#[tokio::test]
async fn tampered_ledger_aborts_the_join() {
    let seed_pair = root_pair();
    let expected = seed_pair.key_id().clone();
    let root_block = Block::root(seed_pair).expect("root block");

    // Swap the subject key while keeping the original signature.
    let tampered = serde_json::to_string(&root_block)
        .expect("encode")
        .replace(
            &seed_pair.public().to_base58(),
            &other_pair().public().to_base58(),
        );
    let tampered: Block = serde_json::from_str(&tampered).expect("decode");

    let listener =
        TcpListener::bind((LOCALHOST, 0)).await.expect("bind seed");
    let seed_addr = listener.local_addr().expect("local addr");
    let pem = seed_pair.public().to_pem().expect("pem");

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let Ok(Envelope::Message(req)) =
                network::read_frame(&mut stream, 10).await
            else {
                continue;
            };
            let reply = match req.topic() {
                Topics::Join => Message::success(json!(pem.clone())),
                Topics::Ledger => Message::success(
                    serde_json::to_value(vec![tampered.clone()])
                        .expect("encode"),
                ),
                _ => Message::failure(),
            };
            let _ = network::write_frame(&mut stream, &reply.into(), 10).await;
            let _ = stream.shutdown().await;
        }
    });

    let b = Node::new(fast_config());
    match b.join(&expected, seed_addr).await {
        Err(NodeError::LedgerInvalid(_)) => {}
        other => panic!("expected LedgerInvalid, got {other:?}"),
    }
    assert!(matches!(b.status().await, Err(NodeError::NotMember)));
}

#[tokio::test]
async fn frame_underflow_closes_without_a_response() {
    let (a, _, endpoint) = founded_node().await;

    let mut stream = TcpStream::connect(endpoint).await.expect("connect");
    let mut bytes = b"0000000020".to_vec();
    bytes.extend_from_slice(&[b'{'; 18]);
    stream.write_all(&bytes).await.expect("write");
    stream.shutdown().await.expect("half-close");

    // The server must drop the connection without producing a response.
    let mut buf = Vec::new();
    match timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
        .await
        .expect("server should close the connection")
    {
        Ok(0) => {}
        Ok(n) => panic!("unexpected {n}-byte response"),
        Err(_) => {} // a reset counts as closed too
    }

    // And stay healthy for the next, well-formed request.
    let reply = client::request(endpoint, Message::peer_request(), a.conf())
        .await
        .expect("request");
    assert!(reply.is_success());

    a.leave().await.expect("leave");
}

#[tokio::test]
async fn ledger_requests_support_cursors() {
    let (a, _, endpoint) = founded_node().await;
    let root_id = a.ledger().await.expect("ledger")[0].id();

    let reply = client::request(
        endpoint,
        Message::ledger_request(Some(&root_id)),
        a.conf(),
    )
    .await
    .expect("request");
    assert!(reply.is_success());
    assert!(reply.payload_blocks().expect("blocks").is_empty());

    let reply = client::request(
        endpoint,
        Message::ledger_request(Some("feedbeef")),
        a.conf(),
    )
    .await
    .expect("request");
    assert_eq!(reply.topic(), Topics::Failure);

    // An unsupported request type is refused, not fatal.
    let reply =
        client::request(endpoint, Message::success(json!("x")), a.conf())
            .await
            .expect("request");
    assert_eq!(reply.topic(), Topics::Failure);

    a.leave().await.expect("leave");
}

#[tokio::test]
async fn leave_is_idempotent_and_restartable() {
    let node = Node::new(fast_config());
    assert!(matches!(node.status().await, Err(NodeError::NotMember)));
    node.leave().await.expect("leave from idle");

    let id = node.found(root_pair().clone()).await.expect("found");
    match node.found(other_pair().clone()).await {
        Err(NodeError::AlreadyMember(member_of)) => {
            assert_eq!(member_of, id)
        }
        other => panic!("expected AlreadyMember, got {other:?}"),
    }

    node.leave().await.expect("leave");
    assert!(matches!(node.status().await, Err(NodeError::NotMember)));
    node.leave().await.expect("repeated leave");

    // The node can go Active again after leaving.
    let id2 = node.found(root_pair().clone()).await.expect("refound");
    assert_eq!(id, id2);
    node.leave().await.expect("leave");
}
