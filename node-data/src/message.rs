// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::net::SocketAddr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::keys::KeyId;
use crate::ledger::Block;

macro_rules! map_topic {
    ($v:expr, $enum_v:expr) => {
        if $v == $enum_v as u8 {
            return $enum_v;
        }
    };
}

/// Wire message type codes. The concrete integers are a protocol detail;
/// they only have to be distinct and agreed on by every peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topics {
    // UDP channel
    Discover = 10,
    Heartbeat = 11,

    // TCP request/response channel
    Join = 20,
    Ledger = 21,
    Peer = 22,

    // Responses
    Success = 100,
    Failure = 101,

    #[default]
    Unknown = 255,
}

impl From<u8> for Topics {
    fn from(v: u8) -> Self {
        map_topic!(v, Topics::Discover);
        map_topic!(v, Topics::Heartbeat);
        map_topic!(v, Topics::Join);
        map_topic!(v, Topics::Ledger);
        map_topic!(v, Topics::Peer);
        map_topic!(v, Topics::Success);
        map_topic!(v, Topics::Failure);

        Topics::Unknown
    }
}

impl From<Topics> for u8 {
    fn from(t: Topics) -> Self {
        t as u8
    }
}

impl Serialize for Topics {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Topics {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Topics::from(u8::deserialize(d)?))
    }
}

/// A protocol message: a type code plus an arbitrary JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    topic: Topics,
    #[serde(default)]
    pub message: Option<Value>,
}

impl Message {
    pub fn new(topic: Topics, message: Option<Value>) -> Self {
        Self { topic, message }
    }

    pub fn discover() -> Self {
        Self::new(Topics::Discover, None)
    }

    pub fn heartbeat(ledger_id: &KeyId) -> Self {
        Self::new(Topics::Heartbeat, Some(json!(ledger_id)))
    }

    pub fn join(expected_id: &KeyId) -> Self {
        Self::new(Topics::Join, Some(json!(expected_id)))
    }

    pub fn ledger_request(cursor: Option<&str>) -> Self {
        Self::new(Topics::Ledger, cursor.map(|c| json!(c)))
    }

    pub fn peer_request() -> Self {
        Self::new(Topics::Peer, None)
    }

    pub fn success(payload: Value) -> Self {
        Self::new(Topics::Success, Some(payload))
    }

    pub fn failure() -> Self {
        Self::new(Topics::Failure, None)
    }

    pub fn topic(&self) -> Topics {
        self.topic
    }

    pub fn is_success(&self) -> bool {
        self.topic == Topics::Success
    }

    /// The payload as a string, if it is one.
    pub fn payload_str(&self) -> Option<&str> {
        self.message.as_ref().and_then(Value::as_str)
    }

    /// The payload as a list of blocks (a LEDGER response).
    pub fn payload_blocks(&self) -> Result<Vec<Block>, serde_json::Error> {
        serde_json::from_value(self.message.clone().unwrap_or(Value::Null))
    }

    /// The payload as a list of peer endpoints (a PEER response).
    pub fn payload_peers(
        &self,
    ) -> Result<Vec<SocketAddr>, serde_json::Error> {
        let pairs: Vec<(std::net::IpAddr, u16)> =
            serde_json::from_value(self.message.clone().unwrap_or(Value::Null))?;
        Ok(pairs
            .into_iter()
            .map(|(ip, port)| SocketAddr::new(ip, port))
            .collect())
    }
}

/// Builds the `[[ip, port], ...]` payload of a PEER response.
pub fn peers_payload<'a>(
    peers: impl IntoIterator<Item = &'a SocketAddr>,
) -> Value {
    let pairs: Vec<(String, u16)> = peers
        .into_iter()
        .map(|addr| (addr.ip().to_string(), addr.port()))
        .collect();
    json!(pairs)
}

/// Everything that travels on the wire: either a bare protocol message or a
/// block inside a LEDGER response. Decoding tries Block first since a block
/// carries the more distinctive set of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Block(Block),
    Message(Message),
}

impl From<Message> for Envelope {
    fn from(m: Message) -> Self {
        Envelope::Message(m)
    }
}

impl From<Block> for Envelope {
    fn from(b: Block) -> Self {
        Envelope::Block(b)
    }
}

impl Envelope {
    pub fn into_message(self) -> Option<Message> {
        match self {
            Envelope::Message(m) => Some(m),
            Envelope::Block(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn topic_codes_roundtrip_and_stay_distinct() {
        let topics = [
            Topics::Discover,
            Topics::Heartbeat,
            Topics::Join,
            Topics::Ledger,
            Topics::Peer,
            Topics::Success,
            Topics::Failure,
        ];

        for (i, a) in topics.iter().enumerate() {
            assert_eq!(*a, Topics::from(u8::from(*a)));
            for b in &topics[i + 1..] {
                assert_ne!(u8::from(*a), u8::from(*b));
            }
        }

        assert_eq!(Topics::from(42u8), Topics::Unknown);
    }

    #[test]
    fn message_wire_shape() {
        let id = KeyId::from("f00d");
        let json =
            serde_json::to_value(Message::heartbeat(&id)).expect("encode");

        assert_eq!(json["type"], u8::from(Topics::Heartbeat));
        assert_eq!(json["message"], "f00d");

        let json = serde_json::to_value(Message::discover()).expect("encode");
        assert_eq!(json["message"], Value::Null);
    }

    #[test]
    fn message_roundtrip() {
        for msg in [
            Message::discover(),
            Message::heartbeat(&KeyId::from("aa")),
            Message::join(&KeyId::from("bb")),
            Message::ledger_request(None),
            Message::ledger_request(Some("cc")),
            Message::peer_request(),
            Message::success(json!(["x"])),
            Message::failure(),
        ] {
            let bytes = serde_json::to_vec(&msg).expect("encode");
            let back: Message =
                serde_json::from_slice(&bytes).expect("decode");
            assert_eq!(msg, back);
        }
    }

    #[test]
    fn peers_payload_roundtrip() {
        let peers: Vec<SocketAddr> =
            vec!["10.0.0.1:2525".parse().expect("addr"), "[::1]:9000".parse().expect("addr")];

        let msg = Message::success(peers_payload(&peers));
        let back = msg.payload_peers().expect("decode");
        assert_eq!(back, peers);
    }

    #[test]
    fn envelope_dispatches_by_shape() {
        let pair = KeyPair::generate().expect("keygen");
        let block = Block::root(&pair).expect("root");

        let raw = serde_json::to_vec(&Envelope::from(block.clone()))
            .expect("encode");
        match serde_json::from_slice::<Envelope>(&raw).expect("decode") {
            Envelope::Block(b) => assert_eq!(b, block),
            Envelope::Message(_) => panic!("block decoded as message"),
        }

        let raw = serde_json::to_vec(&Envelope::from(Message::discover()))
            .expect("encode");
        match serde_json::from_slice::<Envelope>(&raw).expect("decode") {
            Envelope::Message(m) => assert_eq!(m.topic(), Topics::Discover),
            Envelope::Block(_) => panic!("message decoded as block"),
        }
    }
}
