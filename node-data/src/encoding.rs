// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! Wire encodings.
//!
//! TCP payloads are framed as a fixed-width, zero-padded ASCII decimal
//! length immediately followed by that many bytes of UTF-8 JSON. UDP
//! payloads are bare JSON documents capped at [`MAX_DATAGRAM`] bytes.

use std::io::{self, Read, Write};

use crate::message::{Envelope, Message};

/// Default width of the ASCII length field.
pub const FRAME_WIDTH: usize = 10;

/// Upper bound for a UDP payload.
pub const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Length field malformed, oversized payload, or short read.
    #[error("invalid frame")]
    InvalidFrame,
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Parses the ASCII decimal length header. Anything but digits is a
/// protocol violation.
pub fn parse_frame_header(header: &[u8]) -> Result<usize, CodecError> {
    if header.is_empty() || !header.iter().all(u8::is_ascii_digit) {
        return Err(CodecError::InvalidFrame);
    }
    std::str::from_utf8(header)
        .map_err(|_| CodecError::InvalidFrame)?
        .parse()
        .map_err(|_| CodecError::InvalidFrame)
}

/// Encodes one framed message: header of `width` digits, then the JSON.
pub fn encode_frame(
    env: &Envelope,
    width: usize,
) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(env)?;
    if body.len() >= 10usize.pow(width as u32) {
        return Err(CodecError::InvalidFrame);
    }

    let mut buf = format!("{:0width$}", body.len()).into_bytes();
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Reads exactly one framed message.
///
/// A connection closed mid-body surfaces as [`CodecError::InvalidFrame`];
/// one closed before the header surfaces as the underlying I/O error so
/// callers can tell an idle close from a truncated frame.
pub fn read_frame<R: Read>(
    r: &mut R,
    width: usize,
) -> Result<Envelope, CodecError> {
    let mut header = vec![0u8; width];
    r.read_exact(&mut header)?;
    let len = parse_frame_header(&header)?;

    let mut body = vec![0u8; len];
    r.read_exact(&mut body).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::InvalidFrame
        } else {
            CodecError::Io(e)
        }
    })?;

    decode(&body)
}

pub fn write_frame<W: Write>(
    w: &mut W,
    env: &Envelope,
    width: usize,
) -> Result<(), CodecError> {
    w.write_all(&encode_frame(env, width)?)?;
    Ok(())
}

/// Encodes a bare-JSON UDP payload, enforcing the datagram cap.
pub fn encode_datagram(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_DATAGRAM {
        return Err(CodecError::InvalidFrame);
    }
    Ok(body)
}

/// Decodes a bare-JSON UDP payload.
pub fn decode_datagram(buf: &[u8]) -> Result<Envelope, CodecError> {
    if buf.len() > MAX_DATAGRAM {
        return Err(CodecError::InvalidFrame);
    }
    decode(buf)
}

/// Decodes a raw JSON document into whatever wire shape it matches. TCP
/// bodies are already bounded by their frame header, so no cap applies.
pub fn decode(buf: &[u8]) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_slice(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Topics;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn frame_roundtrip() {
        let env = Envelope::from(Message::success(json!(["a", "b"])));

        let bytes = encode_frame(&env, FRAME_WIDTH).expect("encode");
        assert_eq!(&bytes[..FRAME_WIDTH], format!("{:010}", bytes.len() - FRAME_WIDTH).as_bytes());

        let back =
            read_frame(&mut Cursor::new(bytes), FRAME_WIDTH).expect("decode");
        assert_eq!(back, env);
    }

    #[test]
    fn concatenated_frames_parse_in_order() {
        let msgs = [
            Message::discover(),
            Message::join(&"cafe".into()),
            Message::failure(),
        ];

        let mut stream = Vec::new();
        for msg in &msgs {
            write_frame(
                &mut stream,
                &Envelope::from(msg.clone()),
                FRAME_WIDTH,
            )
            .expect("encode");
        }

        let mut cursor = Cursor::new(stream);
        for msg in &msgs {
            let env = read_frame(&mut cursor, FRAME_WIDTH).expect("decode");
            assert_eq!(env, Envelope::from(msg.clone()));
        }

        // Stream exhausted: the next read reports a plain I/O error.
        assert!(matches!(
            read_frame(&mut cursor, FRAME_WIDTH),
            Err(CodecError::Io(_))
        ));
    }

    #[test]
    fn malformed_header_is_an_invalid_frame() {
        for header in ["00000000x5", "-000000005", "          "] {
            let mut buf = header.as_bytes().to_vec();
            buf.extend_from_slice(b"{}");
            assert!(matches!(
                read_frame(&mut Cursor::new(buf), FRAME_WIDTH),
                Err(CodecError::InvalidFrame)
            ));
        }
    }

    #[test]
    fn short_body_is_an_invalid_frame() {
        // Declares 20 bytes, delivers 18, then EOF.
        let mut buf = b"0000000020".to_vec();
        buf.extend_from_slice(&[b'{'; 18]);

        assert!(matches!(
            read_frame(&mut Cursor::new(buf), FRAME_WIDTH),
            Err(CodecError::InvalidFrame)
        ));
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let mut buf = b"0000000003".to_vec();
        buf.extend_from_slice(b"}{}");

        assert!(matches!(
            read_frame(&mut Cursor::new(buf), FRAME_WIDTH),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn datagrams_are_capped() {
        let msg = Message::success(json!("x".repeat(MAX_DATAGRAM)));
        assert!(matches!(
            encode_datagram(&msg),
            Err(CodecError::InvalidFrame)
        ));

        let small = encode_datagram(&Message::discover()).expect("encode");
        let env = decode_datagram(&small).expect("decode");
        assert_eq!(
            env.into_message().expect("message").topic(),
            Topics::Discover
        );
    }
}
