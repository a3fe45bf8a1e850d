// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

//! Async frame I/O over the TCP channel. The format itself lives in
//! `node_data::encoding`; this module only moves it across sockets.

use std::io;

use node_data::encoding::{self, CodecError};
use node_data::message::Envelope;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads exactly one framed message off `r`.
///
/// A stream that ends mid-body reports [`CodecError::InvalidFrame`]; one
/// that ends before the header reports the underlying I/O error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    width: usize,
) -> Result<Envelope, CodecError> {
    let mut header = vec![0u8; width];
    r.read_exact(&mut header).await?;
    let len = encoding::parse_frame_header(&header)?;

    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::InvalidFrame
        } else {
            CodecError::Io(e)
        }
    })?;

    encoding::decode(&body)
}

/// Writes one framed message to `w`.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    env: &Envelope,
    width: usize,
) -> Result<(), CodecError> {
    let buf = encoding::encode_frame(env, width)?;
    w.write_all(&buf).await?;
    Ok(())
}
