// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

mod block;
pub use block::{Block, BlockId, BlockType, UnsignedBlock};

mod chain;
pub use chain::Ledger;

use crate::keys::{KeyError, KeyId};

/// Why a block (or cursor) was rejected. The ledger is left untouched on
/// every error path.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("block hash does not match its contents")]
    HashMismatch,
    #[error("unknown predecessor {0:?}")]
    UnknownPredecessor(BlockId),
    #[error("signatory {0} is not authoritative")]
    UnknownSignatory(KeyId),
    #[error("signatory {0} has been revoked")]
    RevokedSignatory(KeyId),
    #[error("signature verification failed")]
    BadSignature,
    #[error("unknown cursor {0:?}")]
    UnknownCursor(BlockId),
    #[error("ledger already has a root")]
    UnexpectedRoot,
    #[error("the root key cannot be revoked")]
    RootRevocation,
    #[error("invalid root block: {0}")]
    InvalidRoot(&'static str),
    #[error(transparent)]
    Key(#[from] KeyError),
}
