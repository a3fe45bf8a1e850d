// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{Block, BlockId, BlockType, LedgerError};
use crate::keys::{KeyId, PublicKey};

/// Ordered, append-only chain of validated blocks sharing one root.
///
/// The ledger id is the root block's `pubkey_hash`. Authority bookkeeping is
/// live: a `trust` append makes its subject key a valid signatory, a
/// `revoke` append retracts it immediately. The root key stays authoritative
/// for the lifetime of the ledger.
pub struct Ledger {
    blocks: Vec<Block>,
    index: HashMap<BlockId, usize>,
    authorities: HashMap<KeyId, PublicKey>,
    revoked: HashSet<KeyId>,
    id: KeyId,
}

impl Ledger {
    /// Builds a ledger from its founding block. The block must be
    /// root-typed, predecessor-less and self-signed.
    pub fn new(root: Block) -> Result<Self, LedgerError> {
        let root = root.normalized()?;

        if root.block_type() != BlockType::Root {
            return Err(LedgerError::InvalidRoot("not a root-typed block"));
        }
        if root.predecessor().is_some() {
            return Err(LedgerError::InvalidRoot(
                "root cannot have a predecessor",
            ));
        }
        if root.signatory_hash() != root.pubkey_hash() {
            return Err(LedgerError::InvalidRoot("root must be self-signed"));
        }

        let root_key = root.subject_key()?;
        root.verify_signature(&root_key)?;

        let id = root.pubkey_hash().clone();
        let mut index = HashMap::new();
        index.insert(root.id(), 0);

        let mut authorities = HashMap::new();
        authorities.insert(id.clone(), root_key);

        Ok(Self {
            blocks: vec![root],
            index,
            authorities,
            revoked: HashSet::new(),
            id,
        })
    }

    /// The ledger identity: KeyId of the root public key.
    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn root(&self) -> &Block {
        &self.blocks[0]
    }

    /// The root public key, decoded once at construction.
    pub fn root_key(&self) -> &PublicKey {
        &self.authorities[&self.id]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        // A ledger always holds at least its root.
        false
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Whether `key` may sign new blocks right now.
    pub fn is_authoritative(&self, key: &KeyId) -> bool {
        self.authorities.contains_key(key)
    }

    /// Whether `key` is the subject of any block in the chain.
    pub fn contains_key(&self, key: &KeyId) -> bool {
        self.blocks.iter().any(|b| b.pubkey_hash() == key)
    }

    /// Validates and appends `block`.
    ///
    /// Appending a block whose id is already present is a no-op success.
    /// Every failure leaves the ledger unchanged.
    pub fn append(&mut self, block: Block) -> Result<(), LedgerError> {
        let block = block.normalized()?;
        let id = block.id();

        if self.index.contains_key(&id) {
            debug!("ignoring duplicate block {}", crate::to_str(&id));
            return Ok(());
        }

        if block.block_type() == BlockType::Root {
            return Err(LedgerError::UnexpectedRoot);
        }

        let predecessor = block
            .predecessor()
            .ok_or_else(|| LedgerError::UnknownPredecessor(BlockId::new()))?;
        if !self.index.contains_key(predecessor) {
            return Err(LedgerError::UnknownPredecessor(predecessor.into()));
        }

        let signatory = block.signatory_hash();
        if self.revoked.contains(signatory) {
            return Err(LedgerError::RevokedSignatory(signatory.clone()));
        }
        let signatory_key = self
            .authorities
            .get(signatory)
            .ok_or_else(|| LedgerError::UnknownSignatory(signatory.clone()))?;

        block.verify_signature(signatory_key)?;

        let subject = block.pubkey_hash().clone();
        match block.block_type() {
            BlockType::Root => unreachable!("rejected above"),
            BlockType::Trust => {
                let key = block.subject_key()?;
                // A fresh grant supersedes an earlier revocation.
                self.revoked.remove(&subject);
                self.authorities.insert(subject.clone(), key);
                debug!("key {:?} granted signing authority", subject);
            }
            BlockType::Revoke => {
                if subject == self.id {
                    return Err(LedgerError::RootRevocation);
                }
                self.authorities.remove(&subject);
                self.revoked.insert(subject.clone());
                debug!("key {:?} revoked", subject);
            }
        }

        self.index.insert(id, self.blocks.len());
        self.blocks.push(block);
        Ok(())
    }

    /// All blocks in order, or the blocks strictly after the one whose id
    /// equals `after`.
    pub fn to_list(
        &self,
        after: Option<&str>,
    ) -> Result<Vec<Block>, LedgerError> {
        match after {
            None => Ok(self.blocks.clone()),
            Some(cursor) => {
                let pos = self
                    .index
                    .get(cursor)
                    .ok_or_else(|| LedgerError::UnknownCursor(cursor.into()))?;
                Ok(self.blocks[pos + 1..].to_vec())
            }
        }
    }
}

impl PartialEq<Self> for Ledger {
    fn eq(&self, other: &Self) -> bool {
        self.blocks == other.blocks
    }
}

impl Eq for Ledger {}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("id", &self.id)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}
