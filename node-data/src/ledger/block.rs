// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use serde::{Deserialize, Serialize};

use super::LedgerError;
use crate::keys::{self, KeyError, KeyId, KeyPair, PublicKey};

pub type BlockId = String;

/// Field separator inside the hashed canonical forms. Both signer and
/// verifier must build the exact same byte string.
const SEP: u8 = 0x1f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Root,
    Trust,
    Revoke,
}

impl BlockType {
    pub fn tag(&self) -> &'static str {
        match self {
            BlockType::Root => "root",
            BlockType::Trust => "trust",
            BlockType::Revoke => "revoke",
        }
    }
}

/// A signed assertion linking a subject public key into the ledger.
///
/// Immutable once signed. `pubkey` travels as base58 of the subject key's
/// SPKI DER; `pubkey_hash` repeats the subject KeyId so receivers can check
/// transport integrity without decoding the key first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    block_type: BlockType,
    predecessor: Option<BlockId>,
    pubkey: String,
    pubkey_hash: KeyId,
    signatory_hash: KeyId,
    signature: String,
    #[serde(default)]
    id: BlockId,
}

impl PartialEq<Self> for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Block {}

impl Block {
    /// Starts a block for `subject`; [`UnsignedBlock::sign`] completes it.
    pub fn unsigned(
        block_type: BlockType,
        predecessor: Option<BlockId>,
        subject: &PublicKey,
    ) -> UnsignedBlock {
        UnsignedBlock {
            block_type,
            predecessor,
            pubkey: subject.to_base58(),
            pubkey_hash: subject.key_id().clone(),
            pubkey_der: subject.der().to_vec(),
        }
    }

    /// The self-signed block founding a new ledger.
    pub fn root(keypair: &KeyPair) -> Result<Self, KeyError> {
        Self::unsigned(BlockType::Root, None, keypair.public()).sign(keypair)
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn predecessor(&self) -> Option<&str> {
        self.predecessor.as_deref()
    }

    /// Base58 SPKI DER of the subject key.
    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn pubkey_hash(&self) -> &KeyId {
        &self.pubkey_hash
    }

    pub fn signatory_hash(&self) -> &KeyId {
        &self.signatory_hash
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Derived block id: hex SHA-256 over all transmitted fields.
    pub fn id(&self) -> BlockId {
        if self.id.is_empty() {
            self.compute_id()
        } else {
            self.id.clone()
        }
    }

    /// Decodes the subject key out of its transport form.
    pub fn subject_key(&self) -> Result<PublicKey, KeyError> {
        PublicKey::from_base58(&self.pubkey)
    }

    /// Digest the signatory signed: SHA-256 over
    /// `type 0x1F predecessor 0x1F subject_der 0x1F pubkey_hash`.
    pub fn signing_digest(&self) -> Result<String, KeyError> {
        let der = keys::from_base58(&self.pubkey)?;
        Ok(signing_digest(
            self.block_type,
            self.predecessor.as_deref(),
            &der,
            &self.pubkey_hash,
        ))
    }

    /// Checks the signature under the given signatory key.
    pub fn verify_signature(
        &self,
        signatory: &PublicKey,
    ) -> Result<(), LedgerError> {
        let digest = self.signing_digest()?;
        let sig = keys::from_base58(&self.signature)
            .map_err(|_| LedgerError::BadSignature)?;
        if !signatory.verify(digest.as_bytes(), &sig) {
            return Err(LedgerError::BadSignature);
        }
        Ok(())
    }

    /// Validates the self-describing fields and fills the derived id.
    ///
    /// Rejects a block whose `pubkey_hash` does not match the subject key,
    /// or whose transmitted id differs from the recomputed one.
    pub(super) fn normalized(mut self) -> Result<Self, LedgerError> {
        let subject = self.subject_key()?;
        if subject.key_id() != &self.pubkey_hash {
            return Err(LedgerError::HashMismatch);
        }

        let computed = self.compute_id();
        if self.id.is_empty() {
            self.id = computed;
        } else if self.id != computed {
            return Err(LedgerError::HashMismatch);
        }
        Ok(self)
    }

    fn compute_id(&self) -> BlockId {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.block_type.tag().as_bytes());
        buf.push(SEP);
        if let Some(p) = &self.predecessor {
            buf.extend_from_slice(p.as_bytes());
        }
        buf.push(SEP);
        buf.extend_from_slice(self.pubkey.as_bytes());
        buf.push(SEP);
        buf.extend_from_slice(self.pubkey_hash.as_str().as_bytes());
        buf.push(SEP);
        buf.extend_from_slice(self.signatory_hash.as_str().as_bytes());
        buf.push(SEP);
        buf.extend_from_slice(self.signature.as_bytes());
        keys::hash_hex(&buf)
    }
}

fn signing_digest(
    block_type: BlockType,
    predecessor: Option<&str>,
    subject_der: &[u8],
    pubkey_hash: &KeyId,
) -> String {
    let mut buf = Vec::new();
    buf.extend_from_slice(block_type.tag().as_bytes());
    buf.push(SEP);
    if let Some(p) = predecessor {
        buf.extend_from_slice(p.as_bytes());
    }
    buf.push(SEP);
    buf.extend_from_slice(subject_der);
    buf.push(SEP);
    buf.extend_from_slice(pubkey_hash.as_str().as_bytes());
    keys::hash_hex(&buf)
}

/// A block that still lacks its signature.
pub struct UnsignedBlock {
    block_type: BlockType,
    predecessor: Option<BlockId>,
    pubkey: String,
    pubkey_hash: KeyId,
    pubkey_der: Vec<u8>,
}

impl UnsignedBlock {
    pub fn sign(self, signer: &KeyPair) -> Result<Block, KeyError> {
        let digest = signing_digest(
            self.block_type,
            self.predecessor.as_deref(),
            &self.pubkey_der,
            &self.pubkey_hash,
        );
        let signature = signer.sign(digest.as_bytes())?;

        let mut block = Block {
            block_type: self.block_type,
            predecessor: self.predecessor,
            pubkey: self.pubkey,
            pubkey_hash: self.pubkey_hash,
            signatory_hash: signer.key_id().clone(),
            signature: keys::to_base58(&signature),
            id: BlockId::new(),
        };
        block.id = block.compute_id();
        Ok(block)
    }
}
