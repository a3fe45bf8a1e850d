// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

#![deny(unused_crate_dependencies)]
#![deny(unused_extern_crates)]

pub mod encoding;
pub mod keys;
pub mod ledger;
pub mod message;

/// Shorten a long identifier (hex digest, base58 key) for log output.
pub fn to_str(id: &str) -> String {
    const OFFSET: usize = 8;
    if id.len() <= OFFSET * 2 {
        return id.into();
    }

    let first = &id[0..OFFSET];
    let last = &id[id.len() - OFFSET..];

    format!("{first}...{last}")
}
