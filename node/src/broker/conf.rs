// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Copy, Clone, Debug)]
pub struct Params {
    /// Limits the number of connections served at once.
    #[serde(default = "default_max_ongoing_requests")]
    pub max_ongoing_requests: usize,

    /// Per-socket deadline on reads and on the client side of a request.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

const fn default_max_ongoing_requests() -> usize {
    64
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_ongoing_requests: default_max_ongoing_requests(),
            request_timeout: default_request_timeout(),
        }
    }
}
