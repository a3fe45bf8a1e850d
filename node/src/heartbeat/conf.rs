// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Copy, Clone, Debug)]
pub struct Params {
    /// Time between heartbeat rounds.
    #[serde(with = "humantime_serde", default = "default_period")]
    pub period: Duration,

    /// A peer silent for longer than this is considered dead.
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub ttl: Duration,
}

const fn default_period() -> Duration {
    Duration::from_secs(5)
}

const fn default_ttl() -> Duration {
    Duration::from_millis(15_000)
}

impl Default for Params {
    fn default() -> Self {
        Self {
            period: default_period(),
            ttl: default_ttl(),
        }
    }
}
