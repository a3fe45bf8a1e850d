// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use node_data::encoding;
use serde::{Deserialize, Serialize};

/// Node-wide configuration. Every field has a serde default so a partial
/// (or absent) TOML section still yields a runnable config.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Address both the TCP and UDP channels bind to.
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Port shared by both channels. 0 lets the OS pick one.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Width of the ASCII length field on TCP frames. All peers of a
    /// ledger must agree on it.
    #[serde(default = "default_frame_width")]
    pub frame_width: usize,

    /// How long a discovery broadcast collects answers.
    #[serde(with = "humantime_serde", default = "default_discovery_timeout")]
    pub discovery_timeout: Duration,

    #[serde(default)]
    pub broker: crate::broker::conf::Params,

    #[serde(default)]
    pub heartbeat: crate::heartbeat::conf::Params,
}

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_bind_port() -> u16 {
    2525
}

const fn default_frame_width() -> usize {
    encoding::FRAME_WIDTH
}

const fn default_discovery_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            bind_port: default_bind_port(),
            frame_width: default_frame_width(),
            discovery_timeout: default_discovery_timeout(),
            broker: Default::default(),
            heartbeat: Default::default(),
        }
    }
}
