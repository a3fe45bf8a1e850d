// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Default)]
pub(crate) struct Config {
    log_level: Option<String>,
    log_type: Option<String>,
    keys_path: Option<PathBuf>,
    #[serde(default)]
    pub(crate) node: node::conf::Config,
}

/// Default log_level.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log_type.
const DEFAULT_LOG_TYPE: &str = "coloured";

impl From<&ArgMatches> for Config {
    fn from(matches: &ArgMatches) -> Self {
        let mut config = matches
            .get_one::<String>("config")
            .map_or(Config::default(), |conf_path| {
                let toml =
                    std::fs::read_to_string(conf_path).unwrap_or_else(|e| {
                        panic!("could not read {conf_path}: {e}")
                    });
                toml::from_str(&toml).unwrap_or_else(|e| {
                    panic!("could not parse {conf_path}: {e}")
                })
            });

        // Overwrite config log-level
        if let Some(log_level) = matches.get_one::<String>("log-level") {
            config.log_level = Some(log_level.into());
        }

        // Overwrite config log-type
        if let Some(log_type) = matches.get_one::<String>("log-type") {
            config.log_type = Some(log_type.into());
        }

        // Overwrite config keys-path
        if let Some(keys_path) = matches.get_one::<String>("keys-path") {
            config.keys_path = Some(PathBuf::from(keys_path));
        }

        // Overwrite config bind address
        if let Some(ip) = matches.get_one::<String>("bind-ip") {
            config.node.bind_ip = ip
                .parse()
                .unwrap_or_else(|e| panic!("invalid bind-ip '{ip}': {e}"));
        }
        if let Some(port) = matches.get_one::<String>("bind-port") {
            config.node.bind_port = port
                .parse()
                .unwrap_or_else(|e| panic!("invalid bind-port '{port}': {e}"));
        }

        config
    }
}

impl Config {
    pub fn inject_args(command: Command) -> Command {
        command
            .arg(
                Arg::new("log-level")
                    .long("log-level")
                    .value_name("LOG")
                    .value_parser([
                        "error", "warn", "info", "debug", "trace",
                    ])
                    .help("Output log level")
                    .num_args(1),
            )
            .arg(
                Arg::new("log-type")
                    .long("log-type")
                    .value_name("LOG_TYPE")
                    .value_parser(["coloured", "plain", "json"])
                    .help("Change the log format accordingly")
                    .num_args(1),
            )
            .arg(
                Arg::new("keys-path")
                    .long("keys-path")
                    .value_name("KEYS_PATH")
                    .help("Path to the PEM private key used when founding")
                    .num_args(1),
            )
            .arg(
                Arg::new("bind-ip")
                    .long("bind-ip")
                    .value_name("BIND_IP")
                    .help("Address the TCP and UDP channels bind to")
                    .num_args(1),
            )
            .arg(
                Arg::new("bind-port")
                    .long("bind-port")
                    .value_name("BIND_PORT")
                    .help("Port shared by both channels")
                    .num_args(1),
            )
            .arg(
                Arg::new("found")
                    .long("found")
                    .action(ArgAction::SetTrue)
                    .help("Found a new ledger and become its root of trust")
                    .conflicts_with("join"),
            )
            .arg(
                Arg::new("join")
                    .long("join")
                    .value_name("LEDGER_ID")
                    .help("Join the ledger with this identity")
                    .num_args(1),
            )
            .arg(
                Arg::new("seed")
                    .long("seed")
                    .value_name("HOST:PORT")
                    .help("Known member to join through (skips discovery)")
                    .num_args(1),
            )
    }

    pub(crate) fn log_type(&self) -> String {
        match &self.log_type {
            None => DEFAULT_LOG_TYPE.into(),
            Some(log_type) => log_type.into(),
        }
    }

    pub(crate) fn log_level(&self) -> tracing::Level {
        let log_level = match &self.log_level {
            None => DEFAULT_LOG_LEVEL,
            Some(log_level) => log_level,
        };
        tracing::Level::from_str(log_level).unwrap_or_else(|e| {
            panic!("Invalid log-level specified '{log_level}' - {e}")
        })
    }

    pub(crate) fn keys_path(&self) -> PathBuf {
        self.keys_path.clone().unwrap_or_else(|| {
            let mut path = dirs::home_dir().expect("OS not supported");
            path.push(".vellum");
            path.push("ledger.key");
            path
        })
    }
}
