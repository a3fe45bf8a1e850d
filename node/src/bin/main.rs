// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::net::SocketAddr;

use anyhow::{anyhow, bail, Context};
use clap::{Arg, ArgMatches, Command};
use node::{Node, NodeError};
use node_data::keys::{KeyId, KeyPair};

use crate::config::Config;

mod config;

pub fn main() -> anyhow::Result<()> {
    let args = args();
    let config = Config::from(&args);

    configure_log(&config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("valid runtime")
        .block_on(async {
            let node = Node::new(config.node.clone());

            if args.get_flag("found") {
                found(&node, &config).await?;
            } else if let Some(id) = args.get_one::<String>("join") {
                join(&node, &args, KeyId::from(id.as_str())).await?;
            } else {
                bail!("nothing to do: pass --found or --join <ledger-id>");
            }

            // Run until interrupted, then leave cleanly.
            tokio::signal::ctrl_c().await.context("signal handler")?;
            tracing::info!("interrupt received, leaving ledger");
            node.leave().await?;
            Ok(())
        })
}

/// Founds a new ledger with the configured key pair, generating (and
/// persisting) one when the key file does not exist yet.
async fn found(node: &Node, config: &Config) -> anyhow::Result<()> {
    let path = config.keys_path();
    let keypair = if path.is_file() {
        tracing::info!("loading ledger key from {}", path.display());
        KeyPair::load(&path)?
    } else {
        tracing::info!("generating a new ledger key");
        let keypair = KeyPair::generate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        keypair.save(&path)?;
        tracing::info!("ledger key written to {}", path.display());
        keypair
    };

    let id = node.found(keypair).await?;
    tracing::info!("ledger {} is live", id);
    Ok(())
}

/// Joins an existing ledger, either through an explicit seed endpoint or
/// through whatever discovery turns up for the requested identity.
async fn join(
    node: &Node,
    args: &ArgMatches,
    expected: KeyId,
) -> anyhow::Result<()> {
    let seeds: Vec<SocketAddr> = match args.get_one::<String>("seed") {
        Some(seed) => vec![seed
            .parse()
            .map_err(|e| anyhow!("invalid seed '{seed}': {e}"))?],
        None => {
            let found = node.discover(None).await?;
            found
                .get(&expected)
                .map(|endpoints| endpoints.iter().copied().collect())
                .unwrap_or_default()
        }
    };

    if seeds.is_empty() {
        bail!("no reachable member of ledger {expected} was found");
    }

    for seed in &seeds {
        match node.join(&expected, *seed).await {
            Ok(id) => {
                tracing::info!("member of ledger {}", id);
                return Ok(());
            }
            Err(e @ NodeError::AlreadyMember(_)) => return Err(e.into()),
            Err(e) => tracing::warn!("join via {seed} failed: {e}"),
        }
    }

    bail!("could not join ledger {expected} through any known member");
}

fn args() -> ArgMatches {
    let command = Command::new("vellumd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Vellum ledger node.")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .env("VELLUM_CONFIG_TOML")
                .help("Configuration file path")
                .num_args(1)
                .required(false),
        );

    let command = Config::inject_args(command);
    command.get_matches()
}

fn configure_log(config: &Config) -> anyhow::Result<()> {
    let log = config.log_level();

    // Generate a subscriber with the desired log level.
    let subscriber =
        tracing_subscriber::fmt::Subscriber::builder().with_max_level(log);

    // Set the subscriber as global.
    // so this subscriber will be used as the default in all threads for the
    // remainder of the duration of the program, similar to how `loggers`
    // work in the `log` crate.
    match config.log_type().as_str() {
        "json" => {
            let subscriber = subscriber.json().flatten_event(true).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "plain" => {
            let subscriber = subscriber.with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "coloured" => {
            let subscriber = subscriber.finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        _ => unreachable!(),
    };

    Ok(())
}
