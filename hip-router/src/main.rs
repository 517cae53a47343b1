//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;
mod identity_file;
mod peer_table;

use std::sync::Arc;

use clap::{App, Arg};
use config::Config;
use hip_core::network::{FdBridge, RawIpBackbone};
use hip_core::router::Router;
use hip_core::tasks::messages;
use rand::RngCore;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Layer;

fn init_tracing(config: &config::Logging) {
    let file = config.file.enabled.then(|| {
        let file_appender = rolling::never(&config.file.dir, &config.file.name);
        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_ansi(false)
            .with_filter(LevelFilter::from_level(tracing::Level::TRACE))
    });

    let stdout = config.stdout.enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(LevelFilter::from_level(tracing::Level::TRACE))
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("hip_core=debug".parse().unwrap())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

fn main() {
    let matches = App::new("HIP VPLS router daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    let config_file = matches.value_of("config");
    let config = Config::load(config_file);

    init_tracing(&config.logging);

    let identity = identity_file::load_or_generate(&config.identity_key_path)
        .expect("failed to load local Host Identity");
    info!(hit = %identity.hit, "local Host Identity loaded");

    let store = peer_table::load(&config.peer_table_path).expect("failed to load peer table");

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    info!("starting up");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(run(config, identity, store));
}

async fn run(
    config: Config,
    identity: hip_core::identity::HostIdentity,
    store: hip_core::identity::IdentityStore,
) {
    let bridge_file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.bridge.device_path)
        .unwrap_or_else(|error| {
            error!(%error, path = %config.bridge.device_path, "failed to open bridge device");
            std::process::exit(1);
        });
    let bridge = Arc::new(FdBridge::new(bridge_file));

    let backbone = RawIpBackbone::new(config.backbone.local_addr).unwrap_or_else(|error| {
        error.log();
        std::process::exit(1);
    });
    let backbone = Arc::new(backbone);

    let mut responder_secret = [0u8; 32];
    rand::rng().fill_bytes(&mut responder_secret);

    let (input_txp, mut input_rxc) =
        tokio::sync::mpsc::channel::<messages::input::ProtocolMsg>(config.queue_bound);

    let mut router = Router::new(identity, store, responder_secret, bridge, backbone, input_txp)
        .with_queue_bound(config.queue_bound)
        .with_puzzle_k(config.puzzle_k);

    let _io_tasks = router.spawn_io_tasks();

    info!("ready");

    loop {
        tokio::select! {
            Some(msg) = input_rxc.recv() => {
                router.handle(msg).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            else => break,
        }
    }
}
