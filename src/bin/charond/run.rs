// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements running the resolver.

use std::fmt::Write;
use std::net::{SocketAddr, UdpSocket};
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGINT, SIGTERM};

use charon::control::ControlPlane;
use charon::engine::Engine;
use charon::forward::Forwarder;
use charon::resolver::Resolver;
use charon::rr::Ttl;
use charon::store::Store;
use charon::zone_file;

use crate::args::Args;
use crate::config::{self, Config};

/// Runs the resolver.
pub fn run(args: Args) {
    let mut config = match config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            // The log filter depends on the configuration, so failures
            // this early use the default filter.
            env_logger::init_from_env(Env::new().default_filter_or("warn"));
            report_failure(e);
            process::exit(1);
        }
    };

    // The command line overrides whichever configuration source was
    // loaded.
    if let Some(bind) = args.bind {
        config.listen_addr = bind;
    }
    if let Some(port) = args.port {
        config.listen_port = port;
    }

    // The verbose key raises the default filter so that per-query
    // decisions are logged; RUST_LOG still takes precedence.
    let default_filter = if config.verbose { "debug" } else { "warn" };
    env_logger::init_from_env(Env::new().default_filter_or(default_filter));

    if let Err(e) = try_running(config) {
        report_failure(e);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn report_failure(e: anyhow::Error) {
    let mut message = String::from("Failed to run:");
    for (i, cause) in e.chain().enumerate() {
        write!(message, "\n[{}] {}", i + 1, cause).unwrap();
    }
    message.push_str("\nExiting with failure.");
    error!("{}", message);
}

fn try_running(config: Config) -> Result<()> {
    info!(
        "Charon daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    let preset = config.upstream_preset()?;

    // Bind both sockets before loading zone data, so that an already
    // claimed port or socket path fails fast.
    let bind = SocketAddr::new(config.listen_addr, config.listen_port);
    let socket = UdpSocket::bind(bind)
        .with_context(|| format!("failed to bind the UDP socket at {}", bind))?;
    info!("Listening for DNS queries on {}.", bind);
    let control = ControlPlane::bind(&config.control_socket).with_context(|| {
        format!(
            "failed to bind the control socket at {}",
            config.control_socket.display(),
        )
    })?;
    info!("Listening for control commands on {}.", control.path().display());

    let mut store = Store::new();
    if let Some(ref path) = config.zone_file {
        let count = zone_file::load_into(&mut store, path)
            .with_context(|| format!("failed to load the zone file {}", path.display()))?;
        if count == 1 {
            info!("Loaded 1 record from {}.", path.display());
        } else {
            info!("Loaded {} records from {}.", count, path.display());
        }
    }

    let forwarder = Forwarder::new(preset, Duration::from_millis(config.upstream_timeout_ms));
    info!("Forwarding cache misses to the {} upstreams.", preset);

    let mut resolver = Resolver::new(store, forwarder, Ttl::from(config.cache_ttl));
    resolver.set_max_cache_entries(config.max_cache_entries);

    let shutdown = set_up_signal_handling().context("failed to set up signal handling")?;

    info!("Set-up is complete; serving queries.");
    let mut engine = Engine::new(socket, control, resolver, shutdown);
    engine.run().context("the event loop failed")?;
    info!("Received a termination signal; shutting down.");
    Ok(())
}

fn set_up_signal_handling() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));

    // The first SIGINT/SIGTERM raises the flag and the event loop winds
    // down; a second one exits immediately in case shutdown stalls.
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(sig, 1, shutdown.clone())?;
        signal_hook::flag::register(sig, shutdown.clone())?;
    }
    Ok(shutdown)
}
