// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexCrypt.
//
// PlexCrypt is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexCrypt is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexCrypt. If not, see <https://www.gnu.org/licenses/>.

//! # PlexCrypt Node Binary
//!
//! ## Purpose
//! Wires the components together and runs them until SIGTERM/SIGINT:
//! host support checks, machine id, config store + watcher, pod lister,
//! metrics collector and the device-plugin manager serving one plugin per
//! configured crypto set.
//!
//! Startup is fail-fast: a node without AP bus support, zcrypt multi-node
//! support, machine id or a loadable configuration exits non-zero and lets
//! the orchestrator restart the pod.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plexcrypt_ap::{machine_id, ApScanner};
use plexcrypt_config::{ConfigStore, Settings, CONFIG_FILE};
use plexcrypt_dpm::Manager;
use plexcrypt_metrics::MetricsCollector;
use plexcrypt_plugin::{ZcryptLister, BASE_RESOURCE_NAME};
use plexcrypt_podlister::PodLister;
use plexcrypt_proto::podresources::v1::POD_RESOURCES_SOCKET;
use plexcrypt_shadowsysfs::ShadowSysfs;
use plexcrypt_zcrypt::{ZcryptNodes, ZCRYPT_CLASS_DIR, ZCRYPT_VDEV_DIR};

/// s390 CEX crypto resources device plugin
#[derive(Parser, Debug)]
#[command(name = "plexcrypt-node", version, about)]
struct Args {}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _args = Args::parse();
    init_tracing();

    info!("S390 k8s z crypto resources plugin starting");

    let settings = Arc::new(Settings::from_env());

    // check for AP bus support and machine id fetchable or die
    let scanner = ApScanner::new(&settings.ap_sysfs_busdir, &settings.ap_sysfs_devsdir);
    if !scanner.has_ap_support() {
        bail!("No AP bus support available");
    }
    let machineid = machine_id().context("Reading machine id failed")?;
    info!("Machine id is '{}'", machineid);

    // initial list of the available apqns on this node or die
    let apqns = scanner
        .scan_apqns()
        .context("Initial scan of the available APQNs on this node failed")?;
    info!(
        "Initial scan found {} APQNs: {}",
        apqns.len(),
        plexcrypt_ap::apqns_to_string(&apqns)
    );

    // read the config file or die
    let store = ConfigStore::new(CONFIG_FILE);
    let config = store
        .load_initial()
        .await
        .context("Reading crypto configuration failed")?;
    info!("Crypto configuration successfully read");
    config.pretty_log();
    let config_watcher = store.spawn_watcher(settings.cryptoconfig_check_interval());

    // check for zcrypt multiple node support or die
    let znodes = ZcryptNodes::new(ZCRYPT_CLASS_DIR, ZCRYPT_VDEV_DIR, "/dev");
    if !znodes.has_nodes_support() {
        bail!("No zcrypt multiple node support available");
    }

    // shadow sysfs base dir usable or die
    let shadow = ShadowSysfs::new(
        &settings.shadow_sysfs_basedir,
        &settings.ap_sysfs_busdir,
        &settings.ap_sysfs_devsdir,
    );
    shadow
        .init_base_dir()
        .context("Shadow sysfs base directory not usable")?;

    // start metrics collector or die
    let Some(nodename) = settings.nodename.clone() else {
        bail!("Missing NODENAME env setting");
    };
    let metrics = MetricsCollector::new(
        nodename,
        settings.metrics_collector_addr(),
        settings.metrics_poll_interval(),
        settings.podlister_poll_interval(),
        scanner.clone(),
    );
    let metrics_handle = metrics.start();

    // start pod lister or die
    let podlister = PodLister::new(
        POD_RESOURCES_SOCKET,
        BASE_RESOURCE_NAME,
        machineid.clone(),
        settings.podlister_poll_interval(),
        std::time::Duration::from_secs(settings.resource_delete_never_used),
        std::time::Duration::from_secs(settings.resource_delete_unused),
        Arc::clone(&store),
        znodes.clone(),
        shadow.clone(),
        Arc::clone(&metrics),
    );
    let podlister_handle = podlister
        .start()
        .await
        .context("PodLister start failed")?;

    // enter the crypto resources plugins loop
    let lister = ZcryptLister::new(
        machineid,
        Arc::clone(&settings),
        Arc::clone(&store),
        scanner,
        znodes,
        shadow,
        Arc::clone(&metrics),
    );
    let manager = Manager::new(lister);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("Signal handling failed: {}", e);
                }
                info!("Received SIGINT");
            }
        }
        let _ = shutdown_tx.send(true);
    });

    manager.run(shutdown_rx).await?;

    // orderly teardown in reverse start order
    metrics_handle.stop().await;
    podlister_handle.stop().await;
    config_watcher.stop().await;

    info!("S390 k8s z crypto resources plugin terminating");
    Ok(())
}
