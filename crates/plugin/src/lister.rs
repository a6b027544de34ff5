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

//! Set-name discovery
//!
//! The lister maps the configured set names onto the framework's resource
//! namespace: the sorted name list is published once at start and re-checked
//! on the config check interval, re-publishing whenever it changes. Each
//! name becomes one [`ZcryptPlugin`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use plexcrypt_ap::ApScanner;
use plexcrypt_config::{ConfigStore, SetLookup, Settings};
use plexcrypt_dpm::PluginLister;
use plexcrypt_metrics::MetricsCollector;
use plexcrypt_shadowsysfs::ShadowSysfs;
use plexcrypt_zcrypt::ZcryptNodes;

use crate::plugin::ZcryptPlugin;
use crate::BASE_RESOURCE_NAME;

/// Discovers configuration-set names and constructs their plugins.
pub struct ZcryptLister {
    machineid: String,
    settings: Arc<Settings>,
    store: Arc<ConfigStore>,
    scanner: ApScanner,
    znodes: ZcryptNodes,
    shadow: ShadowSysfs,
    metrics: Arc<MetricsCollector>,
}

impl ZcryptLister {
    pub fn new(
        machineid: String,
        settings: Arc<Settings>,
        store: Arc<ConfigStore>,
        scanner: ApScanner,
        znodes: ZcryptNodes,
        shadow: ShadowSysfs,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            machineid,
            settings,
            store,
            scanner,
            znodes,
            shadow,
            metrics,
        }
    }

    async fn sorted_set_names(&self) -> Vec<String> {
        let mut names = self.store.set_names().await;
        names.sort();
        names
    }
}

#[async_trait]
impl PluginLister for ZcryptLister {
    type Plugin = ZcryptPlugin;

    fn resource_namespace(&self) -> String {
        BASE_RESOURCE_NAME.to_string()
    }

    async fn discover(
        &self,
        names_tx: mpsc::Sender<Vec<String>>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut current = self.sorted_set_names().await;
        info!(
            "Register plugins for these CryptoConfigSets: {:?}",
            current
        );
        if names_tx.send(current.clone()).await.is_err() {
            return;
        }

        let mut tick = tokio::time::interval(self.settings.cryptoconfig_check_interval());
        tick.tick().await;
        loop {
            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = tick.tick() => {
                    let names = self.sorted_set_names().await;
                    if names != current {
                        current = names;
                        info!(
                            "Found crypto config set changes. Reannouncing: {:?}",
                            current
                        );
                        if names_tx.send(current.clone()).await.is_err() {
                            return;
                        }
                    } else if current.is_empty() {
                        warn!("No crypto config sets available, check configuration !");
                    }
                }
            }
        }
    }

    async fn new_plugin(&self, resource: &str) -> ZcryptPlugin {
        info!("NewPlugin('{}')", resource);
        let (seed_ccset, seed_tag) = match self.store.set_if_changed(resource, None).await {
            SetLookup::Updated { ccset, tag } => (ccset, tag),
            SetLookup::Unchanged => (None, None),
        };
        ZcryptPlugin::new(
            resource.to_string(),
            self.machineid.clone(),
            Arc::clone(&self.settings),
            Arc::clone(&self.store),
            self.scanner.clone(),
            self.znodes.clone(),
            self.shadow.clone(),
            Arc::clone(&self.metrics),
            seed_ccset,
            seed_tag,
        )
    }
}
