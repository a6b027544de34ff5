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

//! # Per-set Device Plugin
//!
//! ## Purpose
//! One [`ZcryptPlugin`] serves one configuration set as one kubelet resource:
//! it owns the set's filtered APQN list, derives the announced plugin
//! devices (APQNs times overcommit, health from the queue's online state)
//! and performs the allocation transaction.
//!
//! ## Concurrency
//! The plugin state sits behind a `RwLock`; a change-watch task rescans the
//! host and re-checks the configuration on a ticker and publishes new device
//! lists through a `tokio::sync::watch` channel. Every `ListAndWatch` stream
//! follows that channel, which makes close-ordering trivial: streams see the
//! stop signal, no sender ever races a closed channel.
//!
//! ## Allocation
//! `Allocate` composes the two host resources - zcrypt node and shadow sysfs
//! tree - and rolls both back if any step fails, so a failed call leaves no
//! residue on the host. Only the first device ID of a container request is
//! honored: one crypto queue per container.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use plexcrypt_ap::{
    apqns_to_string, equal_apqn_lists, format_apqn_device_id, parse_apqn_device_id, ApScanner,
    Apqn,
};
use plexcrypt_config::{ConfigStore, CryptoConfigSet, SetLookup, Settings};
use plexcrypt_dpm::DevicePluginImpl;
use plexcrypt_metrics::MetricsCollector;
use plexcrypt_proto::deviceplugin::v1beta1::{
    AllocateRequest, AllocateResponse, ContainerAllocateResponse, Device, DevicePluginOptions,
    DeviceSpec, Empty, ListAndWatchResponse, Mount, PreStartContainerRequest,
    PreStartContainerResponse, PreferredAllocationRequest, PreferredAllocationResponse, HEALTHY,
    UNHEALTHY,
};
use plexcrypt_proto::DevicePlugin;
use plexcrypt_shadowsysfs::ShadowSysfs;
use plexcrypt_zcrypt::ZcryptNodes;

/// Container-side path of the allocated crypto device node.
const CONTAINER_CRYPTO_DEV: &str = "/dev/z90crypt";

struct PluginState {
    ccset: Option<CryptoConfigSet>,
    tag: Option<Vec<u8>>,
    apqns: Vec<Apqn>,
}

struct Inner {
    resource: String,
    machineid: String,
    settings: Arc<Settings>,
    store: Arc<ConfigStore>,
    scanner: ApScanner,
    znodes: ZcryptNodes,
    shadow: ShadowSysfs,
    metrics: Arc<MetricsCollector>,
    state: RwLock<PluginState>,
    devices_tx: watch::Sender<Vec<Device>>,
    stop_tx: watch::Sender<bool>,
    change_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Device plugin for one configuration set.
#[derive(Clone)]
pub struct ZcryptPlugin {
    inner: Arc<Inner>,
}

impl ZcryptPlugin {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        resource: String,
        machineid: String,
        settings: Arc<Settings>,
        store: Arc<ConfigStore>,
        scanner: ApScanner,
        znodes: ZcryptNodes,
        shadow: ShadowSysfs,
        metrics: Arc<MetricsCollector>,
        seed_ccset: Option<CryptoConfigSet>,
        seed_tag: Option<Vec<u8>>,
    ) -> Self {
        let (devices_tx, _) = watch::channel(Vec::new());
        let (stop_tx, _) = watch::channel(false);
        let ccset = seed_ccset.map(|c| apply_set_defaults(c, &settings));
        Self {
            inner: Arc::new(Inner {
                resource,
                machineid,
                settings,
                store,
                scanner,
                znodes,
                shadow,
                metrics,
                state: RwLock::new(PluginState {
                    ccset,
                    tag: seed_tag,
                    apqns: Vec::new(),
                }),
                devices_tx,
                stop_tx,
                change_loop: Mutex::new(None),
            }),
        }
    }

    /// Current announced devices (testing/introspection).
    pub fn current_devices(&self) -> Vec<Device> {
        self.inner.devices_tx.borrow().clone()
    }
}

impl Inner {
    /// Initial scan plus device announcement; called once from `start`.
    async fn start_plugin(&self) -> Result<(), String> {
        let all = self
            .scanner
            .scan_apqns()
            .map_err(|e| format!("failure trying to scan node APQNs: {}", e))?;

        let mut state = self.state.write().await;
        state.apqns = filter_apqns(state.ccset.as_ref(), &self.machineid, &all);
        info!(
            "Plugin['{}']: Found {} eligible APQNs: {}",
            self.resource,
            state.apqns.len(),
            apqns_to_string(&state.apqns)
        );
        self.metrics.notify_apqns(&self.resource, &state.apqns).await;

        let devices = make_plugin_devices(
            &state.apqns,
            state.ccset.as_ref().map(|c| c.overcommit).unwrap_or(1),
        );
        info!(
            "Plugin['{}']: Derived {} plugin devices from the list of APQNs",
            self.resource,
            devices.len()
        );
        self.notify_metrics_devices(&devices).await;
        let _ = self.devices_tx.send(devices);
        Ok(())
    }

    /// One pass of the change-watch loop: rescan, re-check config, publish
    /// when something moved. Returns whether an update was published.
    async fn check_changed(&self) -> bool {
        let (cached_ccset, cached_tag, cached_apqns) = {
            let state = self.state.read().await;
            (state.ccset.clone(), state.tag.clone(), state.apqns.clone())
        };

        let lookup = self
            .store
            .set_if_changed(&self.resource, cached_tag.as_deref())
            .await;

        let all = match self.scanner.scan_apqns() {
            Ok(list) => list,
            Err(e) => {
                warn!(
                    "Plugin['{}']: failure trying to rescan node APQNs: {}",
                    self.resource, e
                );
                return false;
            }
        };

        let (ccset, tag, config_updated) = match lookup {
            SetLookup::Unchanged => (cached_ccset.clone(), cached_tag.clone(), false),
            SetLookup::Updated { ccset, tag } => (
                ccset.map(|c| apply_set_defaults(c, &self.settings)),
                tag,
                true,
            ),
        };

        let apqns = filter_apqns(ccset.as_ref(), &self.machineid, &all);
        let apqns_changed = !equal_apqn_lists(&apqns, &cached_apqns);
        if apqns_changed {
            info!(
                "Plugin['{}']: Rescan found {} eligible APQNs (with changes): {}",
                self.resource,
                apqns.len(),
                apqns_to_string(&apqns)
            );
        }

        let config_changed = config_updated
            && match (&cached_ccset, &ccset) {
                (Some(old), Some(new)) => {
                    if old.overcommit != new.overcommit {
                        info!(
                            "Plugin['{}']: Rescan found changes in ConfigSet: overcommit limit has changed",
                            self.resource
                        );
                    }
                    if old.livesysfs != new.livesysfs {
                        info!(
                            "Plugin['{}']: Rescan found changes in ConfigSet: livesysfs parameter has changed",
                            self.resource
                        );
                    }
                    old.overcommit != new.overcommit || old.livesysfs != new.livesysfs
                }
                (None, None) => false,
                _ => true,
            };

        if !apqns_changed && !config_changed {
            debug!("Plugin['{}']: no changes", self.resource);
            // keep the freshest tag anyway so the next lookup stays O(compare)
            if config_updated {
                let mut state = self.state.write().await;
                state.ccset = ccset;
                state.tag = tag;
            }
            return false;
        }

        let overcommit = ccset.as_ref().map(|c| c.overcommit).unwrap_or(1);
        let devices = make_plugin_devices(&apqns, overcommit);
        info!(
            "Plugin['{}']: Derived {} plugin devices from the list of APQNs",
            self.resource,
            devices.len()
        );

        {
            let mut state = self.state.write().await;
            state.ccset = ccset;
            state.tag = tag;
            state.apqns = apqns.clone();
        }
        self.metrics.notify_apqns(&self.resource, &apqns).await;
        self.notify_metrics_devices(&devices).await;
        let _ = self.devices_tx.send(devices);
        true
    }

    /// Healthy device IDs are what the metrics side counts as capacity.
    async fn notify_metrics_devices(&self, devices: &[Device]) {
        let healthy: Vec<String> = devices
            .iter()
            .filter(|d| d.health == HEALTHY)
            .map(|d| d.id.clone())
            .collect();
        self.metrics
            .notify_plugin_devs(&self.resource, &healthy)
            .await;
    }

    /// The allocation transaction for one device ID.
    async fn allocate_device(
        &self,
        id: &str,
        livesysfs: bool,
        carsp: &mut ContainerAllocateResponse,
    ) -> Result<(), Status> {
        let Some((card, queue, overcount)) = parse_apqn_device_id(id) else {
            error!("Plugin['{}']: Error parsing device id '{}'", self.resource, id);
            return Err(Status::invalid_argument(format!(
                "Error parsing device id '{}'",
                id
            )));
        };

        // the zcrypt node may survive from a previous allocation of the same
        // plugin device; names are deterministic, creation is idempotent
        let znode = format!("zcrypt-{}", format_apqn_device_id(card, queue, overcount));
        if !self.znodes.node_exists(&znode) {
            info!(
                "Plugin['{}']: creating zcrypt device node '{}'",
                self.resource, znode
            );
            if let Err(e) = self.znodes.create_simple_node(&znode, card, queue).await {
                error!(
                    "Plugin['{}']: Error creating zcrypt node '{}': {}",
                    self.resource, znode, e
                );
                let _ = self.znodes.destroy_node(&znode);
                return Err(Status::internal(format!(
                    "Error creating zcrypt node '{}'",
                    znode
                )));
            }
        }

        // shadow sysfs for exactly this queue
        let tree = match self
            .shadow
            .make_shadow_ap_sysfs(id, livesysfs, card, queue)
        {
            Ok(tree) => tree,
            Err(e) => {
                error!(
                    "Plugin['{}']: Error creating shadow sysfs for device '{}': {}",
                    self.resource, id, e
                );
                let _ = self.znodes.destroy_node(&znode);
                return Err(Status::internal(format!(
                    "Error creating shadow sysfs for device '{}'",
                    id
                )));
            }
        };

        carsp.devices.push(DeviceSpec {
            container_path: CONTAINER_CRYPTO_DEV.to_string(),
            host_path: format!("/dev/{}", znode),
            permissions: "rw".to_string(),
        });
        carsp.mounts.push(Mount {
            container_path: "/sys/bus/ap".to_string(),
            host_path: tree.busdir.display().to_string(),
            read_only: true,
        });
        carsp.mounts.push(Mount {
            container_path: "/sys/devices/ap".to_string(),
            host_path: tree.devsdir.display().to_string(),
            read_only: true,
        });

        if livesysfs {
            match self.shadow.add_live_mount(id, card, queue) {
                Ok(pair) => carsp.mounts.push(Mount {
                    container_path: pair.container_path,
                    host_path: pair.host_path,
                    read_only: true,
                }),
                Err(e) => {
                    error!(
                        "Plugin['{}']: Error adding live mounts for device '{}': {}",
                        self.resource, id, e
                    );
                    self.shadow
                        .delete_shadow(&format!("sysfs-{}", id));
                    let _ = self.znodes.destroy_node(&znode);
                    return Err(Status::internal(format!(
                        "Error adding live mounts for device '{}'",
                        id
                    )));
                }
            }
        }

        self.metrics.notify_alloc(&self.resource, id).await;
        Ok(())
    }
}

#[async_trait]
impl DevicePluginImpl for ZcryptPlugin {
    async fn start(&self) -> Result<(), String> {
        info!("Plugin['{}']: Start()", self.inner.resource);
        self.inner.start_plugin().await?;

        let inner = Arc::clone(&self.inner);
        let mut stop_rx = self.inner.stop_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(inner.settings.apqn_check_interval());
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = tick.tick() => {
                        inner.check_changed().await;
                    }
                }
            }
        });
        *self.inner.change_loop.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        info!("Plugin['{}']: Stop()", self.inner.resource);

        // stop the change loop first; afterwards nobody publishes devices
        let _ = self.inner.stop_tx.send(true);
        if let Some(handle) = self.inner.change_loop.lock().await.take() {
            let _ = handle.await;
        }

        // clear apqns and plugin devices and tell the metrics side
        {
            let mut state = self.inner.state.write().await;
            state.apqns = Vec::new();
        }
        self.inner.metrics.notify_apqns(&self.inner.resource, &[]).await;
        self.inner
            .metrics
            .notify_plugin_devs(&self.inner.resource, &[])
            .await;
        let _ = self.inner.devices_tx.send(Vec::new());
    }
}

#[async_trait]
impl DevicePlugin for ZcryptPlugin {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<DevicePluginOptions>, Status> {
        info!("Plugin['{}']: GetDevicePluginOptions()", self.inner.resource);
        Ok(Response::new(DevicePluginOptions {
            pre_start_required: false,
            get_preferred_allocation_available: false,
        }))
    }

    type ListAndWatchStream = ReceiverStream<Result<ListAndWatchResponse, Status>>;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListAndWatchStream>, Status> {
        let resource = self.inner.resource.clone();
        let mut devices_rx = self.inner.devices_tx.subscribe();
        let mut stop_rx = self.inner.stop_tx.subscribe();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            loop {
                let devices = devices_rx.borrow_and_update().clone();
                info!(
                    "Plugin['{}']: ListAndWatch() Announcing {} devices",
                    resource,
                    devices.len()
                );
                if tx
                    .send(Ok(ListAndWatchResponse { devices }))
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    changed = devices_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_preferred_allocation(
        &self,
        _request: Request<PreferredAllocationRequest>,
    ) -> Result<Response<PreferredAllocationResponse>, Status> {
        Ok(Response::new(PreferredAllocationResponse::default()))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> Result<Response<AllocateResponse>, Status> {
        let req = request.into_inner();
        info!("Plugin['{}']: Allocate(request={:?})", self.inner.resource, req);

        // snapshot the effective livesysfs for the whole call
        let livesysfs = {
            let state = self.inner.state.read().await;
            state
                .ccset
                .as_ref()
                .map(|c| c.livesysfs)
                .unwrap_or(self.inner.settings.apqn_live_sysfs)
        } > 0;

        let mut rsp = AllocateResponse::default();
        for careq in &req.container_requests {
            let mut carsp = ContainerAllocateResponse::default();
            // only one device per container supported: take the first id
            if let Some(id) = careq.devices_ids.first() {
                self.inner
                    .allocate_device(id, livesysfs, &mut carsp)
                    .await?;
                if careq.devices_ids.len() > 1 {
                    warn!(
                        "Plugin['{}']: ignoring {} additional device ids in container request",
                        self.inner.resource,
                        careq.devices_ids.len() - 1
                    );
                }
            }
            rsp.container_responses.push(carsp);
        }

        Ok(Response::new(rsp))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> Result<Response<PreStartContainerResponse>, Status> {
        Err(Status::unimplemented("PreStartContainer() not implemented"))
    }
}

/// Fill the `-1` sentinels with the process-wide defaults. Happens once per
/// config generation, at the point the set enters the plugin.
fn apply_set_defaults(mut ccset: CryptoConfigSet, settings: &Settings) -> CryptoConfigSet {
    if ccset.overcommit < 0 {
        ccset.overcommit = settings.apqn_overcommit_limit;
    }
    if ccset.livesysfs < 0 {
        ccset.livesysfs = settings.apqn_live_sysfs;
    }
    ccset
}

/// Which of the node's APQNs does this set expose.
fn filter_apqns(
    ccset: Option<&CryptoConfigSet>,
    machineid: &str,
    apqnlist: &[Apqn],
) -> Vec<Apqn> {
    let Some(ccset) = ccset else {
        return Vec::new();
    };

    let mut apqns = Vec::new();
    for a in apqnlist {
        for c in &ccset.apqns {
            if a.adapter as i32 != c.adapter || a.domain as i32 != c.domain {
                continue;
            }
            if !c.machineid.is_empty() && machineid != c.machineid {
                continue;
            }
            if !ccset.mincexgen.is_empty() && a.gen.as_str() < ccset.mincexgen.as_str() {
                debug!(
                    "APQN ({},{}) not announced. Card generation = {}, but {} or higher required",
                    a.adapter, a.domain, a.gen, ccset.mincexgen
                );
                continue;
            }
            if !ccset.cexmode.is_empty() && a.mode.as_str() != ccset.cexmode {
                debug!(
                    "APQN ({},{}) not announced. Card mode = {}, but {} required",
                    a.adapter, a.domain, a.mode, ccset.cexmode
                );
                continue;
            }
            apqns.push(a.clone());
        }
    }
    apqns
}

/// `max(1, overcommit)` devices per APQN, health from the online flag.
fn make_plugin_devices(apqns: &[Apqn], overcommit: i32) -> Vec<Device> {
    let mut devices = Vec::new();
    for a in apqns {
        let health = if a.online { HEALTHY } else { UNHEALTHY };
        for i in 0..overcommit.max(1) {
            devices.push(Device {
                id: format_apqn_device_id(a.adapter, a.domain, i as u16),
                health: health.to_string(),
                topology: None,
            });
        }
    }
    devices
}
