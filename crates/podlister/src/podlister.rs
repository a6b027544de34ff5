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

//! Pod-resources polling loop and reclamation

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tonic::transport::Channel;
use tracing::{info, warn};

use plexcrypt_ap::{parse_apqn_device_id, APQN_DEVICE_ID_PREFIX};
use plexcrypt_config::ConfigStore;
use plexcrypt_dpm::{connect_uds, UDS_CONNECT_TIMEOUT};
use plexcrypt_metrics::MetricsCollector;
use plexcrypt_proto::podresources::v1::{ListPodResourcesRequest, ListPodResourcesResponse};
use plexcrypt_proto::PodResourcesListerClient;
use plexcrypt_shadowsysfs::ShadowSysfs;
use plexcrypt_zcrypt::ZcryptNodes;

use crate::error::{PodListerError, PodListerResult};

/// Liveness stamps of one discovered node or shadow tree.
#[derive(Debug, Clone, Copy)]
struct ResourceStamp {
    first_seen: Instant,
    /// set on every tick a container is seen using the resource
    last_used: Option<Instant>,
}

/// Watches pod resources and reclaims idle host resources.
pub struct PodLister {
    socket: PathBuf,
    resource_namespace: String,
    machineid: String,
    poll_interval: Duration,
    delete_never_used: Duration,
    delete_unused: Duration,
    store: Arc<ConfigStore>,
    znodes: ZcryptNodes,
    shadow: ShadowSysfs,
    metrics: Arc<MetricsCollector>,
    client: Mutex<Option<PodResourcesListerClient<Channel>>>,
    zcryptnodemap: Mutex<HashMap<String, ResourceStamp>>,
    sysfsshadowmap: Mutex<HashMap<String, ResourceStamp>>,
}

impl PodLister {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: impl Into<PathBuf>,
        resource_namespace: impl Into<String>,
        machineid: impl Into<String>,
        poll_interval: Duration,
        delete_never_used: Duration,
        delete_unused: Duration,
        store: Arc<ConfigStore>,
        znodes: ZcryptNodes,
        shadow: ShadowSysfs,
        metrics: Arc<MetricsCollector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket: socket.into(),
            resource_namespace: resource_namespace.into(),
            machineid: machineid.into(),
            poll_interval,
            delete_never_used,
            delete_unused,
            store,
            znodes,
            shadow,
            metrics,
            client: Mutex::new(None),
            zcryptnodemap: Mutex::new(HashMap::new()),
            sysfsshadowmap: Mutex::new(HashMap::new()),
        })
    }

    /// (Re)connect the pod-resources client.
    pub async fn connect(&self) -> PodListerResult<()> {
        let channel = connect_uds(&self.socket, UDS_CONNECT_TIMEOUT)
            .await
            .map_err(|e| PodListerError::Connect {
                socket: self.socket.display().to_string(),
                source: Box::new(e),
            })?;
        *self.client.lock().await = Some(PodResourcesListerClient::new(channel));
        Ok(())
    }

    /// Connect and spawn the polling loop. Fails when the kubelet socket is
    /// not reachable at all.
    pub async fn start(self: &Arc<Self>) -> PodListerResult<PodListerHandle> {
        info!("PodLister: Start()");
        self.connect().await?;

        let pl = Arc::clone(self);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(pl.poll_interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = tick.tick() => {
                        if let Err(e) = pl.poll_once().await {
                            warn!("PodLister: {}; reconnecting", e);
                            let _ = pl.connect().await;
                        }
                    }
                }
            }
        });
        Ok(PodListerHandle {
            stop: stop_tx,
            handle,
        })
    }

    /// One full tick: discover, cross-reference with pod state, reclaim.
    pub async fn poll_once(&self) -> PodListerResult<()> {
        self.refresh_discovered().await;

        let resp = self.list_pod_resources().await?;
        self.process_pod_resources(&resp).await;

        self.reap_expired().await;
        Ok(())
    }

    async fn list_pod_resources(&self) -> PodListerResult<ListPodResourcesResponse> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(PodListerError::NotConnected)?;
        let resp = client
            .list(ListPodResourcesRequest {})
            .await
            .map_err(|e| {
                // a dead connection is dropped; the caller reconnects
                PodListerError::Rpc(e)
            })?;
        Ok(resp.into_inner())
    }

    /// Pick up nodes and shadow dirs that appeared on the host.
    async fn refresh_discovered(&self) {
        if let Ok(nodes) = self.znodes.fetch_active_nodes() {
            info!("PodLister: {} active zcrypt nodes", nodes.len());
            let mut map = self.zcryptnodemap.lock().await;
            for zn in nodes {
                map.entry(zn.clone()).or_insert_with(|| {
                    info!(
                        "PodLister: first time seen zcryptnode '{}' added to zcryptnodemap",
                        zn
                    );
                    ResourceStamp {
                        first_seen: Instant::now(),
                        last_used: None,
                    }
                });
            }
        }
        if let Ok(shadows) = self.shadow.fetch_active_shadows() {
            info!("PodLister: {} active sysfs shadow dirs", shadows.len());
            let mut map = self.sysfsshadowmap.lock().await;
            for sn in shadows {
                map.entry(sn.clone()).or_insert_with(|| {
                    info!(
                        "PodLister: first time seen sysfsshadow '{}' added to sysfsshadowmap",
                        sn
                    );
                    ResourceStamp {
                        first_seen: Instant::now(),
                        last_used: None,
                    }
                });
            }
        }
    }

    /// Walk all pods/containers/devices and refresh the liveness stamps of
    /// every device in our namespace.
    async fn process_pod_resources(&self, resp: &ListPodResourcesResponse) {
        let prefix = format!("{}/", self.resource_namespace);
        let mut containers_with_devs = 0;

        for pod in &resp.pod_resources {
            for container in &pod.containers {
                for dev in &container.devices {
                    if !dev.resource_name.starts_with(&prefix) {
                        continue;
                    }
                    for id in &dev.device_ids {
                        if !id.starts_with(APQN_DEVICE_ID_PREFIX) {
                            continue;
                        }
                        let Some((card, queue, _)) = parse_apqn_device_id(id) else {
                            warn!("PodLister: Error parsing device id '{}'", id);
                            continue;
                        };

                        match self
                            .store
                            .set_for_apqn(card as i32, queue as i32, &self.machineid)
                            .await
                        {
                            None => warn!(
                                "PodLister: config set for APQN({},{}) not found",
                                card, queue
                            ),
                            Some(ccset) => {
                                if pod.namespace != ccset.project {
                                    warn!(
                                        "PodLister: Container '{}' in namespace '{}' uses CEX resource '{}' marked for project '{}'!!!",
                                        container.name, pod.namespace, id, ccset.project
                                    );
                                } else {
                                    info!(
                                        "PodLister: Container '{}' in namespace {} uses CEX resource '{}'",
                                        container.name, pod.namespace, id
                                    );
                                }
                                self.metrics
                                    .notify_container_seen(&ccset.setname, id)
                                    .await;
                            }
                        }

                        containers_with_devs += 1;
                        let now = Instant::now();
                        let znname = format!("zcrypt-{}", id);
                        match self.zcryptnodemap.lock().await.get_mut(&znname) {
                            Some(stamp) => stamp.last_used = Some(now),
                            None => warn!(
                                "PodLister: zcryptnode '{}' not found in zcryptnodemap !!!",
                                znname
                            ),
                        }
                        let snname = format!("sysfs-{}", id);
                        match self.sysfsshadowmap.lock().await.get_mut(&snname) {
                            Some(stamp) => stamp.last_used = Some(now),
                            None => warn!(
                                "PodLister: sysfs shadow '{}' not found in sysfs shadowmap !!!",
                                snname
                            ),
                        }
                    }
                }
            }
        }

        info!(
            "PodLister: {} active containers with allocated cex devices",
            containers_with_devs
        );
    }

    fn expired(&self, stamp: &ResourceStamp, now: Instant) -> bool {
        match stamp.last_used {
            None => now.duration_since(stamp.first_seen) > self.delete_never_used,
            Some(last) => now.duration_since(last) > self.delete_unused,
        }
    }

    /// Delete nodes and shadow trees whose stamps ran out.
    async fn reap_expired(&self) {
        let now = Instant::now();

        let expired_nodes: Vec<String> = {
            let map = self.zcryptnodemap.lock().await;
            map.iter()
                .filter(|(_, stamp)| self.expired(stamp, now))
                .map(|(name, _)| name.clone())
                .collect()
        };
        for zk in expired_nodes {
            info!("PodLister: deleting zcrypt node '{}': unused", zk);
            if let Some(dev) = zk.strip_prefix("zcrypt-") {
                self.metrics.notify_destroy_node(dev).await;
            }
            if let Err(e) = self.znodes.destroy_node(&zk) {
                warn!("PodLister: destroying zcrypt node '{}' failed: {}", zk, e);
            }
            self.zcryptnodemap.lock().await.remove(&zk);
        }

        let expired_shadows: Vec<String> = {
            let map = self.sysfsshadowmap.lock().await;
            map.iter()
                .filter(|(_, stamp)| self.expired(stamp, now))
                .map(|(name, _)| name.clone())
                .collect()
        };
        for sk in expired_shadows {
            info!("PodLister: deleting shadow sysfs '{}': unused", sk);
            self.shadow.delete_shadow(&sk);
            self.sysfsshadowmap.lock().await.remove(&sk);
        }
    }
}

/// Stop handle of the pod lister task.
pub struct PodListerHandle {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl PodListerHandle {
    pub async fn stop(self) {
        info!("PodLister: Stop()");
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcrypt_ap::ApScanner;
    use plexcrypt_proto::podresources::v1::{
        ContainerDevices, ContainerResources, PodResources,
    };
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const NS: &str = "cex.s390.ibm.com";

    struct Fixture {
        _tmp: TempDir,
        root: std::path::PathBuf,
        pl: Arc<PodLister>,
    }

    async fn fixture(never_used_ms: u64, unused_ms: u64) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();

        let classdir = root.join("class/zcrypt");
        let vdevdir = root.join("vdev");
        let devdir = root.join("dev");
        fs::create_dir_all(&classdir).unwrap();
        fs::create_dir_all(&vdevdir).unwrap();
        fs::create_dir_all(&devdir).unwrap();
        fs::write(classdir.join("create"), "").unwrap();
        fs::write(classdir.join("destroy"), "").unwrap();

        let basedir = root.join("shadowbase");
        fs::create_dir_all(&basedir).unwrap();

        let config_path = root.join("cex_resources.json");
        fs::write(
            &config_path,
            r#"{ "cryptoconfigsets": [
                { "setname": "s1", "project": "proj-a", "apqns": [ {"adapter":7,"domain":8} ] }
            ]}"#,
        )
        .unwrap();
        let store = ConfigStore::new(&config_path);
        store.load_initial().await.unwrap();

        let busdir = root.join("bus");
        let devsdir = root.join("devs");
        fs::create_dir_all(&busdir).unwrap();
        fs::create_dir_all(&devsdir).unwrap();
        let scanner = ApScanner::new(&busdir, &devsdir);
        let znodes = ZcryptNodes::new(&classdir, &vdevdir, &devdir);
        let shadow = ShadowSysfs::new(&basedir, &busdir, &devsdir);
        let metrics = MetricsCollector::new(
            "node-1",
            "127.0.0.1:1",
            Duration::from_secs(15),
            Duration::from_secs(30),
            scanner,
        );

        let pl = PodLister::new(
            root.join("pod-resources.sock"),
            NS,
            "machine-a",
            Duration::from_secs(30),
            Duration::from_millis(never_used_ms),
            Duration::from_millis(unused_ms),
            store,
            znodes,
            shadow,
            metrics,
        );

        Fixture {
            _tmp: tmp,
            root,
            pl,
        }
    }

    fn make_node(root: &Path, name: &str) {
        fs::create_dir_all(root.join("vdev").join(name)).unwrap();
    }

    fn make_shadow(root: &Path, name: &str) {
        fs::create_dir_all(root.join("shadowbase").join(name)).unwrap();
    }

    fn pod_response(namespace: &str, resource: &str, id: &str) -> ListPodResourcesResponse {
        ListPodResourcesResponse {
            pod_resources: vec![PodResources {
                name: "pod-1".to_string(),
                namespace: namespace.to_string(),
                containers: vec![ContainerResources {
                    name: "c-1".to_string(),
                    devices: vec![ContainerDevices {
                        resource_name: resource.to_string(),
                        device_ids: vec![id.to_string()],
                        topology: None,
                    }],
                }],
            }],
        }
    }

    #[tokio::test]
    async fn test_never_used_resources_are_reaped() {
        let fx = fixture(20, 1_000_000).await;
        make_node(&fx.root, "zcrypt-apqn-7-8-0");
        make_shadow(&fx.root, "sysfs-apqn-7-8-0");

        fx.pl.refresh_discovered().await;
        assert_eq!(fx.pl.zcryptnodemap.lock().await.len(), 1);
        assert_eq!(fx.pl.sysfsshadowmap.lock().await.len(), 1);

        // nothing uses them; after the never-used timeout both go away
        tokio::time::sleep(Duration::from_millis(40)).await;
        fx.pl.reap_expired().await;

        assert_eq!(
            fs::read_to_string(fx.root.join("class/zcrypt/destroy")).unwrap(),
            "zcrypt-apqn-7-8-0"
        );
        assert!(!fx.root.join("shadowbase/sysfs-apqn-7-8-0").exists());
        assert!(fx.pl.zcryptnodemap.lock().await.is_empty());
        assert!(fx.pl.sysfsshadowmap.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_resource_in_use_survives() {
        let fx = fixture(20, 1_000_000).await;
        make_node(&fx.root, "zcrypt-apqn-7-8-0");
        make_shadow(&fx.root, "sysfs-apqn-7-8-0");
        fx.pl.refresh_discovered().await;

        // a container uses the device; the stamps refresh
        let resp = pod_response("proj-a", &format!("{}/s1", NS), "apqn-7-8-0");
        fx.pl.process_pod_resources(&resp).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        fx.pl.reap_expired().await;

        // still there: last_used is recent, the never-used rule no longer
        // applies
        assert!(fx.pl.zcryptnodemap.lock().await.contains_key("zcrypt-apqn-7-8-0"));
        assert_eq!(
            fs::read_to_string(fx.root.join("class/zcrypt/destroy")).unwrap(),
            ""
        );
    }

    #[tokio::test]
    async fn test_idle_after_use_is_reaped() {
        let fx = fixture(1_000_000, 20).await;
        make_node(&fx.root, "zcrypt-apqn-7-8-0");
        make_shadow(&fx.root, "sysfs-apqn-7-8-0");
        fx.pl.refresh_discovered().await;
        let resp = pod_response("proj-a", &format!("{}/s1", NS), "apqn-7-8-0");
        fx.pl.process_pod_resources(&resp).await;

        // the container went away; after the after-use timeout both go away
        tokio::time::sleep(Duration::from_millis(40)).await;
        fx.pl.reap_expired().await;
        assert!(fx.pl.zcryptnodemap.lock().await.is_empty());
        assert!(!fx.root.join("shadowbase/sysfs-apqn-7-8-0").exists());
    }

    #[tokio::test]
    async fn test_cross_namespace_use_still_counts() {
        let fx = fixture(20, 1_000_000).await;
        make_node(&fx.root, "zcrypt-apqn-7-8-0");
        fx.pl.refresh_discovered().await;

        // wrong namespace: logged, but the liveness stamp refreshes anyway
        let resp = pod_response("intruder-ns", &format!("{}/s1", NS), "apqn-7-8-0");
        fx.pl.process_pod_resources(&resp).await;

        let map = fx.pl.zcryptnodemap.lock().await;
        assert!(map.get("zcrypt-apqn-7-8-0").unwrap().last_used.is_some());
    }

    #[tokio::test]
    async fn test_foreign_resources_are_ignored() {
        let fx = fixture(20, 1_000_000).await;
        make_node(&fx.root, "zcrypt-apqn-7-8-0");
        fx.pl.refresh_discovered().await;

        let resp = pod_response("proj-a", "vendor.example.com/other", "apqn-7-8-0");
        fx.pl.process_pod_resources(&resp).await;
        let map = fx.pl.zcryptnodemap.lock().await;
        assert!(map.get("zcrypt-apqn-7-8-0").unwrap().last_used.is_none());
    }
}
