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

//! Metrics table and push loop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use plexcrypt_ap::{parse_apqn_device_id, ApScanner, Apqn};

use crate::error::{MetricsError, MetricsResult};

/// Connect, read and write timeout for the collector TCP connection.
const CON_TCP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct PluginDevEntry {
    in_use: bool,
    /// time of the last running-container notification
    last_seen: Option<Instant>,
}

#[derive(Debug, Default)]
struct ApqnEntry {
    start_request_count: u64,
    current_request_count: u64,
}

#[derive(Debug, Default)]
struct CsetEntry {
    plugindevs: HashMap<String, PluginDevEntry>,
    /// key is `256 * adapter + domain`
    apqns: HashMap<u32, ApqnEntry>,
}

/// Per config set metrics data sent to the collector.
#[derive(Debug, Serialize)]
struct CsetExportData {
    #[serde(rename = "Setname")]
    setname: String,
    #[serde(rename = "Total_plugindevs")]
    total_plugindevs: u64,
    #[serde(rename = "Used_plugindevs")]
    used_plugindevs: u64,
    #[serde(rename = "Request_counter")]
    request_counter: u64,
}

/// Top-level payload sent to the collector, one JSON object per connection.
#[derive(Debug, Serialize)]
struct ExportData {
    #[serde(rename = "Nodename")]
    nodename: String,
    #[serde(rename = "Total_plugindevs")]
    total_plugindevs: u64,
    #[serde(rename = "Used_plugindevs")]
    used_plugindevs: u64,
    #[serde(rename = "Request_counter")]
    request_counter: u64,
    #[serde(rename = "Csets")]
    csets: Vec<CsetExportData>,
}

/// Fan-in point for usage events plus the periodic exporter push.
pub struct MetricsCollector {
    nodename: String,
    collector_addr: String,
    poll_interval: Duration,
    /// a device with no container sighting for this long is not in use
    in_use_expiry: Duration,
    scanner: ApScanner,
    csets: Mutex<HashMap<String, CsetEntry>>,
}

impl MetricsCollector {
    pub fn new(
        nodename: impl Into<String>,
        collector_addr: impl Into<String>,
        poll_interval: Duration,
        podlister_poll_interval: Duration,
        scanner: ApScanner,
    ) -> Arc<Self> {
        Arc::new(Self {
            nodename: nodename.into(),
            collector_addr: collector_addr.into(),
            poll_interval,
            in_use_expiry: 2 * podlister_poll_interval,
            scanner,
            csets: Mutex::new(HashMap::new()),
        })
    }

    /// A set-plugin announced its (changed) list of eligible APQNs.
    pub async fn notify_apqns(&self, setname: &str, apqns: &[Apqn]) {
        debug!("APQNs notify, setname={} ({} APQNs)", setname, apqns.len());

        // baseline counters are read outside of the table lock
        let mut baselines = HashMap::new();
        for a in apqns {
            let count = self
                .scanner
                .queue_request_counter(a.adapter, a.domain)
                .unwrap_or(0);
            baselines.insert(256 * a.adapter as u32 + a.domain as u32, count);
        }

        let mut csets = self.csets.lock().await;
        let cse = csets.entry(setname.to_string()).or_default();
        cse.apqns
            .retain(|k, _| baselines.contains_key(k));
        for (k, count) in baselines {
            cse.apqns.entry(k).or_insert_with(|| ApqnEntry {
                start_request_count: count,
                current_request_count: count,
            });
        }
    }

    /// A set-plugin announced its (changed) list of healthy plugin devices.
    pub async fn notify_plugin_devs(&self, setname: &str, devs: &[String]) {
        debug!(
            "PluginDevs notify, setname={} devs={:?}",
            setname, devs
        );

        let mut csets = self.csets.lock().await;
        let cse = csets.entry(setname.to_string()).or_default();
        cse.plugindevs.retain(|k, _| devs.contains(k));
        for d in devs {
            cse.plugindevs.entry(d.clone()).or_default();
        }
    }

    /// A device was just handed to a container via Allocate.
    pub async fn notify_alloc(&self, setname: &str, dev: &str) {
        info!("Alloc notify, setname={} dev={}", setname, dev);
        self.mark_in_use(setname, dev).await;
    }

    /// The pod scanner saw a running container using this device.
    pub async fn notify_container_seen(&self, setname: &str, dev: &str) {
        debug!("Container running notify, setname={} dev={}", setname, dev);
        self.mark_in_use(setname, dev).await;
    }

    async fn mark_in_use(&self, setname: &str, dev: &str) {
        if parse_apqn_device_id(dev).is_none() {
            warn!("Error parsing plugin device '{}'", dev);
            return;
        }
        let mut csets = self.csets.lock().await;
        let Some(cse) = csets.get_mut(setname) else {
            warn!(
                "Usage notify for setname={} but no set data entry found",
                setname
            );
            return;
        };
        let Some(pde) = cse.plugindevs.get_mut(dev) else {
            warn!(
                "Usage notify for setname={} with unknown dev={}",
                setname, dev
            );
            return;
        };
        pde.in_use = true;
        pde.last_seen = Some(Instant::now());
    }

    /// The garbage collector destroyed the zcrypt node of this device.
    pub async fn notify_destroy_node(&self, dev: &str) {
        info!("DestroyNode notify, dev={}", dev);
        let mut csets = self.csets.lock().await;
        for cse in csets.values_mut() {
            if let Some(pde) = cse.plugindevs.get_mut(dev) {
                pde.in_use = false;
                break;
            }
        }
    }

    /// Start the periodic push loop; the handle stops it again.
    pub fn start(self: &Arc<Self>) -> MetricsHandle {
        let mc = Arc::clone(self);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(mc.poll_interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = tick.tick() => mc.push_once().await,
                }
            }
        });
        MetricsHandle {
            stop: stop_tx,
            handle,
        }
    }

    async fn push_once(&self) {
        let senddata = self.prepare_export_data().await;
        match self.send_to_collector(&senddata).await {
            Ok(bytes) => {
                info!(
                    "{} bytes metrics data pushed to the exporter collector",
                    bytes
                );
            }
            Err(e) => warn!("Metrics push failed: {}", e),
        }
    }

    /// Expire stale in_use flags, refresh request counters, accumulate.
    async fn prepare_export_data(&self) -> ExportData {
        // which counters to read is decided under the lock, the sysfs reads
        // happen outside of it
        let keys: Vec<u32> = {
            let csets = self.csets.lock().await;
            csets
                .values()
                .flat_map(|cse| cse.apqns.keys().copied())
                .collect()
        };
        let mut counters = HashMap::new();
        for k in keys {
            let (ap, dom) = ((k / 256) as u16, (k % 256) as u16);
            counters.insert(k, self.scanner.queue_request_counter(ap, dom).unwrap_or(0));
        }

        let mut csets = self.csets.lock().await;
        let now = Instant::now();
        let mut data = ExportData {
            nodename: self.nodename.clone(),
            total_plugindevs: 0,
            used_plugindevs: 0,
            request_counter: 0,
            csets: Vec::new(),
        };
        for (sn, cse) in csets.iter_mut() {
            for pde in cse.plugindevs.values_mut() {
                if pde.in_use {
                    let expired = pde
                        .last_seen
                        .map(|t| now.duration_since(t) > self.in_use_expiry)
                        .unwrap_or(true);
                    if expired {
                        pde.in_use = false;
                    }
                }
            }
            for (k, ae) in cse.apqns.iter_mut() {
                if let Some(current) = counters.get(k) {
                    ae.current_request_count = *current;
                    if ae.start_request_count == 0 {
                        ae.start_request_count = *current;
                    }
                }
            }

            let cspe = CsetExportData {
                setname: sn.clone(),
                total_plugindevs: cse.plugindevs.len() as u64,
                used_plugindevs: cse
                    .plugindevs
                    .values()
                    .filter(|p| p.in_use)
                    .count() as u64,
                request_counter: cse
                    .apqns
                    .values()
                    .map(|ae| ae.current_request_count.saturating_sub(ae.start_request_count))
                    .sum(),
            };
            data.total_plugindevs += cspe.total_plugindevs;
            data.used_plugindevs += cspe.used_plugindevs;
            data.request_counter += cspe.request_counter;
            data.csets.push(cspe);
        }
        data
    }

    /// One JSON object per connection, acknowledged with an `ok` line.
    async fn send_to_collector(&self, senddata: &ExportData) -> MetricsResult<usize> {
        let data = serde_json::to_vec(senddata)?;

        let mut con = tokio::time::timeout(
            CON_TCP_TIMEOUT,
            TcpStream::connect(&self.collector_addr),
        )
        .await
        .map_err(|_| MetricsError::Connect {
            addr: self.collector_addr.clone(),
            reason: "connect timeout".to_string(),
        })?
        .map_err(|e| MetricsError::Connect {
            addr: self.collector_addr.clone(),
            reason: e.to_string(),
        })?;

        tokio::time::timeout(CON_TCP_TIMEOUT, con.write_all(&data))
            .await
            .map_err(|_| MetricsError::Connect {
                addr: self.collector_addr.clone(),
                reason: "write timeout".to_string(),
            })??;

        let mut buf = [0u8; 1024];
        let n = tokio::time::timeout(CON_TCP_TIMEOUT, con.read(&mut buf))
            .await
            .map_err(|_| MetricsError::Connect {
                addr: self.collector_addr.clone(),
                reason: "read timeout".to_string(),
            })??;
        let reply = &buf[..n];
        let line = match reply.iter().position(|&b| b == b'\n') {
            Some(i) => String::from_utf8_lossy(&reply[..i]).trim().to_string(),
            None => return Err(MetricsError::BadReply(String::from_utf8_lossy(reply).into())),
        };
        if line != "ok" {
            return Err(MetricsError::BadReply(line));
        }

        Ok(data.len())
    }
}

/// Stop handle of the metrics push task.
pub struct MetricsHandle {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcrypt_ap::CexMode;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn apqn(adapter: u16, domain: u16) -> Apqn {
        Apqn {
            adapter,
            domain,
            gen: "cex7".to_string(),
            mode: CexMode::Ep11,
            online: true,
        }
    }

    /// Scanner over a fixture with one queue carrying a request counter.
    fn fixture_scanner(tmp: &TempDir, adapter: u16, domain: u16, count: u64) -> ApScanner {
        let bus = tmp.path().join("bus/ap");
        let devs = tmp.path().join("devices/ap");
        let queue = devs
            .join(format!("card{:02x}", adapter))
            .join(format!("{:02x}.{:04x}", adapter, domain));
        fs::create_dir_all(&bus).unwrap();
        fs::create_dir_all(&queue).unwrap();
        fs::write(
            devs.join(format!("card{:02x}", adapter)).join("type"),
            "CEX7P\n",
        )
        .unwrap();
        fs::write(queue.join("online"), "1\n").unwrap();
        fs::write(queue.join("request_count"), format!("{}\n", count)).unwrap();
        ApScanner::new(bus, devs)
    }

    fn collector(scanner: ApScanner) -> Arc<MetricsCollector> {
        MetricsCollector::new(
            "node-1",
            "127.0.0.1:1", // never dialed in table tests
            Duration::from_secs(15),
            Duration::from_secs(30),
            scanner,
        )
    }

    #[tokio::test]
    async fn test_alloc_marks_device_in_use() {
        let tmp = TempDir::new().unwrap();
        let mc = collector(fixture_scanner(&tmp, 1, 2, 100));
        mc.notify_apqns("s1", &[apqn(1, 2)]).await;
        mc.notify_plugin_devs("s1", &["apqn-1-2-0".to_string()])
            .await;
        mc.notify_alloc("s1", "apqn-1-2-0").await;

        let data = mc.prepare_export_data().await;
        assert_eq!(data.nodename, "node-1");
        assert_eq!(data.total_plugindevs, 1);
        assert_eq!(data.used_plugindevs, 1);
        assert_eq!(data.csets.len(), 1);
        assert_eq!(data.csets[0].setname, "s1");
    }

    #[tokio::test]
    async fn test_destroy_returns_device_to_unused() {
        let tmp = TempDir::new().unwrap();
        let mc = collector(fixture_scanner(&tmp, 1, 2, 100));
        mc.notify_apqns("s1", &[apqn(1, 2)]).await;
        mc.notify_plugin_devs("s1", &["apqn-1-2-0".to_string()])
            .await;
        mc.notify_container_seen("s1", "apqn-1-2-0").await;
        mc.notify_destroy_node("apqn-1-2-0").await;

        let data = mc.prepare_export_data().await;
        assert_eq!(data.used_plugindevs, 0);
    }

    #[tokio::test]
    async fn test_stale_sighting_expires() {
        let tmp = TempDir::new().unwrap();
        let scanner = fixture_scanner(&tmp, 1, 2, 100);
        let mc = MetricsCollector::new(
            "node-1",
            "127.0.0.1:1",
            Duration::from_secs(15),
            Duration::from_millis(1), // expiry = 2ms
            scanner,
        );
        mc.notify_apqns("s1", &[apqn(1, 2)]).await;
        mc.notify_plugin_devs("s1", &["apqn-1-2-0".to_string()])
            .await;
        mc.notify_container_seen("s1", "apqn-1-2-0").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let data = mc.prepare_export_data().await;
        assert_eq!(data.used_plugindevs, 0);
    }

    #[tokio::test]
    async fn test_request_counter_delta() {
        let tmp = TempDir::new().unwrap();
        let mc = collector(fixture_scanner(&tmp, 1, 2, 100));
        mc.notify_apqns("s1", &[apqn(1, 2)]).await;
        // the queue did some work since the baseline was taken
        fs::write(
            tmp.path().join("devices/ap/card01/01.0002/request_count"),
            "150\n",
        )
        .unwrap();

        let data = mc.prepare_export_data().await;
        assert_eq!(data.csets[0].request_counter, 50);
        assert_eq!(data.request_counter, 50);
    }

    #[tokio::test]
    async fn test_notify_for_unknown_device_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let mc = collector(fixture_scanner(&tmp, 1, 2, 0));
        // no apqns/devices announced yet
        mc.notify_alloc("s1", "apqn-1-2-0").await;
        mc.notify_alloc("s1", "junk-id").await;
        let data = mc.prepare_export_data().await;
        assert!(data.csets.is_empty());
    }

    #[tokio::test]
    async fn test_push_requires_ok_reply() {
        let tmp = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let scanner = fixture_scanner(&tmp, 1, 2, 0);
        let mc = MetricsCollector::new(
            "node-1",
            addr.to_string(),
            Duration::from_secs(15),
            Duration::from_secs(30),
            scanner,
        );

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let payload: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
            assert_eq!(payload["Nodename"], "node-1");
            sock.write_all(b"ok\n").await.unwrap();
        });

        let data = mc.prepare_export_data().await;
        assert!(mc.send_to_collector(&data).await.is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_push_rejects_bad_reply() {
        let tmp = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mc = MetricsCollector::new(
            "node-1",
            addr.to_string(),
            Duration::from_secs(15),
            Duration::from_secs(30),
            fixture_scanner(&tmp, 1, 2, 0),
        );

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"nope\n").await.unwrap();
        });

        let data = mc.prepare_export_data().await;
        assert!(matches!(
            mc.send_to_collector(&data).await,
            Err(MetricsError::BadReply(_))
        ));
    }
}
