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

//! Pod lister against a fake pod-resources endpoint

use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use plexcrypt_ap::ApScanner;
use plexcrypt_config::ConfigStore;
use plexcrypt_metrics::MetricsCollector;
use plexcrypt_podlister::PodLister;
use plexcrypt_proto::podresources::v1::{
    ContainerDevices, ContainerResources, ListPodResourcesRequest, ListPodResourcesResponse,
    PodResources,
};
use plexcrypt_proto::{PodResourcesLister, PodResourcesListerServer};
use plexcrypt_shadowsysfs::ShadowSysfs;
use plexcrypt_zcrypt::ZcryptNodes;

struct FakePodResources {
    response: ListPodResourcesResponse,
}

#[async_trait]
impl PodResourcesLister for FakePodResources {
    async fn list(
        &self,
        _request: Request<ListPodResourcesRequest>,
    ) -> Result<Response<ListPodResourcesResponse>, Status> {
        Ok(Response::new(self.response.clone()))
    }
}

#[tokio::test]
async fn test_poll_once_over_grpc_refreshes_and_reaps() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    // host fixtures: one node in use, one shadow nobody ever used
    for d in ["class/zcrypt", "vdev", "dev", "shadowbase", "bus", "devs"] {
        fs::create_dir_all(root.join(d)).unwrap();
    }
    fs::write(root.join("class/zcrypt/create"), "").unwrap();
    fs::write(root.join("class/zcrypt/destroy"), "").unwrap();
    fs::create_dir_all(root.join("vdev/zcrypt-apqn-7-8-0")).unwrap();
    fs::create_dir_all(root.join("shadowbase/sysfs-apqn-7-8-0")).unwrap();
    // this one never shows up in any pod
    fs::create_dir_all(root.join("shadowbase/sysfs-apqn-9-9-0")).unwrap();

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

    // fake kubelet pod-resources endpoint over a unix socket
    let socket = root.join("pod-resources.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let response = ListPodResourcesResponse {
        pod_resources: vec![PodResources {
            name: "pod-1".to_string(),
            namespace: "proj-a".to_string(),
            containers: vec![ContainerResources {
                name: "c-1".to_string(),
                devices: vec![ContainerDevices {
                    resource_name: "cex.s390.ibm.com/s1".to_string(),
                    device_ids: vec!["apqn-7-8-0".to_string()],
                    topology: None,
                }],
            }],
        }],
    };
    let server = tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop_rx.changed().await;
        };
        Server::builder()
            .add_service(PodResourcesListerServer::new(FakePodResources { response }))
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
            .await
            .unwrap();
    });

    let scanner = ApScanner::new(root.join("bus"), root.join("devs"));
    let metrics = MetricsCollector::new(
        "node-1",
        "127.0.0.1:1",
        Duration::from_secs(15),
        Duration::from_secs(30),
        scanner,
    );
    let pl = PodLister::new(
        &socket,
        "cex.s390.ibm.com",
        "machine-a",
        Duration::from_secs(30),
        Duration::from_millis(1), // never-used resources expire immediately
        Duration::from_secs(3600),
        store,
        ZcryptNodes::new(root.join("class/zcrypt"), root.join("vdev"), root.join("dev")),
        ShadowSysfs::new(root.join("shadowbase"), root.join("bus"), root.join("devs")),
        metrics,
    );
    pl.connect().await.unwrap();

    // first poll: both resources get discovered, the node in use gets its
    // stamp refreshed, the never-used shadow expires on a later poll
    pl.poll_once().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    pl.poll_once().await.unwrap();

    // the resources in use survived, the never-adopted shadow did not
    assert_eq!(
        fs::read_to_string(root.join("class/zcrypt/destroy")).unwrap(),
        ""
    );
    assert!(root.join("shadowbase/sysfs-apqn-7-8-0").exists());
    assert!(!root.join("shadowbase/sysfs-apqn-9-9-0").exists());

    stop_tx.send(true).unwrap();
    server.await.unwrap();
}
