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

//! Manager lifecycle against a fake kubelet

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{ReceiverStream, UnixListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use plexcrypt_dpm::{connect_uds, DevicePluginImpl, Manager, PluginLister, UDS_CONNECT_TIMEOUT};
use plexcrypt_proto::deviceplugin::v1beta1::{
    AllocateRequest, AllocateResponse, Device, DevicePluginOptions, Empty, ListAndWatchResponse,
    PreStartContainerRequest, PreStartContainerResponse, PreferredAllocationRequest,
    PreferredAllocationResponse, RegisterRequest,
};
use plexcrypt_proto::{
    DevicePlugin, DevicePluginClient, Registration, RegistrationServer,
};

struct FakePlugin {
    resource: String,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl DevicePlugin for FakePlugin {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<DevicePluginOptions>, Status> {
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
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(Ok(ListAndWatchResponse {
                devices: vec![Device {
                    id: format!("{}-dev-0", self.resource),
                    health: plexcrypt_proto::deviceplugin::v1beta1::HEALTHY.to_string(),
                    topology: None,
                }],
            }))
            .await;
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
        _request: Request<AllocateRequest>,
    ) -> Result<Response<AllocateResponse>, Status> {
        Ok(Response::new(AllocateResponse::default()))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> Result<Response<PreStartContainerResponse>, Status> {
        Err(Status::unimplemented("PreStartContainer() not implemented"))
    }
}

#[async_trait]
impl DevicePluginImpl for FakePlugin {
    async fn start(&self) -> Result<(), String> {
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct FakeLister {
    names: Vec<String>,
    stopped_flag: Arc<AtomicBool>,
}

#[async_trait]
impl PluginLister for FakeLister {
    type Plugin = FakePlugin;

    fn resource_namespace(&self) -> String {
        "fake.example.com".to_string()
    }

    async fn discover(
        &self,
        names_tx: mpsc::Sender<Vec<String>>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let _ = names_tx.send(self.names.clone()).await;
        let _ = stop_rx.changed().await;
    }

    async fn new_plugin(&self, resource: &str) -> FakePlugin {
        FakePlugin {
            resource: resource.to_string(),
            stopped: Arc::clone(&self.stopped_flag),
        }
    }
}

struct FakeKubelet {
    seen: mpsc::Sender<RegisterRequest>,
}

#[async_trait]
impl Registration for FakeKubelet {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<Empty>, Status> {
        let _ = self.seen.send(request.into_inner()).await;
        Ok(Response::new(Empty {}))
    }
}

#[tokio::test]
async fn test_manager_serves_and_registers_plugin() {
    let tmp = tempfile::TempDir::new().unwrap();
    let kubelet_dir = tmp.path().to_path_buf();

    // fake kubelet registration endpoint
    let (seen_tx, mut seen_rx) = mpsc::channel(4);
    let kubelet_listener = UnixListener::bind(kubelet_dir.join("kubelet.sock")).unwrap();
    let (kubelet_stop_tx, mut kubelet_stop_rx) = watch::channel(false);
    let kubelet = tokio::spawn(async move {
        let shutdown = async move {
            let _ = kubelet_stop_rx.changed().await;
        };
        Server::builder()
            .add_service(RegistrationServer::new(FakeKubelet { seen: seen_tx }))
            .serve_with_incoming_shutdown(UnixListenerStream::new(kubelet_listener), shutdown)
            .await
            .unwrap();
    });

    let stopped_flag = Arc::new(AtomicBool::new(false));
    let lister = FakeLister {
        names: vec!["r1".to_string()],
        stopped_flag: Arc::clone(&stopped_flag),
    };
    let manager = Manager::new(lister).with_kubelet_dir(&kubelet_dir);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(async move { manager.run(shutdown_rx).await });

    // the manager must register the resource with the fake kubelet
    let reg = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("no registration within timeout")
        .unwrap();
    assert_eq!(reg.version, "v1beta1");
    assert_eq!(reg.resource_name, "fake.example.com/r1");
    assert_eq!(reg.endpoint, "cex-r1.sock");

    // and serve the device plugin API on the announced socket
    let channel = connect_uds(kubelet_dir.join("cex-r1.sock"), UDS_CONNECT_TIMEOUT)
        .await
        .unwrap();
    let mut client = DevicePluginClient::new(channel);
    let opts = client
        .get_device_plugin_options(Empty {})
        .await
        .unwrap()
        .into_inner();
    assert!(!opts.pre_start_required);

    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .unwrap()
        .into_inner();
    let first = stream.message().await.unwrap().unwrap();
    assert_eq!(first.devices.len(), 1);
    assert_eq!(first.devices[0].id, "r1-dev-0");

    // orderly shutdown removes the socket and stops the plugin
    shutdown_tx.send(true).unwrap();
    run.await.unwrap().unwrap();
    assert!(stopped_flag.load(Ordering::SeqCst));
    assert!(!kubelet_dir.join("cex-r1.sock").exists());

    kubelet_stop_tx.send(true).unwrap();
    kubelet.await.unwrap();
}
