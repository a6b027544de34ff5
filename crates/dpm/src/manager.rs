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

//! # Device Plugin Manager
//!
//! ## Purpose
//! Runs one gRPC device-plugin server per advertised resource and keeps the
//! running set in sync with what the [`PluginLister`] discovers. This is the
//! piece between the kubelet protocol and the per-set plugin logic: sockets,
//! registration, lifecycle.
//!
//! ## Lifecycle
//! For every name the lister announces:
//! 1. `new_plugin` + `start()` on the plugin implementation
//! 2. bind `<kubelet-dir>/cex-<resource>.sock` and serve the DevicePlugin
//!    service on it
//! 3. register `<namespace>/<resource>` with the kubelet over its
//!    registration socket
//!
//! Names that disappear get the reverse: plugin `stop()`, server shutdown,
//! socket removal. The whole manager winds down the same way on shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{error, info, warn};

use plexcrypt_proto::deviceplugin::v1beta1::{
    DevicePluginOptions, RegisterRequest, DEVICE_PLUGIN_PATH, VERSION,
};
use plexcrypt_proto::{DevicePlugin, DevicePluginServer, RegistrationClient};

use crate::error::{DpmError, DpmResult};
use crate::uds::{connect_uds, UDS_CONNECT_TIMEOUT};

/// Lifecycle hooks of a per-resource plugin, on top of the gRPC service
/// methods.
#[async_trait]
pub trait DevicePluginImpl: DevicePlugin {
    /// Called before the gRPC server for this plugin is brought up.
    async fn start(&self) -> Result<(), String>;
    /// Called after the plugin was deregistered; must release all tasks.
    async fn stop(&self);
}

/// Discovery side of the framework: names the resources to serve and builds
/// the plugin instance for each.
#[async_trait]
pub trait PluginLister: Send + Sync + 'static {
    type Plugin: DevicePluginImpl;

    /// The namespace prepended to every resource name on registration.
    fn resource_namespace(&self) -> String;

    /// Publish the current name list once, then again on every change, until
    /// the stop signal fires.
    async fn discover(
        &self,
        names_tx: mpsc::Sender<Vec<String>>,
        stop_rx: watch::Receiver<bool>,
    );

    /// Build a fresh plugin bound to one resource name.
    async fn new_plugin(&self, resource: &str) -> Self::Plugin;
}

/// Runs the plugin servers for everything the lister announces.
pub struct Manager<L: PluginLister> {
    lister: Arc<L>,
    kubelet_dir: PathBuf,
}

impl<L: PluginLister> Manager<L> {
    pub fn new(lister: L) -> Self {
        Self {
            lister: Arc::new(lister),
            kubelet_dir: PathBuf::from(DEVICE_PLUGIN_PATH),
        }
    }

    /// Override the kubelet device-plugin directory (tests).
    pub fn with_kubelet_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.kubelet_dir = dir.into();
        self
    }

    /// Run until the shutdown signal fires. Consumes lister announcements
    /// and (de)registers per-resource plugins accordingly.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> DpmResult<()> {
        let namespace = self.lister.resource_namespace();
        info!("Announcing '{}' as our resource namespace", namespace);

        let (names_tx, mut names_rx) = mpsc::channel::<Vec<String>>(4);
        let (discover_stop_tx, discover_stop_rx) = watch::channel(false);
        let lister = Arc::clone(&self.lister);
        let discover_task =
            tokio::spawn(async move { lister.discover(names_tx, discover_stop_rx).await });

        let mut plugins: HashMap<String, PluginHandle<L::Plugin>> = HashMap::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                names = names_rx.recv() => {
                    match names {
                        Some(names) => self.sync_plugins(&namespace, names, &mut plugins).await,
                        None => break,
                    }
                }
            }
        }

        let _ = discover_stop_tx.send(true);
        let _ = discover_task.await;
        for (resource, handle) in plugins.drain() {
            info!("Stopping plugin for resource '{}'", resource);
            handle.stop().await;
        }
        Ok(())
    }

    async fn sync_plugins(
        &self,
        namespace: &str,
        names: Vec<String>,
        plugins: &mut HashMap<String, PluginHandle<L::Plugin>>,
    ) {
        for name in &names {
            if plugins.contains_key(name) {
                continue;
            }
            match self.start_plugin(namespace, name).await {
                Ok(handle) => {
                    info!("Started plugin for resource '{}'", name);
                    plugins.insert(name.clone(), handle);
                }
                Err(e) => error!("Failed to start plugin for resource '{}': {}", name, e),
            }
        }
        let stale: Vec<String> = plugins
            .keys()
            .filter(|k| !names.contains(*k))
            .cloned()
            .collect();
        for name in stale {
            info!("Stopping plugin for removed resource '{}'", name);
            if let Some(handle) = plugins.remove(&name) {
                handle.stop().await;
            }
        }
    }

    async fn start_plugin(
        &self,
        namespace: &str,
        resource: &str,
    ) -> DpmResult<PluginHandle<L::Plugin>> {
        let plugin = Arc::new(self.lister.new_plugin(resource).await);
        plugin
            .start()
            .await
            .map_err(|reason| DpmError::PluginStart {
                resource: resource.to_string(),
                reason,
            })?;

        let socket_name = format!("cex-{}.sock", resource);
        let socket_path = self.kubelet_dir.join(&socket_name);
        // a stale socket from a previous run blocks the bind
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path).map_err(|e| DpmError::Socket {
            path: socket_path.display().to_string(),
            source: e,
        })?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let svc = DevicePluginServer::from_arc(Arc::clone(&plugin));
        let resource_owned = resource.to_string();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop_rx.changed().await;
            };
            if let Err(e) = Server::builder()
                .add_service(svc)
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
                .await
            {
                error!(
                    "Device plugin server for '{}' failed: {}",
                    resource_owned, e
                );
            }
        });

        let handle = PluginHandle {
            plugin,
            stop: stop_tx,
            server,
            socket_path,
        };

        if let Err(e) = self
            .register_with_kubelet(namespace, resource, &socket_name)
            .await
        {
            warn!("Registration of '{}' with the kubelet failed", resource);
            handle.stop().await;
            return Err(e);
        }

        Ok(handle)
    }

    async fn register_with_kubelet(
        &self,
        namespace: &str,
        resource: &str,
        endpoint: &str,
    ) -> DpmResult<()> {
        let kubelet_socket = self.kubelet_dir.join("kubelet.sock");
        let channel = connect_uds(&kubelet_socket, UDS_CONNECT_TIMEOUT).await?;
        let mut client = RegistrationClient::new(channel);
        client
            .register(RegisterRequest {
                version: VERSION.to_string(),
                endpoint: endpoint.to_string(),
                resource_name: format!("{}/{}", namespace, resource),
                options: Some(DevicePluginOptions {
                    pre_start_required: false,
                    get_preferred_allocation_available: false,
                }),
            })
            .await?;
        info!(
            "Registered '{}/{}' with the kubelet at {}",
            namespace,
            resource,
            kubelet_socket.display()
        );
        Ok(())
    }
}

/// One running per-resource plugin: its instance, its server task and the
/// socket it serves on.
struct PluginHandle<P: DevicePluginImpl> {
    plugin: Arc<P>,
    stop: watch::Sender<bool>,
    server: tokio::task::JoinHandle<()>,
    socket_path: PathBuf,
}

impl<P: DevicePluginImpl> PluginHandle<P> {
    async fn stop(self) {
        self.plugin.stop().await;
        let _ = self.stop.send(true);
        let _ = self.server.await;
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
