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

//! PlexCrypt Protocol Buffers
//!
//! Generated protobuf definitions for the two kubelet gRPC surfaces the
//! plugin touches: the device-plugin API v1beta1 (which we serve) and the
//! pod-resources API v1 (which we consume). The files under `generated/`
//! are committed; regenerate them with `make proto` when the vendored
//! kubelet protos change.

// Allow clippy warnings for generated code
#![allow(clippy::doc_lazy_continuation)]
#![allow(clippy::large_enum_variant)]

// Include generated modules - these match the generated file names
pub mod deviceplugin {
    pub mod v1beta1 {
        // Note: The v1beta1.rs file already includes v1beta1.tonic.rs at the end
        include!("generated/v1beta1.rs");

        /// Version of the kubelet device-plugin API implemented here.
        pub const VERSION: &str = "v1beta1";
        /// Device health as reported in [`Device::health`].
        pub const HEALTHY: &str = "Healthy";
        pub const UNHEALTHY: &str = "Unhealthy";
        /// Directory the kubelet watches for device-plugin sockets.
        pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins";
        /// Registration socket of the kubelet itself, below [`DEVICE_PLUGIN_PATH`].
        pub const KUBELET_SOCKET: &str = "/var/lib/kubelet/device-plugins/kubelet.sock";
    }
}

pub mod podresources {
    pub mod v1 {
        // Note: The v1.rs file already includes v1.tonic.rs at the end
        include!("generated/v1.rs");

        /// Socket the kubelet serves the pod-resources API on.
        pub const POD_RESOURCES_SOCKET: &str =
            "/var/lib/kubelet/pod-resources/kubelet.sock";
    }
}

// Convenience re-exports for the common client/server entry points
pub use deviceplugin::v1beta1::device_plugin_client::DevicePluginClient;
pub use deviceplugin::v1beta1::device_plugin_server::{DevicePlugin, DevicePluginServer};
pub use deviceplugin::v1beta1::registration_client::RegistrationClient;
pub use deviceplugin::v1beta1::registration_server::{Registration, RegistrationServer};
pub use podresources::v1::pod_resources_lister_client::PodResourcesListerClient;
pub use podresources::v1::pod_resources_lister_server::{
    PodResourcesLister, PodResourcesListerServer,
};
