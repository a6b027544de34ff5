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

//! Error types for the device-plugin framework

use thiserror::Error;

/// Result type for device-plugin framework operations
pub type DpmResult<T> = Result<T, DpmError>;

/// Error types for plugin lifecycle and kubelet communication
#[derive(Error, Debug)]
pub enum DpmError {
    #[error("Socket error on '{path}': {source}")]
    Socket {
        path: String,
        source: std::io::Error,
    },

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Kubelet registration failed: {0}")]
    Registration(#[from] tonic::Status),

    #[error("Plugin '{resource}' failed to start: {reason}")]
    PluginStart { resource: String, reason: String },
}
