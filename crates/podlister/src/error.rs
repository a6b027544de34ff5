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

//! Error types for the pod lister

use thiserror::Error;

/// Result type for pod lister operations
pub type PodListerResult<T> = Result<T, PodListerError>;

/// Error types for pod-resources polling
#[derive(Error, Debug)]
pub enum PodListerError {
    #[error("No connection to kubelet")]
    NotConnected,

    #[error("Socket connection to '{socket}' failed: {source}")]
    Connect {
        socket: String,
        source: Box<plexcrypt_dpm::DpmError>,
    },

    #[error("List() on pod resources failed: {0}")]
    Rpc(#[from] tonic::Status),
}
