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

//! Unix-domain-socket gRPC plumbing
//!
//! Both kubelet surfaces (device-plugin registration, pod resources) speak
//! gRPC over unix sockets. Tonic addresses servers by URI, so the client side
//! uses a custom connector that ignores the dummy URI and dials the socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use crate::error::DpmResult;

/// Default timeout for unix socket dials.
pub const UDS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a gRPC channel over the given unix socket.
pub async fn connect_uds(path: impl AsRef<Path>, timeout: Duration) -> DpmResult<Channel> {
    let path: PathBuf = path.as_ref().to_path_buf();
    // the authority is never used for a unix socket, any valid URI works
    let channel = Endpoint::try_from("http://[::1]:0")?
        .connect_timeout(timeout)
        .connect_with_connector(service_fn(move |_: Uri| {
            UnixStream::connect(path.clone())
        }))
        .await?;
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_to_missing_socket_fails() {
        let tmp = TempDir::new().unwrap();
        let res = connect_uds(tmp.path().join("absent.sock"), Duration::from_millis(200)).await;
        assert!(res.is_err());
    }
}
