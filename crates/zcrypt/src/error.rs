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

//! Error types for zcrypt node management

use thiserror::Error;

/// Result type for zcrypt node operations
pub type ZcryptResult<T> = Result<T, ZcryptError>;

/// Error types for zcrypt node operations
#[derive(Error, Debug)]
pub enum ZcryptError {
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Timeout waiting for device node '{0}' to appear")]
    Timeout(String),

    #[error("Creating zcrypt node '{node}' failed: {source}")]
    Create {
        node: String,
        #[source]
        source: Box<ZcryptError>,
    },
}

impl ZcryptError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        ZcryptError::Io {
            path: path.into(),
            source,
        }
    }
}
