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

//! Error types for the AP bus scanner

use thiserror::Error;

/// Result type for AP bus operations
pub type ApResult<T> = Result<T, ApError>;

/// Error types for AP bus discovery
#[derive(Error, Debug)]
pub enum ApError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Unparsable sysfs entry '{0}'")]
    Parse(String),

    #[error("Machine id fields missing from '{0}'")]
    MachineIdIncomplete(String),
}

impl ApError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        ApError::Io {
            path: path.into(),
            source,
        }
    }
}
