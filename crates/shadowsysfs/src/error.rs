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

//! Error types for the shadow sysfs builder

use thiserror::Error;

/// Result type for shadow sysfs operations
pub type ShadowSysfsResult<T> = Result<T, ShadowSysfsError>;

/// Error types for shadow sysfs construction
#[derive(Error, Debug)]
pub enum ShadowSysfsError {
    #[error("Invalid shadow base dir '{0}': {1}")]
    InvalidBaseDir(String, String),

    #[error("Failed to create shadow dir '{path}': {source}")]
    MakeDir {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write shadow file '{path}': {source}")]
    MakeFile {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to read sysfs file '{path}': {source}")]
    CopyRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to create symlink '{src}' -> '{dst}': {source}")]
    MakeLink {
        src: String,
        dst: String,
        source: std::io::Error,
    },
}
