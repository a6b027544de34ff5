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

//! Error types for the metrics push path

use thiserror::Error;

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Error types for the metrics push path
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Connection to '{addr}' failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection received invalid reply '{0}'")]
    BadReply(String),

    #[error("Serializing metrics data failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
