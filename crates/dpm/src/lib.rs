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

//! # PlexCrypt Device Plugin Framework
//!
//! ## Purpose
//! The generic kubelet-facing machinery: a [`Manager`] that follows a
//! [`PluginLister`]'s announcements, serves each plugin on its own unix
//! socket and registers it with the kubelet. The per-resource semantics live
//! behind the [`DevicePluginImpl`] trait; this crate knows nothing about
//! crypto queues.

mod error;
mod manager;
mod uds;

pub use error::{DpmError, DpmResult};
pub use manager::{DevicePluginImpl, Manager, PluginLister};
pub use uds::{connect_uds, UDS_CONNECT_TIMEOUT};
