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

//! # PlexCrypt Set Plugins
//!
//! ## Purpose
//! The per-configuration-set heart of the device plugin: each configured set
//! becomes one schedulable resource, backed by a [`ZcryptPlugin`] that
//! filters the node's APQNs through the set's policy, announces plugin
//! devices to the kubelet and materializes the per-container isolation on
//! `Allocate` (zcrypt node + shadow sysfs). The [`ZcryptLister`] watches the
//! set of configured names and hands plugins to the framework.

mod lister;
mod plugin;

pub use lister::ZcryptLister;
pub use plugin::ZcryptPlugin;

/// Resource namespace: per-set resources register as
/// `cex.s390.ibm.com/<setname>`.
pub const BASE_RESOURCE_NAME: &str = "cex.s390.ibm.com";
