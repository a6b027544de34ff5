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

//! # PlexCrypt Zcrypt Node Manager
//!
//! ## Purpose
//! Creates and destroys kernel zcrypt virtual device nodes. A node is a
//! character device restricted to one adapter, one usage domain and the full
//! ioctl set; a container gets exactly one such node as its `/dev/z90crypt`.
//!
//! ## Design Notes
//! - The kernel interface is write-only control files: node names go to the
//!   class `create`/`destroy` files, masks to the per-node `apmask`,
//!   `aqmask` and `ioctlmask` attributes as `+N[,+N]...` lines.
//! - After a create command the device node appears asynchronously via udev;
//!   we poll `/dev/<name>` with doubling backoff before touching it.
//! - The filesystem is the registry: node existence is the presence of the
//!   per-node virtual directory, enumeration matches `zcrypt-apqn-*`. No
//!   in-process bookkeeping survives a restart, and none is needed.

mod error;
mod nodes;

pub use error::{ZcryptError, ZcryptResult};
pub use nodes::ZcryptNodes;

/// Default kernel class directory carrying the create/destroy control files.
pub const ZCRYPT_CLASS_DIR: &str = "/sys/class/zcrypt";
/// Default directory of the per-node virtual devices.
pub const ZCRYPT_VDEV_DIR: &str = "/sys/devices/virtual/zcrypt";
/// Prefix all plugin-managed node names carry.
pub const ZCRYPT_NODE_PREFIX: &str = "zcrypt-apqn-";
