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

//! # PlexCrypt Shadow Sysfs Builder
//!
//! ## Purpose
//! Builds the per-allocation filesystem trees that are bind-mounted over a
//! container's `/sys/bus/ap` and `/sys/devices/ap`. The shadow tree
//! masquerades as the host's AP sysfs but exposes exactly one
//! `(adapter, domain)` queue, so in-container tooling sees a machine that
//! owns a single crypto queue.
//!
//! ## Architecture Context
//! One shadow tree exists per allocated plugin device, named
//! `sysfs-apqn-<a>-<d>-<i>` below a base directory. The builder creates it
//! during `Allocate`; the garbage collector deletes it when no container is
//! seen using the device any more. The tree is a mix of files copied from the
//! host, synthesized mask/counter files, and the relative-symlink chains the
//! real AP bus maintains between `bus/ap` and `devices/ap`.
//!
//! ## Design Notes
//! - In live mode the queue counter files are symlinks into the queue
//!   directory, which itself gets over-mounted with the real host queue dir;
//!   the counters then show live kernel values.
//! - Construction runs under `umask(0)` so the mode bits written are the mode
//!   bits that land on disk.
//! - Any failure mid-build removes the whole tree again; there are no
//!   half-built shadows to clean up after a crash beyond `delete_shadow`.

mod builder;
mod error;
mod masks;

pub use builder::{MountPair, ShadowSysfs, ShadowTree};
pub use error::{ShadowSysfsError, ShadowSysfsResult};
pub use masks::{decode_256bit_mask, encode_256bit_mask};

/// Default base directory for the shadow trees.
pub const SHADOW_BASE_DIR: &str = "/var/tmp/shadowsysfs";
/// Prefix of all shadow tree directory names.
pub const SHADOW_DIR_PREFIX: &str = "sysfs-apqn-";
