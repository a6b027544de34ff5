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

//! # PlexCrypt AP Bus Discovery
//!
//! ## Purpose
//! Read-only view onto the host's AP bus: which CEX crypto cards and queues
//! exist, their generation/mode/online state, their request counters, and the
//! machine identity used for host affinity.
//!
//! ## Key Components
//! - [`Apqn`]: immutable snapshot of one `(adapter, domain)` queue
//! - [`ApScanner`]: sysfs directory walker producing snapshot lists
//! - [`machine_id`]: `<Manufacturer>-<Type>-<SequenceCode>` from /proc/sysinfo

mod apqn;
mod error;
mod scanner;
mod sysinfo;

pub use apqn::{
    apqns_to_string, equal_apqn_lists, format_apqn_device_id, parse_apqn_device_id, Apqn,
    CexMode, APQN_DEVICE_ID_PREFIX,
};
pub use error::{ApError, ApResult};
pub use scanner::ApScanner;
pub use sysinfo::{machine_id, machine_id_from, SYSINFO_PATH};

/// Default host location of the AP bus attributes.
pub const AP_SYSFS_BUSDIR: &str = "/sys/bus/ap";
/// Default host location of the AP card/queue device tree.
pub const AP_SYSFS_DEVSDIR: &str = "/sys/devices/ap";
