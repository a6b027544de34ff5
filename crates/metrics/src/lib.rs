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

//! # PlexCrypt Metrics Fan-in
//!
//! ## Purpose
//! Collects raw usage events from the other components (announced APQNs and
//! plugin devices, allocations, destroyed nodes, containers seen using a
//! device) and periodically pushes an accumulated JSON snapshot to the
//! separate prometheus-exporter collector service over plain TCP.
//!
//! ## State machine
//! Each plugin device entry is `unused` or `in_use`:
//! - `unused -> in_use` on an allocation or a container-seen notification
//! - `in_use -> unused` on a destroy-node notification, or when the last
//!   container sighting is older than twice the pod-lister poll interval
//!
//! ## Concurrency
//! One mutex guards the raw table; critical sections are short and the TCP
//! push happens strictly outside the lock.

mod collector;
mod error;

pub use collector::{MetricsCollector, MetricsHandle};
pub use error::{MetricsError, MetricsResult};
