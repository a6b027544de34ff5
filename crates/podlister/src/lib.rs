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

//! # PlexCrypt Pod Lister & Garbage Collector
//!
//! ## Purpose
//! The reclamation side of the plugin. Allocated zcrypt nodes and shadow
//! sysfs trees are host resources the kubelet never tells us to release, so
//! this component watches what containers actually use - via the kubelet's
//! pod-resources API - and deletes what nothing uses any more.
//!
//! ## Liveness model
//! Every discovered node/shadow carries `first_seen` and an optional
//! `last_used`. A resource that was never seen in any container within the
//! never-used timeout is reclaimed (the pod that caused its allocation died
//! before running, or never existed). A resource whose last sighting is
//! older than the after-use timeout is reclaimed too. Discovery and
//! deletion both work off the filesystem names, so a plugin restart loses
//! nothing: the maps repopulate on the first tick.

mod error;
mod podlister;

pub use error::{PodListerError, PodListerResult};
pub use podlister::{PodLister, PodListerHandle};
