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

//! # PlexCrypt Configuration
//!
//! ## Purpose
//! Everything the operator and the environment tell the plugin: the crypto
//! configuration sets (model + verification + hashed reload watcher) and the
//! process-wide [`Settings`].
//!
//! ## Key Components
//! - [`CryptoConfig`] / [`CryptoConfigSet`] / [`ApqnDef`]: the JSON model
//! - [`ConfigStore`]: reader-writer store with SHA-256 change detection
//! - [`Settings`]: decoded environment, passed explicitly to all components

mod error;
mod model;
mod settings;
mod store;

pub use error::{ConfigError, ConfigResult};
pub use model::{ApqnDef, CryptoConfig, CryptoConfigSet};
pub use settings::Settings;
pub use store::{ConfigStore, ConfigWatcherHandle, SetLookup, CONFIG_FILE};
