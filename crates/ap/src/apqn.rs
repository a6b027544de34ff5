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

//! APQN snapshot types

use std::fmt;

/// Operation mode a CEX card is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CexMode {
    Accel,
    Cca,
    Ep11,
}

impl CexMode {
    /// Map the trailing letter of a sysfs card type (`CEX7P` etc.) to a mode.
    pub fn from_type_suffix(c: char) -> Option<Self> {
        match c {
            'A' => Some(CexMode::Accel),
            'C' => Some(CexMode::Cca),
            'P' => Some(CexMode::Ep11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CexMode::Accel => "accel",
            CexMode::Cca => "cca",
            CexMode::Ep11 => "ep11",
        }
    }
}

impl fmt::Display for CexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one crypto queue as found on the host.
///
/// Identity is the `(adapter, domain)` pair; two snapshots are equal only
/// when all five fields match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apqn {
    pub adapter: u16,
    pub domain: u16,
    /// Normalized card generation tag, e.g. `cex7`
    pub gen: String,
    pub mode: CexMode,
    pub online: bool,
}

impl fmt::Display for Apqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{},{},{})",
            self.adapter, self.domain, self.gen, self.mode, self.online
        )
    }
}

/// Render an APQN list the way the log lines expect it.
pub fn apqns_to_string(apqns: &[Apqn]) -> String {
    let mut out = String::with_capacity(apqns.len() * 24);
    for (i, a) in apqns.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&a.to_string());
    }
    out
}

/// Prefix of every plugin device ID.
pub const APQN_DEVICE_ID_PREFIX: &str = "apqn-";

/// Format the plugin device ID for `(adapter, domain, overcommit-index)`.
pub fn format_apqn_device_id(adapter: u16, domain: u16, index: u16) -> String {
    format!("apqn-{}-{}-{}", adapter, domain, index)
}

/// Parse a plugin device ID of the form `apqn-<adapter>-<domain>-<index>`.
pub fn parse_apqn_device_id(id: &str) -> Option<(u16, u16, u16)> {
    let rest = id.strip_prefix(APQN_DEVICE_ID_PREFIX)?;
    let mut parts = rest.splitn(3, '-');
    let adapter = parts.next()?.parse().ok()?;
    let domain = parts.next()?.parse().ok()?;
    let index = parts.next()?.parse().ok()?;
    Some((adapter, domain, index))
}

/// Identity-matched, field-wise equality over two APQN lists.
///
/// Order does not matter; a list with the same `(adapter, domain)` pairs but
/// a changed `gen`, `mode` or `online` flag compares unequal.
pub fn equal_apqn_lists(l1: &[Apqn], l2: &[Apqn]) -> bool {
    if l1.len() != l2.len() {
        return false;
    }
    l1.iter().all(|a1| {
        l2.iter()
            .find(|a2| a1.adapter == a2.adapter && a1.domain == a2.domain)
            .is_some_and(|a2| a1 == a2)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apqn(adapter: u16, domain: u16, online: bool) -> Apqn {
        Apqn {
            adapter,
            domain,
            gen: "cex7".to_string(),
            mode: CexMode::Ep11,
            online,
        }
    }

    #[test]
    fn test_equal_lists_ignore_order() {
        let l1 = vec![apqn(1, 2, true), apqn(3, 4, true)];
        let l2 = vec![apqn(3, 4, true), apqn(1, 2, true)];
        assert!(equal_apqn_lists(&l1, &l2));
    }

    #[test]
    fn test_online_flip_breaks_equality() {
        let l1 = vec![apqn(1, 2, true)];
        let l2 = vec![apqn(1, 2, false)];
        assert!(!equal_apqn_lists(&l1, &l2));
    }

    #[test]
    fn test_length_mismatch() {
        let l1 = vec![apqn(1, 2, true)];
        assert!(!equal_apqn_lists(&l1, &[]));
    }

    #[test]
    fn test_device_id_roundtrip() {
        let id = format_apqn_device_id(3, 4, 2);
        assert_eq!(id, "apqn-3-4-2");
        assert_eq!(parse_apqn_device_id(&id), Some((3, 4, 2)));
        assert_eq!(parse_apqn_device_id("apqn-0-0-0"), Some((0, 0, 0)));
        assert!(parse_apqn_device_id("zcrypt-apqn-3-4-2").is_none());
        assert!(parse_apqn_device_id("apqn-3-4").is_none());
        assert!(parse_apqn_device_id("apqn-a-b-c").is_none());
    }

    #[test]
    fn test_mode_from_type_suffix() {
        assert_eq!(CexMode::from_type_suffix('A'), Some(CexMode::Accel));
        assert_eq!(CexMode::from_type_suffix('C'), Some(CexMode::Cca));
        assert_eq!(CexMode::from_type_suffix('P'), Some(CexMode::Ep11));
        assert_eq!(CexMode::from_type_suffix('X'), None);
    }
}
