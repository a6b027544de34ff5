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

//! # AP Bus Scanner
//!
//! ## Purpose
//! Enumerates the crypto queues (APQNs) the host kernel exposes under the AP
//! bus sysfs tree and turns them into [`Apqn`] snapshots.
//!
//! ## Design Notes
//! - The sysfs layout is `<devs>/card<aa>/<aa>.<dddd>/` with two-hex adapter
//!   and four-hex domain numbers; card generation and mode come from the
//!   card-level `type` file (`CEX<N><A|C|P>`).
//! - A scan is a plain synchronous directory walk; it either returns a
//!   complete fresh snapshot or an error, so a caller can always keep its
//!   previous snapshot on failure.
//! - Directories are injected at construction so tests can run the scanner
//!   against a fixture tree.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::apqn::{Apqn, CexMode};
use crate::error::{ApError, ApResult};

/// Scanner over the host AP bus sysfs directories.
#[derive(Debug, Clone)]
pub struct ApScanner {
    busdir: PathBuf,
    devsdir: PathBuf,
}

impl ApScanner {
    pub fn new(busdir: impl Into<PathBuf>, devsdir: impl Into<PathBuf>) -> Self {
        Self {
            busdir: busdir.into(),
            devsdir: devsdir.into(),
        }
    }

    /// True when the host kernel provides the AP bus at all.
    pub fn has_ap_support(&self) -> bool {
        match std::fs::metadata(&self.busdir) {
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No AP bus support (AP bus sysfs dir {} does not exist)", self.busdir.display());
                false
            }
            Err(e) => {
                warn!("Error reading AP bus sysfs dir {}: {}", self.busdir.display(), e);
                false
            }
        }
    }

    /// Scan all cards and queues, producing a freshly allocated snapshot list.
    ///
    /// Any unreadable card or queue entry aborts the scan with an error; the
    /// caller is expected to keep working with its previous snapshot.
    pub fn scan_apqns(&self) -> ApResult<Vec<Apqn>> {
        let mut apqns = Vec::new();

        let entries = std::fs::read_dir(&self.devsdir)
            .map_err(|e| ApError::io(self.devsdir.display().to_string(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ApError::io(self.devsdir.display().to_string(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if parse_card_dir(&name).is_none() {
                continue;
            }
            apqns.extend(self.scan_card_dir(&name)?);
        }

        debug!("scan_apqns() found {} APQNs", apqns.len());
        Ok(apqns)
    }

    fn scan_card_dir(&self, carddir: &str) -> ApResult<Vec<Apqn>> {
        let cardpath = self.devsdir.join(carddir);

        let cardtype = read_first_line(&cardpath.join("type"))?;
        let (gen, mode) = parse_card_type(&cardtype)
            .ok_or_else(|| ApError::Parse(format!("cardtype '{}' in '{}'", cardtype, carddir)))?;

        let mut apqns = Vec::new();
        let entries = std::fs::read_dir(&cardpath)
            .map_err(|e| ApError::io(cardpath.display().to_string(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ApError::io(cardpath.display().to_string(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((adapter, domain)) = parse_queue_dir(&name) else {
                continue;
            };
            let online = read_first_line(&cardpath.join(&name).join("online"))?;
            apqns.push(Apqn {
                adapter,
                domain,
                gen: gen.clone(),
                mode,
                online: online.starts_with('1'),
            });
        }

        Ok(apqns)
    }

    /// Read the lifetime request counter of one queue.
    pub fn queue_request_counter(&self, adapter: u16, domain: u16) -> ApResult<u64> {
        let path = self
            .devsdir
            .join(format!("card{:02x}", adapter))
            .join(format!("{:02x}.{:04x}", adapter, domain))
            .join("request_count");
        let line = read_first_line(&path)?;
        line.parse::<u64>()
            .map_err(|_| ApError::Parse(format!("request_count '{}' of queue {:02x}.{:04x}", line, adapter, domain)))
    }
}

/// Read the first line of a small sysfs file, trimmed.
pub(crate) fn read_first_line(path: &Path) -> ApResult<String> {
    let f = File::open(path).map_err(|e| ApError::io(path.display().to_string(), e))?;
    let mut line = String::new();
    BufReader::new(f)
        .read_line(&mut line)
        .map_err(|e| ApError::io(path.display().to_string(), e))?;
    Ok(line.trim().to_string())
}

/// `card<aa>` with a two-hex-digit adapter number.
fn parse_card_dir(name: &str) -> Option<u16> {
    let hex = name.strip_prefix("card")?;
    if hex.len() != 2 {
        return None;
    }
    u16::from_str_radix(hex, 16).ok()
}

/// `<aa>.<dddd>` queue directory below a card.
fn parse_queue_dir(name: &str) -> Option<(u16, u16)> {
    let (card, queue) = name.split_once('.')?;
    if card.len() != 2 || queue.len() != 4 {
        return None;
    }
    Some((
        u16::from_str_radix(card, 16).ok()?,
        u16::from_str_radix(queue, 16).ok()?,
    ))
}

/// `CEX<N><A|C|P>` card type string, e.g. `CEX8P`.
fn parse_card_type(cardtype: &str) -> Option<(String, CexMode)> {
    let rest = cardtype.strip_prefix("CEX")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let mode = CexMode::from_type_suffix(rest.chars().nth(digits.len())?)?;
    let gen: u32 = digits.parse().ok()?;
    Some((format!("cex{}", gen), mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_queue(devs: &Path, adapter: u16, domain: u16, cardtype: &str, online: &str) {
        let card = devs.join(format!("card{:02x}", adapter));
        let queue = card.join(format!("{:02x}.{:04x}", adapter, domain));
        fs::create_dir_all(&queue).unwrap();
        fs::write(card.join("type"), format!("{}\n", cardtype)).unwrap();
        fs::write(queue.join("online"), format!("{}\n", online)).unwrap();
        fs::write(queue.join("request_count"), "42\n").unwrap();
    }

    fn scanner(tmp: &TempDir) -> ApScanner {
        let bus = tmp.path().join("bus/ap");
        let devs = tmp.path().join("devices/ap");
        fs::create_dir_all(&bus).unwrap();
        fs::create_dir_all(&devs).unwrap();
        ApScanner::new(bus, devs)
    }

    #[test]
    fn test_scan_finds_queues() {
        let tmp = TempDir::new().unwrap();
        let s = scanner(&tmp);
        make_queue(&tmp.path().join("devices/ap"), 3, 4, "CEX7P", "1");
        make_queue(&tmp.path().join("devices/ap"), 10, 17, "CEX8C", "0");

        let mut apqns = s.scan_apqns().unwrap();
        apqns.sort_by_key(|a| (a.adapter, a.domain));
        assert_eq!(apqns.len(), 2);
        assert_eq!(apqns[0].adapter, 3);
        assert_eq!(apqns[0].domain, 4);
        assert_eq!(apqns[0].gen, "cex7");
        assert_eq!(apqns[0].mode, CexMode::Ep11);
        assert!(apqns[0].online);
        assert_eq!(apqns[1].gen, "cex8");
        assert_eq!(apqns[1].mode, CexMode::Cca);
        assert!(!apqns[1].online);
    }

    #[test]
    fn test_scan_ignores_unrelated_entries() {
        let tmp = TempDir::new().unwrap();
        let s = scanner(&tmp);
        let devs = tmp.path().join("devices/ap");
        fs::create_dir_all(devs.join("not-a-card")).unwrap();
        fs::write(devs.join("ap_interrupts"), "1\n").unwrap();
        assert!(s.scan_apqns().unwrap().is_empty());
    }

    #[test]
    fn test_scan_fails_on_bad_card_type() {
        let tmp = TempDir::new().unwrap();
        let s = scanner(&tmp);
        let devs = tmp.path().join("devices/ap");
        make_queue(&devs, 1, 1, "XYZ9Q", "1");
        assert!(s.scan_apqns().is_err());
    }

    #[test]
    fn test_scan_fails_on_missing_online_file() {
        let tmp = TempDir::new().unwrap();
        let s = scanner(&tmp);
        let devs = tmp.path().join("devices/ap");
        make_queue(&devs, 1, 1, "CEX7P", "1");
        fs::remove_file(devs.join("card01/01.0001/online")).unwrap();
        assert!(s.scan_apqns().is_err());
    }

    #[test]
    fn test_request_counter() {
        let tmp = TempDir::new().unwrap();
        let s = scanner(&tmp);
        make_queue(&tmp.path().join("devices/ap"), 3, 4, "CEX7P", "1");
        assert_eq!(s.queue_request_counter(3, 4).unwrap(), 42);
        assert!(s.queue_request_counter(9, 9).is_err());
    }

    #[test]
    fn test_has_ap_support() {
        let tmp = TempDir::new().unwrap();
        let s = scanner(&tmp);
        assert!(s.has_ap_support());
        assert!(!ApScanner::new(tmp.path().join("nope"), tmp.path().join("nope")).has_ap_support());
    }

    #[test]
    fn test_parse_card_type_grammar() {
        assert_eq!(parse_card_type("CEX7P").unwrap().0, "cex7");
        assert_eq!(parse_card_type("CEX10A").unwrap().0, "cex10");
        assert!(parse_card_type("CEXP").is_none());
        assert!(parse_card_type("CEX7X").is_none());
        assert!(parse_card_type("cex7p").is_none());
    }

    #[test]
    fn test_parse_queue_dir_grammar() {
        assert_eq!(parse_queue_dir("0a.0004"), Some((10, 4)));
        assert!(parse_queue_dir("a.0004").is_none());
        assert!(parse_queue_dir("0a.004").is_none());
        assert!(parse_queue_dir("type").is_none());
    }
}
