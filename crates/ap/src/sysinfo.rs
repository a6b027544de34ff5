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

//! Machine identity from /proc/sysinfo
//!
//! An APQN definition may be pinned to one physical machine. The machine id
//! is `<Manufacturer>-<Type>-<SequenceCode>` as reported by the s390
//! system-information file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::Regex;

use crate::error::{ApError, ApResult};

pub const SYSINFO_PATH: &str = "/proc/sysinfo";

/// Read the machine id from the default `/proc/sysinfo` location.
pub fn machine_id() -> ApResult<String> {
    machine_id_from(Path::new(SYSINFO_PATH))
}

/// Read the machine id from an arbitrary sysinfo-format file.
pub fn machine_id_from(path: &Path) -> ApResult<String> {
    let f = File::open(path).map_err(|e| ApError::io(path.display().to_string(), e))?;

    let re_manufacturer = Regex::new(r"Manufacturer:[[:space:]]+(.+)").unwrap();
    let re_machinetype = Regex::new(r"Type:[[:space:]]+(.+)").unwrap();
    let re_sequencecode = Regex::new(r"Sequence Code:[[:space:]]+(.+)").unwrap();

    let mut manufacturer = String::new();
    let mut machinetype = String::new();
    let mut sequencecode = String::new();

    for line in BufReader::new(f).lines() {
        let line = line.map_err(|e| ApError::io(path.display().to_string(), e))?;
        let line = line.trim();
        if manufacturer.is_empty() {
            if let Some(m) = re_manufacturer.captures(line) {
                manufacturer = m[1].trim().to_string();
                continue;
            }
        }
        if machinetype.is_empty() {
            if let Some(m) = re_machinetype.captures(line) {
                machinetype = m[1].trim().to_string();
                continue;
            }
        }
        if sequencecode.is_empty() {
            if let Some(m) = re_sequencecode.captures(line) {
                sequencecode = m[1].trim().to_string();
            }
        }
    }

    if manufacturer.is_empty() || machinetype.is_empty() || sequencecode.is_empty() {
        return Err(ApError::MachineIdIncomplete(path.display().to_string()));
    }

    Ok(format!("{}-{}-{}", manufacturer, machinetype, sequencecode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SYSINFO: &str = "\
Manufacturer:         IBM
Type:                 3931
Sequence Code:        0000000000012345
Model:                702
";

    #[test]
    fn test_machine_id_concatenation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sysinfo");
        fs::write(&path, SYSINFO).unwrap();
        assert_eq!(
            machine_id_from(&path).unwrap(),
            "IBM-3931-0000000000012345"
        );
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sysinfo");
        fs::write(&path, "Manufacturer: IBM\nType: 3931\n").unwrap();
        assert!(matches!(
            machine_id_from(&path),
            Err(ApError::MachineIdIncomplete(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(machine_id_from(&tmp.path().join("absent")).is_err());
    }
}
