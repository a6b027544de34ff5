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

//! # Crypto Configuration Model
//!
//! ## Purpose
//! The operator-provided JSON that groups APQNs into named configuration
//! sets, each with a namespace affinity and policy knobs. One such set turns
//! into one schedulable resource.
//!
//! ## Design Notes
//! - `overcommit` and `livesysfs` use `-1` as the "not configured" sentinel;
//!   serde fills it in for absent fields and defaulting from the process-wide
//!   settings happens at the point of consumption, never at parse time.
//! - Unknown JSON fields are tolerated on purpose: configs are shared with
//!   other tooling that may carry extra keys.
//! - `verify` is the single gatekeeper; a config that parses but does not
//!   verify is treated exactly like an unparsable one.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One APQN line in a configuration set. An empty `machineid` means the
/// definition applies on every machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApqnDef {
    pub adapter: i32,
    pub domain: i32,
    #[serde(default)]
    pub machineid: String,
}

impl ApqnDef {
    /// Two defs collide when they name the same queue and their machine
    /// affinities can apply at the same time (empty acts as wildcard).
    pub fn collides_with(&self, other: &ApqnDef) -> bool {
        self.adapter == other.adapter
            && self.domain == other.domain
            && (self.machineid == other.machineid
                || self.machineid.is_empty()
                || other.machineid.is_empty())
    }

    /// Whether this def applies on the machine with the given id.
    pub fn applies_on(&self, machineid: &str) -> bool {
        self.machineid.is_empty() || self.machineid == machineid
    }
}

fn default_unset() -> i32 {
    -1
}

/// A named group of APQNs plus the policy under which they are exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfigSet {
    pub setname: String,
    pub project: String,
    #[serde(default)]
    pub cexmode: String,
    #[serde(default)]
    pub mincexgen: String,
    /// How many plugin devices to announce per APQN; -1 requests the
    /// process-wide default, 0 behaves like 1.
    #[serde(default = "default_unset")]
    pub overcommit: i32,
    /// Shadow sysfs presentation: 1 live, 0 static, -1 process default.
    #[serde(default = "default_unset")]
    pub livesysfs: i32,
    #[serde(default)]
    pub apqns: Vec<ApqnDef>,
}

/// The full operator configuration: an ordered list of sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub cryptoconfigsets: Vec<CryptoConfigSet>,
}

const VALID_CEXMODES: &[&str] = &["ep11", "cca", "accel"];
const OVERCOMMIT_LIMIT: i32 = 100;

impl CryptoConfig {
    /// Check every structural invariant of the configuration.
    ///
    /// Returns the first violated rule as a human-readable message.
    pub fn verify(&self) -> Result<(), String> {
        let mincexgen_re = Regex::new("^cex[5-9]$").unwrap();

        for (i, s) in self.cryptoconfigsets.iter().enumerate() {
            // set names need to be non-empty and unique
            if s.setname.is_empty() {
                return Err("Set with empty setname".to_string());
            }
            for (j, s2) in self.cryptoconfigsets.iter().enumerate() {
                if i != j && s.setname == s2.setname {
                    return Err(format!(
                        "More than one set '{}' - setname needs to be unique",
                        s.setname
                    ));
                }
            }
            let prestr = format!("CryptoConfigSet '{}':", s.setname);
            // project name must not be empty
            if s.project.is_empty() {
                return Err(format!("{} Projectname is empty", prestr));
            }
            // cexmode
            if !s.cexmode.is_empty() && !VALID_CEXMODES.contains(&s.cexmode.as_str()) {
                return Err(format!(
                    "{} Unknown/unsupported cexmode '{}'",
                    prestr, s.cexmode
                ));
            }
            // mincexgen
            if !s.mincexgen.is_empty() && !mincexgen_re.is_match(&s.mincexgen) {
                return Err(format!(
                    "{} Unknown/unsupported mincexgen '{}'",
                    prestr, s.mincexgen
                ));
            }
            // overcommit and livesysfs ranges (-1 = not configured)
            if s.overcommit < -1 || s.overcommit > OVERCOMMIT_LIMIT {
                return Err(format!(
                    "{} Invalid overcommit {} [-1...{}]",
                    prestr, s.overcommit, OVERCOMMIT_LIMIT
                ));
            }
            if !(-1..=1).contains(&s.livesysfs) {
                return Err(format!(
                    "{} Invalid livesysfs {} [-1, 0, 1]",
                    prestr, s.livesysfs
                ));
            }
            // APQN definitions
            for (k, a) in s.apqns.iter().enumerate() {
                if !(0..=255).contains(&a.adapter) {
                    return Err(format!(
                        "{} APQN({},{}) - invalid adapter {} [0...255]",
                        prestr, a.adapter, a.domain, a.adapter
                    ));
                }
                if !(0..=255).contains(&a.domain) {
                    return Err(format!(
                        "{} APQN({},{}) - invalid domain {} [0...255]",
                        prestr, a.adapter, a.domain, a.domain
                    ));
                }
                // unique within the set
                for (n, a2) in s.apqns.iter().enumerate() {
                    if k != n && a.collides_with(a2) {
                        return Err(format!(
                            "{} APQN({},{}) and APQN({},{}) are effectively the same",
                            prestr, a.adapter, a.domain, a2.adapter, a2.domain
                        ));
                    }
                }
                // and must not appear in other sets
                for (j, s2) in self.cryptoconfigsets.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    if s2.apqns.iter().any(|a2| a.collides_with(a2)) {
                        return Err(format!(
                            "{} APQN({},{}) appears also in set '{}'",
                            prestr, a.adapter, a.domain, s2.setname
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn set_names(&self) -> Vec<String> {
        self.cryptoconfigsets
            .iter()
            .map(|s| s.setname.clone())
            .collect()
    }

    pub fn get_set(&self, setname: &str) -> Option<&CryptoConfigSet> {
        self.cryptoconfigsets
            .iter()
            .find(|s| s.setname == setname)
    }

    /// Which set owns this APQN on the machine with the given id.
    pub fn set_for_apqn(
        &self,
        adapter: i32,
        domain: i32,
        machineid: &str,
    ) -> Option<&CryptoConfigSet> {
        self.cryptoconfigsets.iter().find(|s| {
            s.apqns.iter().any(|a| {
                a.adapter == adapter && a.domain == domain && a.applies_on(machineid)
            })
        })
    }

    /// Startup convenience: log the whole configuration in readable form.
    pub fn pretty_log(&self) {
        info!(
            "CryptoConfig ({} CryptoConfigSets):",
            self.cryptoconfigsets.len()
        );
        for s in &self.cryptoconfigsets {
            info!("  setname: '{}'", s.setname);
            info!("    project: '{}'", s.project);
            if !s.cexmode.is_empty() {
                info!("    cexmode: '{}'", s.cexmode);
            }
            if !s.mincexgen.is_empty() {
                info!("    mincexgen: '{}'", s.mincexgen);
            }
            if s.overcommit >= 0 {
                info!("    overcommit: {}", s.overcommit);
            }
            if s.livesysfs >= 0 {
                info!("    livesysfs: {}", s.livesysfs);
            }
            if s.apqns.is_empty() {
                info!("    no equivalent APQNs defined");
            } else {
                info!("    {} equivalent APQNs:", s.apqns.len());
                for a in &s.apqns {
                    let mid = if a.machineid.is_empty() {
                        "*"
                    } else {
                        a.machineid.as_str()
                    };
                    info!(
                        "      APQN adapter={} domain={} machineid='{}'",
                        a.adapter, a.domain, mid
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(name: &str) -> CryptoConfigSet {
        CryptoConfigSet {
            setname: name.to_string(),
            project: "test".to_string(),
            cexmode: String::new(),
            mincexgen: String::new(),
            overcommit: -1,
            livesysfs: -1,
            apqns: Vec::new(),
        }
    }

    fn apqn(adapter: i32, domain: i32, machineid: &str) -> ApqnDef {
        ApqnDef {
            adapter,
            domain,
            machineid: machineid.to_string(),
        }
    }

    fn config(sets: Vec<CryptoConfigSet>) -> CryptoConfig {
        CryptoConfig {
            cryptoconfigsets: sets,
        }
    }

    #[test]
    fn test_verify_rejects_duplicate_setnames() {
        let cc = config(vec![set("set"), set("set")]);
        assert!(cc.verify().is_err());
    }

    #[test]
    fn test_verify_rejects_empty_setname() {
        let cc = config(vec![set("")]);
        assert!(cc.verify().is_err());
    }

    #[test]
    fn test_verify_rejects_empty_project() {
        let mut s = set("set");
        s.project = String::new();
        assert!(config(vec![s]).verify().is_err());
    }

    #[test]
    fn test_verify_rejects_bad_cexmode() {
        let mut s = set("set");
        s.cexmode = "ignored".to_string();
        assert!(config(vec![s]).verify().is_err());
    }

    #[test]
    fn test_verify_rejects_bad_mincexgen() {
        for bad in ["cex456789", "cex4", "cexa", "CEX7", "acex7"] {
            let mut s = set("set");
            s.mincexgen = bad.to_string();
            assert!(config(vec![s]).verify().is_err(), "{} should be rejected", bad);
        }
        let mut s = set("set");
        s.mincexgen = "cex7".to_string();
        assert!(config(vec![s]).verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_out_of_range_adapter_and_domain() {
        for (adapter, domain) in [(-1, 0), (4711, 0), (0, -1), (0, 4711)] {
            let mut s = set("set");
            s.apqns = vec![apqn(adapter, domain, "")];
            assert!(config(vec![s]).verify().is_err());
        }
    }

    #[test]
    fn test_verify_rejects_duplicate_apqn_in_set() {
        let mut s = set("set");
        s.apqns = vec![apqn(0, 0, ""), apqn(0, 0, "")];
        assert!(config(vec![s]).verify().is_err());
    }

    #[test]
    fn test_verify_allows_same_apqn_with_distinct_machineids() {
        let mut s = set("set");
        s.apqns = vec![apqn(0, 0, "machine-a"), apqn(0, 0, "machine-b")];
        assert!(config(vec![s]).verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_apqn_in_multiple_sets() {
        let mut s1 = set("set1");
        s1.apqns = vec![apqn(1, 1, "")];
        let mut s2 = set("set2");
        s2.apqns = vec![apqn(1, 1, "")];
        assert!(config(vec![s1, s2]).verify().is_err());
    }

    #[test]
    fn test_verify_rejects_wildcard_collision_across_sets() {
        // an empty machineid collides with any pinned one on the same queue
        let mut s1 = set("set1");
        s1.apqns = vec![apqn(1, 1, "machine-a")];
        let mut s2 = set("set2");
        s2.apqns = vec![apqn(1, 1, "")];
        assert!(config(vec![s1, s2]).verify().is_err());
    }

    #[test]
    fn test_verify_rejects_out_of_range_overcommit_and_livesysfs() {
        let mut s = set("set");
        s.overcommit = 101;
        assert!(config(vec![s]).verify().is_err());
        let mut s = set("set");
        s.overcommit = -2;
        assert!(config(vec![s]).verify().is_err());
        let mut s = set("set");
        s.livesysfs = 2;
        assert!(config(vec![s]).verify().is_err());
    }

    #[test]
    fn test_verify_accepts_full_example() {
        let mut s1 = set("set1");
        s1.cexmode = "cca".to_string();
        s1.mincexgen = "cex7".to_string();
        s1.overcommit = 10;
        s1.apqns = vec![apqn(0, 0, "1"), apqn(0, 0, "2")];
        let mut s2 = set("set2");
        s2.cexmode = "ep11".to_string();
        s2.mincexgen = "cex6".to_string();
        s2.overcommit = 0;
        s2.apqns = vec![apqn(0, 2, "")];
        let mut s3 = set("set3");
        s3.project = "other_test".to_string();
        s3.cexmode = "accel".to_string();
        s3.apqns = vec![apqn(1, 2, "")];
        assert!(config(vec![s1, s2, s3]).verify().is_ok());
    }

    #[test]
    fn test_parse_defaults_and_unknown_fields() {
        let raw = r#"{
            "cryptoconfigsets": [
                { "setname": "s1", "project": "ns", "futureknob": true,
                  "apqns": [ {"adapter": 1, "domain": 2} ] }
            ]
        }"#;
        let cc: CryptoConfig = serde_json::from_str(raw).unwrap();
        let s = &cc.cryptoconfigsets[0];
        assert_eq!(s.overcommit, -1);
        assert_eq!(s.livesysfs, -1);
        assert!(s.cexmode.is_empty());
        assert!(s.apqns[0].machineid.is_empty());
        assert!(cc.verify().is_ok());
    }

    #[test]
    fn test_serialize_load_roundtrip_preserves_sets() {
        let mut s1 = set("s1");
        s1.cexmode = "ep11".to_string();
        s1.mincexgen = "cex7".to_string();
        s1.overcommit = 4;
        s1.livesysfs = 1;
        s1.apqns = vec![apqn(1, 2, "IBM-3931-000001")];
        let mut s2 = set("s2");
        s2.apqns = vec![apqn(3, 4, "")];
        let cc = config(vec![s1, s2]);

        let raw = serde_json::to_string(&cc).unwrap();
        let back: CryptoConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(cc, back);
        assert_eq!(back.set_names(), vec!["s1", "s2"]);
    }

    #[test]
    fn test_set_for_apqn_respects_machineid() {
        let mut s1 = set("pinned");
        s1.apqns = vec![apqn(1, 1, "machine-a")];
        let mut s2 = set("wildcard");
        s2.apqns = vec![apqn(2, 2, "")];
        let cc = config(vec![s1, s2]);

        assert_eq!(
            cc.set_for_apqn(1, 1, "machine-a").unwrap().setname,
            "pinned"
        );
        assert!(cc.set_for_apqn(1, 1, "machine-b").is_none());
        assert_eq!(
            cc.set_for_apqn(2, 2, "anything").unwrap().setname,
            "wildcard"
        );
        assert!(cc.set_for_apqn(9, 9, "machine-a").is_none());
    }
}
