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

//! # Process-wide Settings
//!
//! ## Purpose
//! All environment-driven knobs, decoded once at startup into one explicit
//! value that is handed to every component at construction. Components never
//! read the environment themselves; that keeps initialization order trivial
//! and tests hermetic.
//!
//! Integer variables are clamped into their documented ranges rather than
//! rejected - a misconfigured interval degrades to the nearest sane value.

use std::time::Duration;

use tracing::warn;

/// Decoded environment configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `APQN_LIVE_SYSFS`: default shadow sysfs mode when a set does not
    /// configure one (1 = live).
    pub apqn_live_sysfs: i32,
    /// `APQN_OVERCOMMIT_LIMIT`: default overcommit when a set does not
    /// configure one; 1 means no overcommit.
    pub apqn_overcommit_limit: i32,
    /// `APQN_CHECK_INTERVAL`: seconds between APQN/devices re-checks.
    pub apqn_check_interval: u64,
    /// `CRYPTOCONFIG_CHECK_INTERVAL`: seconds between config re-checks.
    pub cryptoconfig_check_interval: u64,
    /// `PODLISTER_POLL_INTERVAL`: seconds between pod-resources polls.
    pub podlister_poll_interval: u64,
    /// `RESOURCE_DELETE_NEVER_USED`: seconds before a never-adopted
    /// node/shadow is reclaimed.
    pub resource_delete_never_used: u64,
    /// `RESOURCE_DELETE_UNUSED`: seconds of idleness after use before
    /// reclaim.
    pub resource_delete_unused: u64,
    /// `METRICS_POLL_INTERVAL`: seconds between metrics pushes.
    pub metrics_poll_interval: u64,
    /// `NODENAME`: name this node reports to the metrics collector.
    pub nodename: Option<String>,
    /// `APSYSFS_BUSDIR` / `APSYSFS_DEVSDIR`: host AP sysfs locations.
    pub ap_sysfs_busdir: String,
    pub ap_sysfs_devsdir: String,
    /// `SHADOWSYSFS_BASEDIR`: where the shadow trees live.
    pub shadow_sysfs_basedir: String,
    /// `CEX_PROM_EXPORTER_COLLECTOR_SERVICE[_NAMESPACE][_PORT]`
    pub metrics_collector_service: String,
    pub metrics_collector_namespace: String,
    pub metrics_collector_port: u16,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            apqn_live_sysfs: getenv_int("APQN_LIVE_SYSFS", 1, 0, Some(1)) as i32,
            apqn_overcommit_limit: getenv_int("APQN_OVERCOMMIT_LIMIT", 1, 1, Some(100)) as i32,
            apqn_check_interval: getenv_int("APQN_CHECK_INTERVAL", 30, 10, Some(120)),
            cryptoconfig_check_interval: getenv_int("CRYPTOCONFIG_CHECK_INTERVAL", 120, 120, None),
            podlister_poll_interval: getenv_int("PODLISTER_POLL_INTERVAL", 30, 10, None),
            resource_delete_never_used: getenv_int("RESOURCE_DELETE_NEVER_USED", 1800, 30, None),
            resource_delete_unused: getenv_int("RESOURCE_DELETE_UNUSED", 120, 30, None),
            metrics_poll_interval: getenv_int("METRICS_POLL_INTERVAL", 15, 10, None),
            nodename: std::env::var("NODENAME").ok(),
            ap_sysfs_busdir: getenv_str("APSYSFS_BUSDIR", "/sys/bus/ap"),
            ap_sysfs_devsdir: getenv_str("APSYSFS_DEVSDIR", "/sys/devices/ap"),
            shadow_sysfs_basedir: getenv_str("SHADOWSYSFS_BASEDIR", "/var/tmp/shadowsysfs"),
            metrics_collector_service: getenv_str(
                "CEX_PROM_EXPORTER_COLLECTOR_SERVICE",
                "cex-prometheus-exporter-collector-service",
            ),
            metrics_collector_namespace: getenv_str(
                "CEX_PROM_EXPORTER_COLLECTOR_SERVICE_NAMESPACE",
                "",
            ),
            metrics_collector_port: getenv_int(
                "CEX_PROM_EXPORTER_COLLECTOR_SERVICE_PORT",
                12358,
                0,
                Some(u16::MAX as u64),
            ) as u16,
        }
    }

    /// `service[.namespace]:port` address of the metrics collector.
    pub fn metrics_collector_addr(&self) -> String {
        if self.metrics_collector_namespace.is_empty() {
            format!(
                "{}:{}",
                self.metrics_collector_service, self.metrics_collector_port
            )
        } else {
            format!(
                "{}.{}:{}",
                self.metrics_collector_service,
                self.metrics_collector_namespace,
                self.metrics_collector_port
            )
        }
    }

    pub fn apqn_check_interval(&self) -> Duration {
        Duration::from_secs(self.apqn_check_interval)
    }

    pub fn cryptoconfig_check_interval(&self) -> Duration {
        Duration::from_secs(self.cryptoconfig_check_interval)
    }

    pub fn podlister_poll_interval(&self) -> Duration {
        Duration::from_secs(self.podlister_poll_interval)
    }

    pub fn metrics_poll_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_poll_interval)
    }
}

impl Default for Settings {
    /// Built-in defaults, independent of the environment (tests).
    fn default() -> Self {
        Self {
            apqn_live_sysfs: 1,
            apqn_overcommit_limit: 1,
            apqn_check_interval: 30,
            cryptoconfig_check_interval: 120,
            podlister_poll_interval: 30,
            resource_delete_never_used: 1800,
            resource_delete_unused: 120,
            metrics_poll_interval: 15,
            nodename: None,
            ap_sysfs_busdir: "/sys/bus/ap".to_string(),
            ap_sysfs_devsdir: "/sys/devices/ap".to_string(),
            shadow_sysfs_basedir: "/var/tmp/shadowsysfs".to_string(),
            metrics_collector_service: "cex-prometheus-exporter-collector-service".to_string(),
            metrics_collector_namespace: String::new(),
            metrics_collector_port: 12358,
        }
    }
}

fn getenv_str(envvar: &str, defaultval: &str) -> String {
    std::env::var(envvar).unwrap_or_else(|_| defaultval.to_string())
}

fn getenv_int(envvar: &str, defaultval: u64, minval: u64, maxval: Option<u64>) -> u64 {
    let Ok(valstr) = std::env::var(envvar) else {
        return defaultval;
    };
    let valint = match valstr.parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            warn!(
                "Invalid setting for {}: '{}'. Using default value...",
                envvar, valstr
            );
            return defaultval;
        }
    };
    let mut val = if valint < 0 { 0 } else { valint as u64 };
    if val < minval {
        val = minval;
    }
    if let Some(maxval) = maxval {
        if val > maxval {
            val = maxval;
        }
    }
    val
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "APQN_LIVE_SYSFS",
            "APQN_OVERCOMMIT_LIMIT",
            "APQN_CHECK_INTERVAL",
            "CRYPTOCONFIG_CHECK_INTERVAL",
            "PODLISTER_POLL_INTERVAL",
            "RESOURCE_DELETE_NEVER_USED",
            "RESOURCE_DELETE_UNUSED",
            "METRICS_POLL_INTERVAL",
            "NODENAME",
            "APSYSFS_BUSDIR",
            "APSYSFS_DEVSDIR",
            "SHADOWSYSFS_BASEDIR",
            "CEX_PROM_EXPORTER_COLLECTOR_SERVICE",
            "CEX_PROM_EXPORTER_COLLECTOR_SERVICE_NAMESPACE",
            "CEX_PROM_EXPORTER_COLLECTOR_SERVICE_PORT",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let s = Settings::from_env();
        assert_eq!(s.apqn_live_sysfs, 1);
        assert_eq!(s.apqn_overcommit_limit, 1);
        assert_eq!(s.apqn_check_interval, 30);
        assert_eq!(s.cryptoconfig_check_interval, 120);
        assert_eq!(s.podlister_poll_interval, 30);
        assert_eq!(s.resource_delete_never_used, 1800);
        assert_eq!(s.resource_delete_unused, 120);
        assert_eq!(s.metrics_poll_interval, 15);
        assert!(s.nodename.is_none());
        assert_eq!(s.ap_sysfs_busdir, "/sys/bus/ap");
        assert_eq!(
            s.metrics_collector_addr(),
            "cex-prometheus-exporter-collector-service:12358"
        );
    }

    #[test]
    #[serial]
    fn test_clamping_and_overrides() {
        clear_env();
        std::env::set_var("APQN_CHECK_INTERVAL", "5");
        std::env::set_var("APQN_OVERCOMMIT_LIMIT", "4711");
        std::env::set_var("PODLISTER_POLL_INTERVAL", "60");
        std::env::set_var("RESOURCE_DELETE_UNUSED", "not-a-number");
        std::env::set_var("NODENAME", "worker-1");
        let s = Settings::from_env();
        assert_eq!(s.apqn_check_interval, 10); // clamped to min
        assert_eq!(s.apqn_overcommit_limit, 100); // clamped to max
        assert_eq!(s.podlister_poll_interval, 60);
        assert_eq!(s.resource_delete_unused, 120); // default on junk
        assert_eq!(s.nodename.as_deref(), Some("worker-1"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_collector_addr_with_namespace() {
        clear_env();
        std::env::set_var("CEX_PROM_EXPORTER_COLLECTOR_SERVICE", "svc");
        std::env::set_var("CEX_PROM_EXPORTER_COLLECTOR_SERVICE_NAMESPACE", "mon");
        std::env::set_var("CEX_PROM_EXPORTER_COLLECTOR_SERVICE_PORT", "9999");
        let s = Settings::from_env();
        assert_eq!(s.metrics_collector_addr(), "svc.mon:9999");
        clear_env();
    }
}
