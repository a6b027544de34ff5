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

//! Zcrypt virtual node lifecycle

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ZcryptError, ZcryptResult};
use crate::ZCRYPT_NODE_PREFIX;

const NODE_FILE_MODE: u32 = 0o666;
/// Backoff schedule for the device node to appear: start at 25ms, double up
/// to 3.2s which sums up to a deadline of roughly six seconds.
const DEV_WAIT_START_MS: u64 = 25;
const DEV_WAIT_MAX_MS: u64 = 3200;

/// Manager for kernel zcrypt virtual device nodes.
///
/// All directories are injected so tests can run against a scratch tree; the
/// defaults of [`crate::ZCRYPT_CLASS_DIR`], [`crate::ZCRYPT_VDEV_DIR`] and
/// `/dev` apply in production wiring.
#[derive(Debug, Clone)]
pub struct ZcryptNodes {
    classdir: PathBuf,
    vdevdir: PathBuf,
    devdir: PathBuf,
    wait_start_ms: u64,
    wait_max_ms: u64,
}

impl ZcryptNodes {
    pub fn new(
        classdir: impl Into<PathBuf>,
        vdevdir: impl Into<PathBuf>,
        devdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            classdir: classdir.into(),
            vdevdir: vdevdir.into(),
            devdir: devdir.into(),
            wait_start_ms: DEV_WAIT_START_MS,
            wait_max_ms: DEV_WAIT_MAX_MS,
        }
    }

    /// Override the device-node wait schedule (tests).
    pub fn with_wait_schedule(mut self, start_ms: u64, max_ms: u64) -> Self {
        self.wait_start_ms = start_ms;
        self.wait_max_ms = max_ms;
        self
    }

    /// True when the kernel supports multiple zcrypt nodes at all.
    pub fn has_nodes_support(&self) -> bool {
        match std::fs::metadata(&self.classdir) {
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "No zcrypt multiple nodes support ('{}' does not exist)",
                    self.classdir.display()
                );
                false
            }
            Err(e) => {
                warn!("Error reading zcrypt multiple nodes support dir: {}", e);
                false
            }
        }
    }

    /// A node exists when its virtual device directory does.
    pub fn node_exists(&self, nodename: &str) -> bool {
        self.vdevdir.join(nodename).exists()
    }

    /// Destroy a node by writing its name to the class `destroy` file.
    pub fn destroy_node(&self, nodename: &str) -> ZcryptResult<()> {
        self.write_control(&self.classdir.join("destroy"), nodename)
    }

    /// Create a node bound to a single `(adapter, domain)` and the full
    /// ioctl set.
    ///
    /// Performs the full sequence: create command, wait for the `/dev` entry,
    /// chmod, mask writes. Every failure after the create command destroys
    /// the half-made node again and surfaces a composite error.
    pub async fn create_simple_node(
        &self,
        nodename: &str,
        adapter: u16,
        domain: u16,
    ) -> ZcryptResult<()> {
        self.create_node(nodename).await?;

        let masks = self
            .add_adapter(nodename, adapter)
            .and_then(|_| self.add_domain(nodename, domain))
            .and_then(|_| self.add_all_ioctls(nodename));
        if let Err(e) = masks {
            let _ = self.destroy_node(nodename);
            return Err(ZcryptError::Create {
                node: nodename.to_string(),
                source: Box::new(e),
            });
        }

        info!(
            "zcrypt node '{}' for APQN({},{}) created",
            nodename, adapter, domain
        );
        Ok(())
    }

    /// Write the create command and wait for udev to surface the device node.
    async fn create_node(&self, nodename: &str) -> ZcryptResult<()> {
        self.write_control(&self.classdir.join("create"), nodename)?;

        let devname = self.devdir.join(nodename);
        let mut appeared = false;
        let mut wait = self.wait_start_ms;
        while !appeared && wait <= self.wait_max_ms {
            match std::fs::metadata(&devname) {
                Ok(_) => appeared = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                    wait *= 2;
                }
                Err(e) => {
                    let _ = self.destroy_node(nodename);
                    return Err(ZcryptError::io(devname.display().to_string(), e));
                }
            }
        }
        if !appeared {
            warn!(
                "Timeout waiting for device node '{}' to appear",
                devname.display()
            );
            let _ = self.destroy_node(nodename);
            return Err(ZcryptError::Timeout(devname.display().to_string()));
        }

        let perms = std::fs::Permissions::from_mode(NODE_FILE_MODE);
        if let Err(e) = std::fs::set_permissions(&devname, perms) {
            let _ = self.destroy_node(nodename);
            return Err(ZcryptError::io(devname.display().to_string(), e));
        }

        Ok(())
    }

    fn add_adapter(&self, nodename: &str, adapter: u16) -> ZcryptResult<()> {
        let path = self.vdevdir.join(nodename).join("apmask");
        self.write_control(&path, &format!("+{}\n", adapter))
    }

    fn add_domain(&self, nodename: &str, domain: u16) -> ZcryptResult<()> {
        let path = self.vdevdir.join(nodename).join("aqmask");
        self.write_control(&path, &format!("+{}\n", domain))
    }

    /// No restriction on ioctls: admit all 256.
    fn add_all_ioctls(&self, nodename: &str) -> ZcryptResult<()> {
        let path = self.vdevdir.join(nodename).join("ioctlmask");
        let mut line = String::with_capacity(256 * 5);
        for i in 0..256 {
            if i > 0 {
                line.push(',');
            }
            line.push('+');
            line.push_str(&i.to_string());
        }
        line.push('\n');
        self.write_control(&path, &line)
    }

    /// List the plugin-managed nodes currently present on the host.
    pub fn fetch_active_nodes(&self) -> ZcryptResult<Vec<String>> {
        let mut nodes = Vec::new();
        match std::fs::read_dir(&self.vdevdir) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(nodes),
            Err(e) => Err(ZcryptError::io(self.vdevdir.display().to_string(), e)),
            Ok(entries) => {
                for entry in entries {
                    let entry =
                        entry.map_err(|e| ZcryptError::io(self.vdevdir.display().to_string(), e))?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with(ZCRYPT_NODE_PREFIX) {
                        nodes.push(name);
                    }
                }
                Ok(nodes)
            }
        }
    }

    fn write_control(&self, path: &std::path::Path, content: &str) -> ZcryptResult<()> {
        let mut f = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| ZcryptError::io(path.display().to_string(), e))?;
        f.write_all(content.as_bytes())
            .map_err(|e| ZcryptError::io(path.display().to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        nodes: ZcryptNodes,
        classdir: PathBuf,
        vdevdir: PathBuf,
        devdir: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let classdir = tmp.path().join("class/zcrypt");
        let vdevdir = tmp.path().join("devices/virtual/zcrypt");
        let devdir = tmp.path().join("dev");
        fs::create_dir_all(&classdir).unwrap();
        fs::create_dir_all(&vdevdir).unwrap();
        fs::create_dir_all(&devdir).unwrap();
        fs::write(classdir.join("create"), "").unwrap();
        fs::write(classdir.join("destroy"), "").unwrap();
        let nodes = ZcryptNodes::new(&classdir, &vdevdir, &devdir).with_wait_schedule(1, 4);
        Fixture {
            _tmp: tmp,
            nodes,
            classdir,
            vdevdir,
            devdir,
        }
    }

    /// Mimic the kernel side of a create: node dir with mask files plus the
    /// /dev entry.
    fn fake_kernel_create(fx: &Fixture, name: &str) {
        let nodedir = fx.vdevdir.join(name);
        fs::create_dir_all(&nodedir).unwrap();
        for mask in ["apmask", "aqmask", "ioctlmask"] {
            fs::write(nodedir.join(mask), "").unwrap();
        }
        fs::write(fx.devdir.join(name), "").unwrap();
    }

    #[tokio::test]
    async fn test_create_simple_node_writes_command_and_masks() {
        let fx = fixture();
        let name = "zcrypt-apqn-3-4-0";
        fake_kernel_create(&fx, name);

        fx.nodes.create_simple_node(name, 3, 4).await.unwrap();

        assert_eq!(fs::read_to_string(fx.classdir.join("create")).unwrap(), name);
        let nodedir = fx.vdevdir.join(name);
        assert_eq!(fs::read_to_string(nodedir.join("apmask")).unwrap(), "+3\n");
        assert_eq!(fs::read_to_string(nodedir.join("aqmask")).unwrap(), "+4\n");
        let ioctls = fs::read_to_string(nodedir.join("ioctlmask")).unwrap();
        assert!(ioctls.starts_with("+0,+1,"));
        assert!(ioctls.ends_with(",+255\n"));
        assert_eq!(ioctls.matches('+').count(), 256);
    }

    #[tokio::test]
    async fn test_create_times_out_without_dev_node() {
        let fx = fixture();
        let err = fx
            .nodes
            .create_simple_node("zcrypt-apqn-1-1-0", 1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ZcryptError::Timeout(_)));
        // the failed create is rolled back through the destroy control file
        assert_eq!(
            fs::read_to_string(fx.classdir.join("destroy")).unwrap(),
            "zcrypt-apqn-1-1-0"
        );
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_mask_failure() {
        let fx = fixture();
        let name = "zcrypt-apqn-2-2-0";
        // /dev appears but the node dir carries no mask files
        fs::write(fx.devdir.join(name), "").unwrap();

        let err = fx.nodes.create_simple_node(name, 2, 2).await.unwrap_err();
        assert!(matches!(err, ZcryptError::Create { .. }));
        assert_eq!(
            fs::read_to_string(fx.classdir.join("destroy")).unwrap(),
            name
        );
    }

    #[test]
    fn test_node_exists_and_fetch_active() {
        let fx = fixture();
        assert!(!fx.nodes.node_exists("zcrypt-apqn-1-2-0"));
        fs::create_dir_all(fx.vdevdir.join("zcrypt-apqn-1-2-0")).unwrap();
        fs::create_dir_all(fx.vdevdir.join("unrelated")).unwrap();
        assert!(fx.nodes.node_exists("zcrypt-apqn-1-2-0"));
        assert_eq!(
            fx.nodes.fetch_active_nodes().unwrap(),
            vec!["zcrypt-apqn-1-2-0".to_string()]
        );
    }

    #[test]
    fn test_fetch_active_without_vdev_dir() {
        let tmp = TempDir::new().unwrap();
        let nodes = ZcryptNodes::new(
            tmp.path().join("class"),
            tmp.path().join("absent"),
            tmp.path().join("dev"),
        );
        assert!(nodes.fetch_active_nodes().unwrap().is_empty());
    }

    #[test]
    fn test_destroy_writes_name() {
        let fx = fixture();
        fx.nodes.destroy_node("zcrypt-apqn-7-8-0").unwrap();
        assert_eq!(
            fs::read_to_string(fx.classdir.join("destroy")).unwrap(),
            "zcrypt-apqn-7-8-0"
        );
    }

    #[test]
    fn test_has_nodes_support() {
        let fx = fixture();
        assert!(fx.nodes.has_nodes_support());
        let nowhere = ZcryptNodes::new("/nonexistent/zcrypt", "/nonexistent/v", "/nonexistent/d");
        assert!(!nowhere.has_nodes_support());
    }
}
