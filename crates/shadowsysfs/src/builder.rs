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

//! Shadow tree construction

use std::fs;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{ShadowSysfsError, ShadowSysfsResult};
use crate::masks::encode_256bit_mask;
use crate::SHADOW_DIR_PREFIX;

// sys/bus/ap
const SYS_BUS_AP_COPYFILES: &[&str] = &[
    "ap_interrupts",
    "ap_max_domain_id",
    "poll_thread",
    "poll_timeout",
];
const SYS_BUS_AP_MAYBECOPYFILES: &[&str] = &["ap_max_adapter_id"];

// sys/devices/ap/card<xx>/
const SYS_DEVICES_AP_CARD_COPYFILES: &[&str] =
    &["ap_functions", "depth", "hwtype", "raw_hwtype", "type"];
const SYS_DEVICES_AP_CARD_MAYBECOPYFILES: &[&str] =
    &["API_ordinalnr", "FW_version", "op_modes", "serialnr"];
const SYS_DEVICES_AP_CARD_FILESWITHVALUE: &[(&str, &str)] = &[
    ("load", "0\n"),
    ("online", "1\n"),
    ("pendingq_count", "0\n"),
    ("request_count", "0\n"),
    ("requestq_count", "0\n"),
];
const SYS_DEVICES_AP_CARD_FILESWITHVALUE_LIVE: &[(&str, &str)] = &[("load", "0\n")];
const SYS_DEVICES_AP_CARD_LINKS_TO_QUEUEDIR: &[&str] =
    &["online", "pendingq_count", "request_count", "requestq_count"];

// sys/devices/ap/card<xx>/<xx>.<yyyy>/
const SYS_DEVICES_AP_QUEUE_COPYFILES: &[&str] = &["interrupt", "reset"];
const SYS_DEVICES_AP_QUEUE_MAYBECOPYFILES: &[&str] = &["mkvps", "op_modes"];
const SYS_DEVICES_AP_QUEUE_FILESWITHVALUE: &[(&str, &str)] = &[
    ("load", "0\n"),
    ("online", "1\n"),
    ("pendingq_count", "0\n"),
    ("request_count", "0\n"),
    ("requestq_count", "0\n"),
];

const SHADOW_FILE_MODE: u32 = 0o444;
const SHADOW_DIR_MODE: u32 = 0o755;

/// One host-path/container-path bind-mount pair the caller has to add to the
/// container spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPair {
    pub host_path: String,
    pub container_path: String,
}

/// Result of a successful shadow build: the two directories to over-mount
/// onto the container's `/sys/bus/ap` and `/sys/devices/ap`.
#[derive(Debug, Clone)]
pub struct ShadowTree {
    pub busdir: PathBuf,
    pub devsdir: PathBuf,
}

/// Builder service for per-allocation shadow AP sysfs trees.
#[derive(Debug, Clone)]
pub struct ShadowSysfs {
    basedir: PathBuf,
    apbusdir: PathBuf,
    apdevsdir: PathBuf,
}

/// Scoped umask(0): sysfs-like mode bits must land exactly as written.
struct UmaskGuard(libc::mode_t);

impl UmaskGuard {
    fn zero() -> Self {
        // SAFETY: umask is async-signal-safe and always succeeds
        UmaskGuard(unsafe { libc::umask(0) })
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        unsafe {
            libc::umask(self.0);
        }
    }
}

impl ShadowSysfs {
    pub fn new(
        basedir: impl Into<PathBuf>,
        apbusdir: impl Into<PathBuf>,
        apdevsdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            basedir: basedir.into(),
            apbusdir: apbusdir.into(),
            apdevsdir: apdevsdir.into(),
        }
    }

    /// Ensure the base directory exists and is usable.
    ///
    /// Normally an init container prepares it; creating it here keeps a bare
    /// host working too.
    pub fn init_base_dir(&self) -> ShadowSysfsResult<()> {
        match fs::metadata(&self.basedir) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.basedir).map_err(|e| ShadowSysfsError::MakeDir {
                    path: self.basedir.display().to_string(),
                    source: e,
                })?;
                info!("Shadow base directory {} created", self.basedir.display());
                Ok(())
            }
            Err(e) => Err(ShadowSysfsError::InvalidBaseDir(
                self.basedir.display().to_string(),
                e.to_string(),
            )),
            Ok(info) if !info.is_dir() => Err(ShadowSysfsError::InvalidBaseDir(
                self.basedir.display().to_string(),
                "not a directory".to_string(),
            )),
            Ok(_) => Ok(()),
        }
    }

    /// Build the complete shadow tree for one plugin device id.
    ///
    /// `livesysfs` selects between static counter files and symlinks into the
    /// (later over-mounted) queue directory. On any failure the whole
    /// `sysfs-<id>` subtree is removed again.
    pub fn make_shadow_ap_sysfs(
        &self,
        id: &str,
        livesysfs: bool,
        adapter: u16,
        domain: u16,
    ) -> ShadowSysfsResult<ShadowTree> {
        let _umask = UmaskGuard::zero();

        let shadowdir = self.shadow_dir(id);
        // a stale tree from an earlier life of this id is replaced wholesale
        let _ = fs::remove_dir_all(&shadowdir);
        make_dir(&shadowdir)?;

        match self.build_tree(&shadowdir, livesysfs, adapter, domain) {
            Ok(tree) => {
                info!("Shadow dir {} created", shadowdir.display());
                Ok(tree)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&shadowdir);
                Err(e)
            }
        }
    }

    fn build_tree(
        &self,
        shadowdir: &Path,
        livesysfs: bool,
        adapter: u16,
        domain: u16,
    ) -> ShadowSysfsResult<ShadowTree> {
        let carddir = format!("card{:02x}", adapter);
        let queuedir = format!("{:02x}.{:04x}", adapter, domain);

        // shadow sys/bus/ap
        let shadowapbusdir = shadowdir.join("bus/ap");
        make_dir(&shadowapbusdir)?;
        copy_files(&self.apbusdir, &shadowapbusdir, SYS_BUS_AP_COPYFILES)?;
        maybe_copy_files(&self.apbusdir, &shadowapbusdir, SYS_BUS_AP_MAYBECOPYFILES)?;
        make_file(
            &shadowapbusdir.join("ap_adapter_mask"),
            &encode_256bit_mask(0x00, &[adapter]),
        )?;
        make_file(
            &shadowapbusdir.join("ap_control_domain_mask"),
            &encode_256bit_mask(0x00, &[]),
        )?;
        make_file(&shadowapbusdir.join("ap_domain"), &format!("{}\n", domain))?;
        make_file(
            &shadowapbusdir.join("apmask"),
            &encode_256bit_mask(0xff, &[]),
        )?;
        make_file(
            &shadowapbusdir.join("ap_usage_domain_mask"),
            &encode_256bit_mask(0x00, &[domain]),
        )?;
        make_file(
            &shadowapbusdir.join("aqmask"),
            &encode_256bit_mask(0xff, &[]),
        )?;

        // shadow sys/devices/ap
        let shadowapdevsdir = shadowdir.join("devices/ap");
        make_dir(&shadowapdevsdir)?;

        // shadow sys/devices/ap/card<xx>
        let apcarddir = self.apdevsdir.join(&carddir);
        let shadowcarddir = shadowapdevsdir.join(&carddir);
        make_dir(&shadowcarddir)?;
        copy_files(&apcarddir, &shadowcarddir, SYS_DEVICES_AP_CARD_COPYFILES)?;
        maybe_copy_files(&apcarddir, &shadowcarddir, SYS_DEVICES_AP_CARD_MAYBECOPYFILES)?;
        if livesysfs {
            for (name, value) in SYS_DEVICES_AP_CARD_FILESWITHVALUE_LIVE {
                make_file(&shadowcarddir.join(name), value)?;
            }
            for name in SYS_DEVICES_AP_CARD_LINKS_TO_QUEUEDIR {
                make_link(&shadowcarddir.join(name), &format!("{}/{}", queuedir, name))?;
            }
        } else {
            for (name, value) in SYS_DEVICES_AP_CARD_FILESWITHVALUE {
                make_file(&shadowcarddir.join(name), value)?;
            }
        }
        make_link(
            &shadowcarddir.join("driver"),
            "../../../bus/ap/drivers/cex4card",
        )?;
        make_link(&shadowcarddir.join("subsystem"), "../../../bus/ap")?;

        // shadow sys/devices/ap/card<xx>/<xx>.<yyyy>
        let apqueuedir = apcarddir.join(&queuedir);
        let shadowqueuedir = shadowcarddir.join(&queuedir);
        make_dir(&shadowqueuedir)?;
        copy_files(&apqueuedir, &shadowqueuedir, SYS_DEVICES_AP_QUEUE_COPYFILES)?;
        maybe_copy_files(
            &apqueuedir,
            &shadowqueuedir,
            SYS_DEVICES_AP_QUEUE_MAYBECOPYFILES,
        )?;
        for (name, value) in SYS_DEVICES_AP_QUEUE_FILESWITHVALUE {
            make_file(&shadowqueuedir.join(name), value)?;
        }
        make_link(
            &shadowqueuedir.join("driver"),
            "../../../../bus/ap/drivers/cex4queue",
        )?;
        make_link(&shadowqueuedir.join("subsystem"), "../../../../bus/ap")?;

        // shadow sys/bus/ap/devices back-links
        let shadowapdevicesdir = shadowapbusdir.join("devices");
        make_dir(&shadowapdevicesdir)?;
        make_link(
            &shadowapdevicesdir.join(&carddir),
            &format!("../../../devices/ap/{}", carddir),
        )?;
        make_link(
            &shadowapdevicesdir.join(&queuedir),
            &format!("../../../devices/ap/{}/{}", carddir, queuedir),
        )?;

        // shadow sys/bus/ap/drivers
        make_dir(&shadowapbusdir.join("drivers"))?;
        make_dir(&shadowapbusdir.join("drivers/cex4card"))?;
        make_link(
            &shadowapbusdir.join("drivers/cex4card").join(&carddir),
            &format!("../../../../devices/ap/{}", carddir),
        )?;
        make_dir(&shadowapbusdir.join("drivers/cex4queue"))?;
        make_link(
            &shadowapbusdir.join("drivers/cex4queue").join(&queuedir),
            &format!("../../../../devices/ap/{}/{}", carddir, queuedir),
        )?;

        Ok(ShadowTree {
            busdir: shadowapbusdir,
            devsdir: shadowapdevsdir,
        })
    }

    /// Live mode: link the real host queue directory into the shadow tree and
    /// hand back the mount that puts it over the container's queue path.
    pub fn add_live_mount(
        &self,
        id: &str,
        adapter: u16,
        domain: u16,
    ) -> ShadowSysfsResult<MountPair> {
        let shadowdir = self.shadow_dir(id);
        let queuedir = format!("{:02x}.{:04x}", adapter, domain);
        let apqueuedir = self
            .apdevsdir
            .join(format!("card{:02x}", adapter))
            .join(&queuedir);

        let linksrc = shadowdir.join("tmp_bus");
        make_link(&linksrc, &apqueuedir.display().to_string())?;

        info!(
            "Container gets live access to host's {}",
            apqueuedir.display()
        );
        Ok(MountPair {
            host_path: linksrc.display().to_string(),
            container_path: format!("{}/devices/{}", self.apbusdir.display(), queuedir),
        })
    }

    /// List the shadow tree names currently present below the base dir.
    pub fn fetch_active_shadows(&self) -> ShadowSysfsResult<Vec<String>> {
        let mut shadows = Vec::new();
        match fs::read_dir(&self.basedir) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(shadows),
            Err(e) => Err(ShadowSysfsError::CopyRead {
                path: self.basedir.display().to_string(),
                source: e,
            }),
            Ok(entries) => {
                for entry in entries {
                    let entry = entry.map_err(|e| ShadowSysfsError::CopyRead {
                        path: self.basedir.display().to_string(),
                        source: e,
                    })?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with(SHADOW_DIR_PREFIX) {
                        shadows.push(name);
                    }
                }
                Ok(shadows)
            }
        }
    }

    /// Remove one shadow tree, named as returned by [`fetch_active_shadows`].
    pub fn delete_shadow(&self, shadowname: &str) {
        let dir = self.basedir.join(shadowname);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove shadow dir {}: {}", dir.display(), e);
            }
        }
    }

    fn shadow_dir(&self, id: &str) -> PathBuf {
        self.basedir.join(format!("sysfs-{}", id))
    }
}

fn make_dir(dir: &Path) -> ShadowSysfsResult<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(SHADOW_DIR_MODE)
        .create(dir)
        .map_err(|e| ShadowSysfsError::MakeDir {
            path: dir.display().to_string(),
            source: e,
        })
}

fn make_file(path: &Path, content: &str) -> ShadowSysfsResult<()> {
    use std::io::Write;
    let mut f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SHADOW_FILE_MODE)
        .open(path)
        .map_err(|e| ShadowSysfsError::MakeFile {
            path: path.display().to_string(),
            source: e,
        })?;
    f.write_all(content.as_bytes())
        .map_err(|e| ShadowSysfsError::MakeFile {
            path: path.display().to_string(),
            source: e,
        })
}

fn copy_file(src: &Path, dst: &Path) -> ShadowSysfsResult<()> {
    let rawdata = fs::read(src).map_err(|e| ShadowSysfsError::CopyRead {
        path: src.display().to_string(),
        source: e,
    })?;
    use std::io::Write;
    let mut f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SHADOW_FILE_MODE)
        .open(dst)
        .map_err(|e| ShadowSysfsError::MakeFile {
            path: dst.display().to_string(),
            source: e,
        })?;
    f.write_all(&rawdata).map_err(|e| ShadowSysfsError::MakeFile {
        path: dst.display().to_string(),
        source: e,
    })
}

fn copy_files(srcdir: &Path, dstdir: &Path, files: &[&str]) -> ShadowSysfsResult<()> {
    for f in files {
        copy_file(&srcdir.join(f), &dstdir.join(f))?;
    }
    Ok(())
}

fn maybe_copy_files(srcdir: &Path, dstdir: &Path, files: &[&str]) -> ShadowSysfsResult<()> {
    for f in files {
        let src = srcdir.join(f);
        if src.exists() {
            copy_file(&src, &dstdir.join(f))?;
        }
    }
    Ok(())
}

fn make_link(src: &Path, dst: &str) -> ShadowSysfsResult<()> {
    std::os::unix::fs::symlink(dst, src).map_err(|e| ShadowSysfsError::MakeLink {
        src: src.display().to_string(),
        dst: dst.to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::decode_256bit_mask;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        shadow: ShadowSysfs,
        basedir: PathBuf,
    }

    /// A minimal host AP sysfs with one card/queue pair.
    fn fixture(adapter: u16, domain: u16) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let busdir = tmp.path().join("sys/bus/ap");
        let devsdir = tmp.path().join("sys/devices/ap");
        let basedir = tmp.path().join("shadowbase");
        fs::create_dir_all(&busdir).unwrap();
        for f in SYS_BUS_AP_COPYFILES {
            fs::write(busdir.join(f), "0\n").unwrap();
        }
        let carddir = devsdir.join(format!("card{:02x}", adapter));
        let queuedir = carddir.join(format!("{:02x}.{:04x}", adapter, domain));
        fs::create_dir_all(&queuedir).unwrap();
        for f in SYS_DEVICES_AP_CARD_COPYFILES {
            fs::write(carddir.join(f), "x\n").unwrap();
        }
        for f in SYS_DEVICES_AP_QUEUE_COPYFILES {
            fs::write(queuedir.join(f), "y\n").unwrap();
        }
        fs::create_dir_all(&basedir).unwrap();
        let shadow = ShadowSysfs::new(&basedir, &busdir, &devsdir);
        Fixture {
            _tmp: tmp,
            shadow,
            basedir,
        }
    }

    #[test]
    fn test_static_shadow_masks_and_files() {
        let fx = fixture(3, 4);
        let tree = fx
            .shadow
            .make_shadow_ap_sysfs("apqn-3-4-0", false, 3, 4)
            .unwrap();

        let adapter_mask =
            fs::read_to_string(tree.busdir.join("ap_adapter_mask")).unwrap();
        assert_eq!(decode_256bit_mask(&adapter_mask).unwrap(), vec![3]);
        let usage_mask =
            fs::read_to_string(tree.busdir.join("ap_usage_domain_mask")).unwrap();
        assert_eq!(decode_256bit_mask(&usage_mask).unwrap(), vec![4]);
        let control_mask =
            fs::read_to_string(tree.busdir.join("ap_control_domain_mask")).unwrap();
        assert!(decode_256bit_mask(&control_mask).unwrap().is_empty());
        assert_eq!(
            decode_256bit_mask(&fs::read_to_string(tree.busdir.join("apmask")).unwrap())
                .unwrap()
                .len(),
            256
        );
        assert_eq!(
            fs::read_to_string(tree.busdir.join("ap_domain")).unwrap(),
            "4\n"
        );

        // static counter files on the card
        let card = tree.devsdir.join("card03");
        assert_eq!(fs::read_to_string(card.join("online")).unwrap(), "1\n");
        assert_eq!(
            fs::read_to_string(card.join("request_count")).unwrap(),
            "0\n"
        );
        assert!(card.join("online").is_file());
        assert!(!card.join("online").is_symlink());

        // copied files made it over
        assert_eq!(fs::read_to_string(card.join("type")).unwrap(), "x\n");
        assert_eq!(
            fs::read_to_string(card.join("03.0004/interrupt")).unwrap(),
            "y\n"
        );
    }

    #[test]
    fn test_live_shadow_links_counters() {
        let fx = fixture(3, 4);
        let tree = fx
            .shadow
            .make_shadow_ap_sysfs("apqn-3-4-0", true, 3, 4)
            .unwrap();

        let card = tree.devsdir.join("card03");
        assert_eq!(fs::read_to_string(card.join("load")).unwrap(), "0\n");
        for name in SYS_DEVICES_AP_CARD_LINKS_TO_QUEUEDIR {
            let link = card.join(name);
            assert!(link.is_symlink(), "{} should be a symlink", name);
            assert_eq!(
                fs::read_link(&link).unwrap(),
                PathBuf::from(format!("03.0004/{}", name))
            );
        }
    }

    #[test]
    fn test_link_chains() {
        let fx = fixture(0x0a, 0x11);
        let tree = fx
            .shadow
            .make_shadow_ap_sysfs("apqn-10-17-0", false, 0x0a, 0x11)
            .unwrap();

        assert_eq!(
            fs::read_link(tree.busdir.join("devices/card0a")).unwrap(),
            PathBuf::from("../../../devices/ap/card0a")
        );
        assert_eq!(
            fs::read_link(tree.busdir.join("devices/0a.0011")).unwrap(),
            PathBuf::from("../../../devices/ap/card0a/0a.0011")
        );
        assert_eq!(
            fs::read_link(tree.busdir.join("drivers/cex4card/card0a")).unwrap(),
            PathBuf::from("../../../../devices/ap/card0a")
        );
        assert_eq!(
            fs::read_link(tree.busdir.join("drivers/cex4queue/0a.0011")).unwrap(),
            PathBuf::from("../../../../devices/ap/card0a/0a.0011")
        );
        let card = tree.devsdir.join("card0a");
        assert_eq!(
            fs::read_link(card.join("driver")).unwrap(),
            PathBuf::from("../../../bus/ap/drivers/cex4card")
        );
        assert_eq!(
            fs::read_link(card.join("0a.0011/subsystem")).unwrap(),
            PathBuf::from("../../../../bus/ap")
        );
    }

    #[test]
    fn test_failure_removes_whole_tree() {
        let fx = fixture(3, 4);
        // break the host side: a required bus file is missing
        fs::remove_file(
            fx.shadow
                .apbusdir
                .join("ap_interrupts"),
        )
        .unwrap();
        let err = fx.shadow.make_shadow_ap_sysfs("apqn-3-4-0", false, 3, 4);
        assert!(err.is_err());
        assert!(!fx.basedir.join("sysfs-apqn-3-4-0").exists());
    }

    #[test]
    fn test_fetch_and_delete_shadows() {
        let fx = fixture(3, 4);
        fx.shadow
            .make_shadow_ap_sysfs("apqn-3-4-0", false, 3, 4)
            .unwrap();
        fs::create_dir_all(fx.basedir.join("unrelated")).unwrap();
        assert_eq!(
            fx.shadow.fetch_active_shadows().unwrap(),
            vec!["sysfs-apqn-3-4-0".to_string()]
        );
        fx.shadow.delete_shadow("sysfs-apqn-3-4-0");
        assert!(fx.shadow.fetch_active_shadows().unwrap().is_empty());
        // deleting again is fine
        fx.shadow.delete_shadow("sysfs-apqn-3-4-0");
    }

    #[test]
    fn test_live_mount_pair() {
        let fx = fixture(3, 4);
        fx.shadow
            .make_shadow_ap_sysfs("apqn-3-4-0", true, 3, 4)
            .unwrap();
        let pair = fx.shadow.add_live_mount("apqn-3-4-0", 3, 4).unwrap();
        assert!(pair.host_path.ends_with("sysfs-apqn-3-4-0/tmp_bus"));
        assert!(pair.container_path.ends_with("/devices/03.0004"));
        let link = fx.basedir.join("sysfs-apqn-3-4-0/tmp_bus");
        assert!(link.is_symlink());
    }

    #[test]
    fn test_init_base_dir_creates_missing() {
        let tmp = TempDir::new().unwrap();
        let shadow = ShadowSysfs::new(
            tmp.path().join("newbase"),
            tmp.path().join("bus"),
            tmp.path().join("devs"),
        );
        shadow.init_base_dir().unwrap();
        assert!(tmp.path().join("newbase").is_dir());
        // idempotent
        shadow.init_base_dir().unwrap();
    }
}
