// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Host-facing adapters: the mount table, systemd, and the enclosure LEDs.

use std::path::{Path, PathBuf};

use nix::{
    errno::Errno,
    mount::{umount2, MntFlags},
};

use super::*;

const PROC_MOUNTS: &str = "/proc/self/mounts";

pub struct ProcMounts;

impl MountTable for ProcMounts {
    fn mounts(&self) -> Result<Vec<Mount>, SourceError> {
        let contents =
            std::fs::read_to_string(PROC_MOUNTS).map_err(|error| SourceError::Io {
                path: PROC_MOUNTS.to_string(),
                error,
            })?;
        parse_mounts(&contents)
    }

    fn force_unmount(&self, path: &Path) -> Result<(), SourceError> {
        let io_err = |errno: Errno| SourceError::Io {
            path: path.display().to_string(),
            error: std::io::Error::from(errno),
        };

        match umount2(path, MntFlags::MNT_FORCE) {
            Ok(()) => Ok(()),
            // Not a mount point (any more).
            Err(Errno::EINVAL) => {
                log::debug!("{} is not mounted", path.display());
                Ok(())
            }
            Err(Errno::EBUSY) => {
                log::warn!(
                    "{} is busy after forced unmount; detaching lazily",
                    path.display()
                );
                umount2(path, MntFlags::MNT_DETACH).map_err(io_err)
            }
            Err(e) => Err(io_err(e)),
        }
    }
}

/// Undo the octal escaping that the kernel applies to whitespace in mount table fields.
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

pub fn parse_mounts(contents: &str) -> Result<Vec<Mount>, SourceError> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(source), Some(target)) => Ok(Mount {
                    source: unescape_mount_field(source),
                    target: PathBuf::from(unescape_mount_field(target)),
                }),
                _ => Err(SourceError::Parse {
                    what: "mount entry",
                    line: line.to_string(),
                }),
            }
        })
        .collect()
}

pub struct Systemd;

impl ServiceControl for Systemd {
    fn stop(&self, unit: &str) -> Result<(), SourceError> {
        run("systemctl", &["stop", unit]).map(|_| ())
    }

    fn disable(&self, unit: &str) -> Result<(), SourceError> {
        run("systemctl", &["disable", unit]).map(|_| ())
    }
}

/// Enclosure LEDs through `ledctl`.
pub struct Ledctl;

impl IndicatorLight for Ledctl {
    fn set(&self, indicator: &Indicator) -> Result<(), SourceError> {
        run("ledctl", &[&ledctl_pattern(indicator)]).map(|_| ())
    }
}

pub fn ledctl_pattern(indicator: &Indicator) -> String {
    match indicator {
        Indicator::Fault(device) => format!("failure={device}"),
        Indicator::LocateAllExcept(good) => format!("locate={}", good.join(",")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_table() {
        let contents = "\
/dev/sdq1 /var/lib/ceph/osd/ceph-12 xfs rw,noatime,attr2,inode64 0 0
tmpfs /var/lib/ceph/osd/ceph-13 tmpfs rw,relatime 0 0
/dev/sda2 /mnt/with\\040space ext4 rw 0 0
";
        let mounts = parse_mounts(contents).unwrap();
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[1].source, "tmpfs");
        assert_eq!(mounts[2].target, PathBuf::from("/mnt/with space"));
        assert!(parse_mounts("lonely\n").is_err());
    }

    #[test]
    fn mount_source_prefers_last_mount() {
        struct Fixed(Vec<Mount>);
        impl MountTable for Fixed {
            fn mounts(&self) -> Result<Vec<Mount>, SourceError> {
                Ok(self.0.clone())
            }
            fn force_unmount(&self, _path: &Path) -> Result<(), SourceError> {
                Ok(())
            }
        }

        let dir = PathBuf::from("/var/lib/ceph/osd/ceph-1");
        let table = Fixed(vec![
            Mount {
                source: "/dev/sdb1".to_string(),
                target: dir.clone(),
            },
            Mount {
                source: "tmpfs".to_string(),
                target: dir.clone(),
            },
        ]);
        assert_eq!(table.mount_source(&dir).unwrap().as_deref(), Some("tmpfs"));
        assert_eq!(table.mount_source(Path::new("/nope")).unwrap(), None);
    }

    #[test]
    fn led_patterns() {
        assert_eq!(
            ledctl_pattern(&Indicator::Fault("/dev/sdq".to_string())),
            "failure=/dev/sdq"
        );
        assert_eq!(
            ledctl_pattern(&Indicator::LocateAllExcept(vec![
                "/dev/sda".to_string(),
                "/dev/sdb".to_string()
            ])),
            "locate=/dev/sda,/dev/sdb"
        );
    }
}
