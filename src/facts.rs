// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Gathering everything known about the drive behind an OSD, from whichever source still has it.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    history::{HistoryEntry, HistoryIndex, UNKNOWN},
    slots::{BusEntry, DeviceClass},
    system::{HealthReport, LocalNode},
    Error,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    /// The device node is gone. That alone proves the drive failed.
    Absent,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded(summary) => write!(f, "degraded: {summary}"),
            HealthStatus::Absent => write!(f, "absent"),
        }
    }
}

/// What to do with the drive once its facts are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The drive is gone or unwell: go ahead with the removal.
    Proceed,
    /// The drive reports healthy and the kernel has said nothing about it. Whatever is wrong
    /// with the OSD, pulling this drive will not fix it.
    NotADiskIssue,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Verdict::Proceed => "proceed",
                Verdict::NotADiskIssue => "not a disk issue",
            }
        )
    }
}

/// Everything learned about one failed drive during one invocation. Fields are filled in as they
/// are resolved, so a record handed back with an error shows exactly how far things got.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriveRecord {
    pub osd_id: u32,
    /// The OSD fsid, read from the data directory. Ceph reuses ids; the fsid is never reused.
    pub fsid: Option<String>,
    /// The source of the OSD data directory mount.
    pub partition: Option<String>,
    /// The whole-disk device node.
    pub device: Option<String>,
    pub device_present: Option<bool>,
    /// The bus address the device is currently enumerated at.
    pub bus_address: Option<String>,
    pub bay: Option<u32>,
    pub serial: Option<String>,
    pub aux_device: Option<String>,
    pub health: Option<HealthStatus>,
    /// Recent kernel log lines that mention the device.
    pub kernel_mentions: Vec<String>,
}

/// The machine-readable result handed from the storage node to the controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResultPayload {
    pub disk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bay: Option<String>,
    pub serial: String,
    pub aux_device: String,
    pub health: String,
}

fn or_unknown(field: &Option<String>) -> String {
    field.clone().unwrap_or_else(|| UNKNOWN.to_string())
}

impl DriveRecord {
    pub fn new(osd_id: u32) -> Self {
        DriveRecord {
            osd_id,
            ..Default::default()
        }
    }

    pub fn payload(&self) -> ResultPayload {
        ResultPayload {
            disk: or_unknown(&self.device),
            bay: self.bay.map(|b| b.to_string()),
            serial: or_unknown(&self.serial),
            aux_device: or_unknown(&self.aux_device),
            health: self
                .health
                .as_ref()
                .map(|h| h.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }

    /// A human-readable listing of every field, resolved or not.
    pub fn dump(&self) -> String {
        let presence = match self.device_present {
            Some(true) => " (present)",
            Some(false) => " (absent)",
            None => "",
        };
        let mut out = format!("osd:         osd.{}\n", self.osd_id);
        out += &format!("fsid:        {}\n", or_unknown(&self.fsid));
        out += &format!("partition:   {}\n", or_unknown(&self.partition));
        out += &format!("device:      {}{presence}\n", or_unknown(&self.device));
        out += &format!("bus address: {}\n", or_unknown(&self.bus_address));
        out += &format!(
            "bay:         {}\n",
            self.bay.map(|b| b.to_string()).unwrap_or(UNKNOWN.to_string())
        );
        out += &format!("serial:      {}\n", or_unknown(&self.serial));
        out += &format!("aux device:  {}\n", or_unknown(&self.aux_device));
        out += &format!(
            "health:      {}\n",
            self.health
                .as_ref()
                .map(|h| h.to_string())
                .unwrap_or(UNKNOWN.to_string())
        );
        out += &format!("kernel log:  {} recent mention(s)\n", self.kernel_mentions.len());
        for line in self.kernel_mentions.iter().rev().take(5).rev() {
            out += &format!("    {line}\n");
        }
        out
    }
}

/// Strip the partition number off a partition device node: `/dev/sdq1` becomes `/dev/sdq`, and
/// `/dev/nvme0n1p3` becomes `/dev/nvme0n1`.
pub fn strip_partition(partition: &str) -> &str {
    let trimmed = partition.trim_end_matches(|c: char| c.is_ascii_digit());
    match trimmed.strip_suffix('p') {
        Some(base) if base.ends_with(|c: char| c.is_ascii_digit()) => base,
        _ => trimmed,
    }
}

/// Remove `.` and `..` components without touching the filesystem; the target of a link may no
/// longer exist.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolves the fields of a `DriveRecord` for one OSD.
pub struct Collector<'a> {
    config: &'a Config,
    node: &'a LocalNode<'a>,
    history: &'a HistoryIndex,
    entries: &'a [BusEntry],
}

impl<'a> Collector<'a> {
    pub fn new(
        config: &'a Config,
        node: &'a LocalNode<'a>,
        history: &'a HistoryIndex,
        entries: &'a [BusEntry],
    ) -> Self {
        Collector {
            config,
            node,
            history,
            entries,
        }
    }

    /// Fill in `record`. Only an unmounted data directory, or a failure to read the kernel log
    /// when it is needed, is fatal; everything else degrades to "unknown".
    pub fn collect(&self, record: &mut DriveRecord) -> Result<Verdict, Error> {
        self.resolve_partition(record)?;
        self.resolve_fsid(record);
        self.resolve_device(record);
        self.resolve_serial(record);
        self.resolve_aux_device(record);
        self.resolve_health(record);
        self.corroborate(record)
    }

    /// The OSDs whose data directories are currently mounted on this host, in ascending order.
    pub fn mounted_osds(&self) -> Result<Vec<u32>, Error> {
        let mut ids: Vec<u32> = self
            .node
            .mounts
            .mounts()?
            .iter()
            .filter_map(|m| self.config.parse_osd_dir(&m.target))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Resolve just what the snapshot log keeps for one OSD. Nothing here is fatal; an OSD whose
    /// data directory is not mounted has nothing worth recording.
    pub fn snapshot(&self, osd_id: u32) -> Option<HistoryEntry> {
        let mut record = DriveRecord::new(osd_id);
        if let Err(e) = self.resolve_partition(&mut record) {
            log::debug!("skipping osd.{osd_id}: {e}");
            return None;
        }
        self.resolve_device(&mut record);
        self.resolve_serial(&mut record);
        self.resolve_aux_device(&mut record);
        Some(HistoryEntry::new(osd_id, record.aux_device, record.serial))
    }

    fn resolve_partition(&self, record: &mut DriveRecord) -> Result<(), Error> {
        let dir = self.config.osd_dir(record.osd_id);
        match self.node.mounts.mount_source(&dir)? {
            Some(source) => {
                log::debug!("{} is mounted from {source}", dir.display());
                record.partition = Some(source);
                Ok(())
            }
            None => Err(Error::NotMounted {
                osd_id: record.osd_id,
                path: dir.display().to_string(),
            }),
        }
    }

    fn resolve_fsid(&self, record: &mut DriveRecord) {
        let path = self.config.osd_dir(record.osd_id).join("fsid");
        record.fsid = self
            .node
            .fs
            .read_file(&path)
            .map(|contents| contents.trim().to_string())
            .filter(|fsid| !fsid.is_empty());
        if record.fsid.is_none() {
            log::warn!("could not read {}", path.display());
        }
    }

    fn resolve_device(&self, record: &mut DriveRecord) {
        let Some(partition) = record.partition.as_deref() else {
            return;
        };

        record.device = if partition == self.config.removal.volume_manager_sentinel {
            self.volume_device(record.osd_id)
        } else {
            Some(strip_partition(partition).to_string())
        };

        record.device_present = Some(match &record.device {
            Some(dev) => self.node.fs.exists(Path::new(dev)),
            None => false,
        });

        record.bus_address = record.device.as_deref().and_then(|dev| {
            self.entries
                .iter()
                .find(|e| e.class == DeviceClass::Disk && e.device.as_deref() == Some(dev))
                .map(|e| e.address.clone())
        });
    }

    /// Follow the OSD's `block` link (`/dev/<vg>/<lv>`) to its volume group, and the volume group
    /// to the disk it lives on.
    fn volume_device(&self, osd_id: u32) -> Option<String> {
        let block = self.config.osd_dir(osd_id).join("block");
        let Some(target) = self.node.fs.read_link(&block) else {
            log::warn!("{} is not a link; cannot find its volume group", block.display());
            return None;
        };
        let Some(vg) = target
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
        else {
            log::warn!("cannot find a volume group in {}", target.display());
            return None;
        };

        match self.node.volumes.physical_volume(vg) {
            // A missing physical volume is listed as "[unknown]".
            Ok(Some(pv)) if pv.starts_with("/dev/") => Some(strip_partition(&pv).to_string()),
            Ok(_) => {
                log::warn!("volume group {vg} has no physical volume on this host");
                None
            }
            Err(e) => {
                log::warn!("could not look up the physical volume of {vg}: {e}");
                None
            }
        }
    }

    fn resolve_serial(&self, record: &mut DriveRecord) {
        if let (Some(dev), Some(true)) = (&record.device, record.device_present) {
            match self.node.health.serial(dev) {
                Ok(serial) => {
                    record.serial = Some(serial);
                    return;
                }
                Err(e) => log::warn!("could not read serial number from {dev}: {e}"),
            }
        }

        record.serial = self
            .history
            .latest(record.osd_id)
            .and_then(|e| e.serial.clone());
        if record.serial.is_none() {
            log::warn!("serial number of osd.{} is unknown", record.osd_id);
        }
    }

    fn resolve_aux_device(&self, record: &mut DriveRecord) {
        let dir = self.config.osd_dir(record.osd_id);
        for link in ["journal", "block.db"] {
            if let Some(target) = self.follow(&dir.join(link)) {
                record.aux_device = Some(target.display().to_string());
                return;
            }
        }

        record.aux_device = self
            .history
            .latest(record.osd_id)
            .and_then(|e| e.aux_device.clone());
        if record.aux_device.is_none() {
            log::warn!("auxiliary device of osd.{} is unknown", record.osd_id);
        }
    }

    /// Follow a chain of links (e.g. `journal` -> `/dev/disk/by-partuuid/...` -> `../../sdbk1`)
    /// to the final path. `None` if `path` is not a link.
    fn follow(&self, path: &Path) -> Option<PathBuf> {
        const MAX_HOPS: usize = 8;

        let mut current = path.to_path_buf();
        let mut hops = 0;
        while let Some(next) = self.node.fs.read_link(&current) {
            let base = current.parent().map(Path::to_path_buf).unwrap_or_default();
            current = normalize(&base.join(next));
            hops += 1;
            if hops == MAX_HOPS {
                break;
            }
        }
        (hops > 0).then_some(current)
    }

    fn resolve_health(&self, record: &mut DriveRecord) {
        record.health = match (&record.device, record.device_present) {
            (Some(dev), Some(true)) => match self.node.health.health(dev) {
                Ok(HealthReport::Healthy) => Some(HealthStatus::Healthy),
                Ok(HealthReport::Degraded(summary)) => Some(HealthStatus::Degraded(summary)),
                Err(e) => {
                    log::warn!("could not check the health of {dev}: {e}");
                    None
                }
            },
            _ => Some(HealthStatus::Absent),
        };
    }

    /// A drive that is present and reports healthy is only treated as failed if the kernel has
    /// been complaining about it.
    fn corroborate(&self, record: &mut DriveRecord) -> Result<Verdict, Error> {
        let Some(HealthStatus::Healthy) = record.health else {
            return Ok(Verdict::Proceed);
        };
        let Some(dev) = record.device.as_deref() else {
            return Ok(Verdict::Proceed);
        };

        let mut needles = vec![Path::new(dev)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(dev)
            .to_string()];
        needles.extend(record.bus_address.clone());

        record.kernel_mentions = self.node.kernel_log.mentions(&needles)?;
        if record.kernel_mentions.is_empty() {
            Ok(Verdict::NotADiskIssue)
        } else {
            Ok(Verdict::Proceed)
        }
    }
}

impl Verdict {
    /// Turn a `NotADiskIssue` verdict into the error that stops a removal.
    pub fn into_result(self, record: &DriveRecord) -> Result<(), Error> {
        match self {
            Verdict::Proceed => Ok(()),
            Verdict::NotADiskIssue => Err(Error::NotADiskIssue {
                device: or_unknown(&record.device),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions() {
        assert_eq!(strip_partition("/dev/sdq1"), "/dev/sdq");
        assert_eq!(strip_partition("/dev/sdbk12"), "/dev/sdbk");
        assert_eq!(strip_partition("/dev/sdp1"), "/dev/sdp");
        assert_eq!(strip_partition("/dev/nvme0n1p3"), "/dev/nvme0n1");
        assert_eq!(strip_partition("/dev/sdq"), "/dev/sdq");
    }

    #[test]
    fn normalize_relative_links() {
        assert_eq!(
            normalize(Path::new("/dev/disk/by-partuuid/../../sdbk1")),
            PathBuf::from("/dev/sdbk1")
        );
    }

    #[test]
    fn payload_of_sparse_record() {
        let mut record = DriveRecord::new(4);
        record.device = Some("/dev/sdq".to_string());
        record.health = Some(HealthStatus::Absent);
        let payload = record.payload();
        assert_eq!(payload.bay, None);
        assert_eq!(payload.serial, "unknown");
        assert_eq!(payload.health, "absent");

        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("bay"));
        let back: ResultPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn dump_lists_every_field() {
        let dump = DriveRecord::new(9).dump();
        let fields = [
            "osd:", "fsid:", "partition:", "device:", "bay:", "serial:", "aux device:", "health:",
        ];
        for field in fields {
            assert!(dump.contains(field), "missing {field} in {dump}");
        }
    }
}
