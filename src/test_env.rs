// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! In-memory stand-ins for everything outside the program, so that whole removals can be run in
//! tests without a chassis, a kernel or a cluster.

use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::{
    config::{ChassisConfig, Config},
    facts::ResultPayload,
    slots::{BusEntry, SlotAddress},
    system::*,
};

/// Given a relative `path` in the test directory, prepend the
/// full path to the test directory.
pub fn test_path(path: &str) -> String {
    std::env::var("CARGO_MANIFEST_DIR").unwrap() + "/tests/" + path
}

/// Create an empty private directory for the test named `test_id` and return its path. Anything
/// left over from a previous run is removed first.
pub fn test_dir(test_id: &str) -> String {
    let dir = test_path(&format!("test_output/{test_id}"));
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => panic!("Could not clean up test directory: {e}"),
    };
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn failed(command: &str) -> SourceError {
    SourceError::Failed {
        command: command.to_string(),
        status: Some(1),
        stderr: "injected failure".to_string(),
    }
}

/// The device node the fake kernel assigns to the disk at `index`: `/dev/sda`, ..., `/dev/sdz`,
/// `/dev/sdaa`, ...
pub fn sd_name(index: u32) -> String {
    let mut n = index as usize;
    let mut letters = String::new();
    loop {
        letters.insert(0, (b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    format!("/dev/sd{letters}")
}

/// The fsid `FakeNode::with_osd` gives `osd_id` when it lives on the disk at `lun`.
pub fn fsid(osd_id: u32, lun: u32) -> String {
    format!("fsid-{osd_id}-{lun}")
}

/// A storage node. Every field is public so that a test can arrange exactly the host it needs
/// before calling `node()`.
pub struct FakeNode {
    pub entries: Vec<BusEntry>,
    /// Device nodes that exist.
    pub present: HashSet<String>,
    pub links: HashMap<PathBuf, PathBuf>,
    /// Contents of regular files, such as an OSD's `fsid`.
    pub files: HashMap<PathBuf, String>,
    pub mounts: Mutex<Vec<Mount>>,
    pub health: HashMap<String, HealthReport>,
    pub serials: HashMap<String, String>,
    pub kernel_log: Vec<String>,
    pub kernel_log_fails: bool,
    /// Volume group to physical volume.
    pub physical_volumes: HashMap<String, String>,
    pub fail_services: bool,
    pub fail_leds: bool,
    calls: Mutex<Vec<String>>,
    indicators: Mutex<Vec<Indicator>>,
}

impl FakeNode {
    /// A fully populated chassis with no OSDs mounted. The disk at lun `l` is `sd_name(l)`.
    pub fn new(chassis: &ChassisConfig) -> Self {
        let mut entries = Vec::new();
        let mut present = HashSet::new();
        for lun in 0..=chassis.max_lun {
            let slot = SlotAddress::new(chassis.bus, chassis.target, lun);
            if chassis.is_enclosure(lun) {
                entries.push(BusEntry::enclosure(slot));
            } else {
                let device = sd_name(lun);
                present.insert(device.clone());
                entries.push(BusEntry::disk(slot, &device));
            }
        }

        FakeNode {
            entries,
            present,
            links: HashMap::new(),
            files: HashMap::new(),
            mounts: Mutex::new(Vec::new()),
            health: HashMap::new(),
            serials: HashMap::new(),
            kernel_log: Vec::new(),
            kernel_log_fails: false,
            physical_volumes: HashMap::new(),
            fail_services: false,
            fail_leds: false,
            calls: Mutex::new(Vec::new()),
            indicators: Mutex::new(Vec::new()),
        }
    }

    /// Mount `osd_id` from the first partition of the disk at `lun`. The disk reports healthy
    /// and answers with serial `SER<lun>`; the data directory holds `fsid(osd_id, lun)`.
    pub fn with_osd(mut self, config: &Config, osd_id: u32, lun: u32) -> Self {
        let device = sd_name(lun);
        let dir = config.osd_dir(osd_id);
        self.files.insert(dir.join("fsid"), format!("{}\n", fsid(osd_id, lun)));
        self.mount(&format!("{device}1"), dir);
        self.health.insert(device.clone(), HealthReport::Healthy);
        self.serials.insert(device, format!("SER{lun}"));
        self
    }

    pub fn mount(&mut self, source: &str, target: PathBuf) {
        self.mounts.lock().unwrap().push(Mount {
            source: source.to_string(),
            target,
        });
    }

    /// Take the disk at `lun` off the bus and remove its device node.
    pub fn drop_lun(&mut self, lun: u32) {
        let device = sd_name(lun);
        self.entries.retain(|e| e.slot.lun != lun);
        self.present.remove(&device);
    }

    /// Move the disk at `from` to lun `to`, as a re-seat does. The device node is kept.
    pub fn reseat(&mut self, from: u32, to: u32) {
        for entry in self.entries.iter_mut().filter(|e| e.slot.lun == from) {
            entry.slot.lun = to;
            entry.address = format!("{}:0", entry.slot);
        }
    }

    pub fn link(&mut self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) {
        self.links.insert(from.into(), to.into());
    }

    /// Every mutating call made so far, e.g. `stop ceph-osd@12` or `umount /var/lib/...`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn indicators(&self) -> Vec<Indicator> {
        self.indicators.lock().unwrap().clone()
    }

    pub fn node(&self) -> LocalNode<'_> {
        LocalNode {
            bus: self,
            health: self,
            kernel_log: self,
            mounts: self,
            fs: self,
            volumes: self,
            services: self,
            leds: self,
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl BusEnumerator for FakeNode {
    fn enumerate(&self) -> Result<Vec<BusEntry>, SourceError> {
        Ok(self.entries.clone())
    }
}

impl DeviceHealth for FakeNode {
    fn health(&self, device: &str) -> Result<HealthReport, SourceError> {
        self.health
            .get(device)
            .cloned()
            .ok_or_else(|| failed(&format!("smartctl -H {device}")))
    }

    fn serial(&self, device: &str) -> Result<String, SourceError> {
        self.serials
            .get(device)
            .cloned()
            .ok_or_else(|| failed(&format!("smartctl -i {device}")))
    }
}

impl KernelLog for FakeNode {
    fn mentions(&self, needles: &[String]) -> Result<Vec<String>, SourceError> {
        if self.kernel_log_fails {
            return Err(failed("dmesg"));
        }
        Ok(self
            .kernel_log
            .iter()
            .filter(|line| needles.iter().any(|n| mentions_word(line, n)))
            .cloned()
            .collect())
    }
}

impl MountTable for FakeNode {
    fn mounts(&self) -> Result<Vec<Mount>, SourceError> {
        Ok(self.mounts.lock().unwrap().clone())
    }

    fn force_unmount(&self, path: &Path) -> Result<(), SourceError> {
        self.record(format!("umount {}", path.display()));
        self.mounts.lock().unwrap().retain(|m| m.target != path);
        Ok(())
    }
}

impl DeviceFs for FakeNode {
    fn exists(&self, path: &Path) -> bool {
        path.to_str().is_some_and(|p| self.present.contains(p))
    }

    fn read_link(&self, path: &Path) -> Option<PathBuf> {
        self.links.get(path).cloned()
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        self.files.get(path).cloned()
    }
}

impl VolumeManager for FakeNode {
    fn physical_volume(&self, volume_group: &str) -> Result<Option<String>, SourceError> {
        Ok(self.physical_volumes.get(volume_group).cloned())
    }
}

impl ServiceControl for FakeNode {
    fn stop(&self, unit: &str) -> Result<(), SourceError> {
        if self.fail_services {
            return Err(failed(&format!("systemctl stop {unit}")));
        }
        self.record(format!("stop {unit}"));
        Ok(())
    }

    fn disable(&self, unit: &str) -> Result<(), SourceError> {
        if self.fail_services {
            return Err(failed(&format!("systemctl disable {unit}")));
        }
        self.record(format!("disable {unit}"));
        Ok(())
    }
}

impl IndicatorLight for FakeNode {
    fn set(&self, indicator: &Indicator) -> Result<(), SourceError> {
        if self.fail_leds {
            return Err(failed("ledctl"));
        }
        self.indicators.lock().unwrap().push(indicator.clone());
        Ok(())
    }
}

/// A Ceph cluster that reports an OSD safe to destroy after `unsafe_polls` negative answers.
/// Purging an OSD removes it, after which `find` no longer knows it.
pub struct FakeCluster {
    pub osds: Mutex<HashMap<u32, OsdLocation>>,
    pub unsafe_polls: Mutex<u32>,
    pub fail_purge: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new(unsafe_polls: u32) -> Self {
        FakeCluster {
            osds: Mutex::new(HashMap::new()),
            unsafe_polls: Mutex::new(unsafe_polls),
            fail_purge: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_osd(self, osd_id: u32, host: &str, fsid: &str) -> Self {
        self.add_osd(osd_id, host, fsid);
        self
    }

    /// Create an OSD, as `ceph osd create` does when it hands out a free id.
    pub fn add_osd(&self, osd_id: u32, host: &str, fsid: &str) {
        self.osds.lock().unwrap().insert(
            osd_id,
            OsdLocation {
                host: host.to_string(),
                fsid: Some(fsid.to_string()),
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ClusterCoordinator for FakeCluster {
    fn find(&self, osd_id: u32) -> Result<Option<OsdLocation>, SourceError> {
        Ok(self.osds.lock().unwrap().get(&osd_id).cloned())
    }

    fn mark_out(&self, osd_id: u32) -> Result<(), SourceError> {
        self.record(format!("out {osd_id}"));
        Ok(())
    }

    fn safe_to_destroy(&self, osd_id: u32) -> Result<bool, SourceError> {
        self.record(format!("safe-to-destroy {osd_id}"));
        let mut remaining = self.unsafe_polls.lock().unwrap();
        if *remaining == 0 {
            return Ok(true);
        }
        *remaining -= 1;
        Ok(false)
    }

    fn purge(&self, osd_id: u32) -> Result<(), SourceError> {
        if self.fail_purge {
            return Err(failed(&format!("ceph osd purge {osd_id}")));
        }
        self.record(format!("purge {osd_id}"));
        self.osds.lock().unwrap().remove(&osd_id);
        Ok(())
    }
}

/// A storage node reached over the network that answers every removal with `payload`.
pub struct FakeRemote {
    pub payload: Option<ResultPayload>,
    calls: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new(payload: Option<ResultPayload>) -> Self {
        FakeRemote {
            payload,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl RemoteRunner for FakeRemote {
    fn remove(
        &self,
        host: &str,
        osd_id: u32,
        fsid: Option<&str>,
    ) -> Result<ResultPayload, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{host} remove {osd_id} {}", fsid.unwrap_or("-")));
        self.payload
            .clone()
            .ok_or_else(|| failed(&format!("ssh {host} osd-replace remove {osd_id}")))
    }
}

/// Wire a fake cluster and remote into a controller.
pub fn controller<'a>(cluster: &'a FakeCluster, remote: &'a FakeRemote) -> Controller<'a> {
    Controller { cluster, remote }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names() {
        assert_eq!(sd_name(0), "/dev/sda");
        assert_eq!(sd_name(25), "/dev/sdz");
        assert_eq!(sd_name(26), "/dev/sdaa");
        assert_eq!(sd_name(60), "/dev/sdbi");
    }
}
