// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Narrow interfaces to everything outside this program: the bus, the drives, the kernel log,
//! the mount table, systemd, the enclosure LEDs, and the Ceph cluster.
//!
//! Each interface is a trait so that the decision logic can be exercised against in-memory fakes
//! (see `test_env`). The implementations in the submodules run the usual system tools and parse
//! their output at an explicit boundary.

use std::{
    io,
    path::{Path, PathBuf},
    process::Command,
};

use crate::{facts::ResultPayload, slots::BusEntry};

pub mod ceph;
pub mod disk;
pub mod host;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("could not run '{command}': {error}")]
    Spawn { command: String, error: io::Error },

    #[error("'{command}' failed ({}): {stderr}", describe_status(.status))]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("could not parse {what} from '{line}'")]
    Parse { what: &'static str, line: String },

    #[error("{path}: {error}")]
    Io { path: String, error: io::Error },
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "killed by signal".to_string(),
    }
}

/// The captured result of running an external program.
pub struct Output {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` with `args` and capture its output regardless of exit status.
pub fn run_unchecked(program: &str, args: &[&str]) -> Result<Output, SourceError> {
    let command = format!("{program} {}", args.join(" "));
    log::debug!("running '{command}'");

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|error| SourceError::Spawn {
            command: command.clone(),
            error,
        })?;

    Ok(Output {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Run `program` with `args`, failing unless it exits successfully. Returns its stdout.
pub fn run(program: &str, args: &[&str]) -> Result<String, SourceError> {
    let output = run_unchecked(program, args)?;
    if output.status != Some(0) {
        return Err(SourceError::Failed {
            command: format!("{program} {}", args.join(" ")),
            status: output.status,
            stderr: output.stderr,
        });
    }
    Ok(output.stdout)
}

/// Lists the devices currently attached to the storage bus.
pub trait BusEnumerator {
    fn enumerate(&self) -> Result<Vec<BusEntry>, SourceError>;
}

/// The verdict of a drive's own health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthReport {
    Healthy,
    Degraded(String),
}

/// Queries a live drive.
pub trait DeviceHealth {
    fn health(&self, device: &str) -> Result<HealthReport, SourceError>;
    fn serial(&self, device: &str) -> Result<String, SourceError>;
}

/// Recent kernel diagnostic messages.
pub trait KernelLog {
    /// Return the recent lines that mention any of `needles` as a whole word.
    fn mentions(&self, needles: &[String]) -> Result<Vec<String>, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: PathBuf,
}

pub trait MountTable {
    fn mounts(&self) -> Result<Vec<Mount>, SourceError>;

    /// Unmount `path` even if the filesystem beneath it no longer responds. Succeeds if `path`
    /// is already unmounted.
    fn force_unmount(&self, path: &Path) -> Result<(), SourceError>;

    /// The source of the most recent mount on `path`, if any.
    fn mount_source(&self, path: &Path) -> Result<Option<String>, SourceError> {
        Ok(self
            .mounts()?
            .into_iter()
            .rev()
            .find(|m| m.target == path)
            .map(|m| m.source))
    }
}

/// Device nodes and OSD directory symlinks.
pub trait DeviceFs {
    fn exists(&self, path: &Path) -> bool;
    fn read_link(&self, path: &Path) -> Option<PathBuf>;
    /// The contents of a small file such as an OSD's `fsid`.
    fn read_file(&self, path: &Path) -> Option<String>;
}

pub trait VolumeManager {
    /// The physical volume backing `volume_group`.
    fn physical_volume(&self, volume_group: &str) -> Result<Option<String>, SourceError>;
}

pub trait ServiceControl {
    fn stop(&self, unit: &str) -> Result<(), SourceError>;
    fn disable(&self, unit: &str) -> Result<(), SourceError>;
}

/// What to light up on the enclosure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indicator {
    /// Set the failure light on a drive that is still present.
    Fault(String),
    /// Light every known-good drive so that the dark bay is the one to pull.
    LocateAllExcept(Vec<String>),
}

pub trait IndicatorLight {
    fn set(&self, indicator: &Indicator) -> Result<(), SourceError>;
}

/// Where the cluster places an OSD. `fsid` identifies this particular OSD; its numeric id is
/// handed out again once it is purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsdLocation {
    pub host: String,
    pub fsid: Option<String>,
}

/// The cluster-level operations that the controller performs.
pub trait ClusterCoordinator {
    /// `None` if the cluster has no OSD with this id.
    fn find(&self, osd_id: u32) -> Result<Option<OsdLocation>, SourceError>;
    fn mark_out(&self, osd_id: u32) -> Result<(), SourceError>;
    fn safe_to_destroy(&self, osd_id: u32) -> Result<bool, SourceError>;
    fn purge(&self, osd_id: u32) -> Result<(), SourceError>;
}

/// Runs the storage-node side of a removal on the host that holds the OSD.
pub trait RemoteRunner {
    fn remove(
        &self,
        host: &str,
        osd_id: u32,
        fsid: Option<&str>,
    ) -> Result<ResultPayload, SourceError>;
}

/// Everything the storage-node side needs from its host.
pub struct LocalNode<'a> {
    pub bus: &'a dyn BusEnumerator,
    pub health: &'a dyn DeviceHealth,
    pub kernel_log: &'a dyn KernelLog,
    pub mounts: &'a dyn MountTable,
    pub fs: &'a dyn DeviceFs,
    pub volumes: &'a dyn VolumeManager,
    pub services: &'a dyn ServiceControl,
    pub leds: &'a dyn IndicatorLight,
}

/// Everything the controller side needs.
pub struct Controller<'a> {
    pub cluster: &'a dyn ClusterCoordinator,
    pub remote: &'a dyn RemoteRunner,
}

/// The command-backed implementation of every storage-node interface.
pub struct SystemNode {
    bus: disk::Lsscsi,
    health: disk::Smartctl,
    kernel_log: disk::Dmesg,
    mounts: host::ProcMounts,
    fs: disk::SysFs,
    volumes: disk::Lvm,
    services: host::Systemd,
    leds: host::Ledctl,
}

impl SystemNode {
    pub fn new(config: &crate::config::Config) -> Self {
        SystemNode {
            bus: disk::Lsscsi,
            health: disk::Smartctl,
            kernel_log: disk::Dmesg::new(config.removal.kernel_log_lines),
            mounts: host::ProcMounts,
            fs: disk::SysFs,
            volumes: disk::Lvm,
            services: host::Systemd,
            leds: host::Ledctl,
        }
    }

    pub fn node(&self) -> LocalNode<'_> {
        LocalNode {
            bus: &self.bus,
            health: &self.health,
            kernel_log: &self.kernel_log,
            mounts: &self.mounts,
            fs: &self.fs,
            volumes: &self.volumes,
            services: &self.services,
            leds: &self.leds,
        }
    }
}

/// The command-backed implementation of the controller interfaces.
pub struct SystemController {
    cluster: ceph::Ceph,
    remote: ceph::Ssh,
}

impl SystemController {
    pub fn new(config: &crate::config::Config) -> Self {
        SystemController {
            cluster: ceph::Ceph,
            remote: ceph::Ssh::new(&config.remote),
        }
    }

    pub fn controller(&self) -> Controller<'_> {
        Controller {
            cluster: &self.cluster,
            remote: &self.remote,
        }
    }
}

/// Whether `needle` occurs in `line` bounded by non-alphanumeric characters, so that `sdq` does
/// not match `sdqa` and `0:0:4:0` does not match `10:0:4:0`.
pub fn mentions_word(line: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    line.match_indices(needle).any(|(start, _)| {
        let before = line[..start].chars().next_back();
        let after = line[start + needle.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}
