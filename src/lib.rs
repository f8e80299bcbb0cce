// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod bay;
pub mod commands;
pub mod config;
pub mod facts;
pub mod history;
pub mod removal;
pub mod slots;
pub mod state;
pub mod system;
pub mod test_env;

use slots::SlotAddress;

/// Errors that stop the handling of a failed drive.
///
/// Lookups that only feed advisory fields (serial number, auxiliary device) never produce one of
/// these; they fall back to "unknown" instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unexpected chassis topology: {0}")]
    Topology(String),

    #[error("OSD {osd_id} data directory {path} is not mounted")]
    NotMounted { osd_id: u32, path: String },

    #[error("osd.{osd_id} on this host has fsid {found}, not {expected}; it is a different OSD")]
    FsidMismatch {
        osd_id: u32,
        expected: String,
        found: String,
    },

    #[error("{device} reports healthy and the kernel log has no complaints about it; not a disk issue")]
    NotADiskIssue { device: String },

    #[error("no slot is missing from the chassis; the drive has not dropped off the bus")]
    NoMissingSlot,

    #[error("{} slots are missing from the chassis (bays {}); refusing to guess", .slots.len(), join_bays(.bays))]
    MultipleMissing { slots: Vec<SlotAddress>, bays: Vec<u32> },

    #[error("bay {bay} is outside the chassis range [0, {total})")]
    OutOfRange { bay: u32, total: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Source(#[from] system::SourceError),
}

fn join_bays(bays: &[u32]) -> String {
    bays.iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn default_config_path() -> String {
    match std::env::var("OSD_REPLACE_CONFIG") {
        Ok(conf) => conf,
        Err(_) => "/etc/osd-replace/osd-replace.toml".to_string(),
    }
}

pub fn default_statefile_path() -> String {
    match std::env::var("OSD_REPLACE_STATEFILE") {
        Ok(statefile) => statefile,
        Err(_) => "/var/log/osd-replace/operations.log".to_string(),
    }
}

pub fn default_snapshot_log_path() -> String {
    match std::env::var("OSD_REPLACE_SNAPSHOT_LOG") {
        Ok(log) => log,
        Err(_) => "/var/log/osd-replace/snapshot.log".to_string(),
    }
}
