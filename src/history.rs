// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The snapshot log: a periodic, append-only record of which serial number and auxiliary device
//! every OSD on this host had. Once a drive has dropped off the bus this is the only place
//! left to learn either.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
};

use chrono::{Local, NaiveDateTime};

use crate::system::SourceError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%f";

/// The placeholder written for a field that could not be resolved when the snapshot was taken.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Lines written by older tooling carry no timestamp; their position in the file is all
    /// that orders them.
    pub timestamp: Option<NaiveDateTime>,
    pub osd_id: u32,
    pub aux_device: Option<String>,
    pub serial: Option<String>,
}

fn known(field: &str) -> Option<String> {
    match field {
        "" | "-" | UNKNOWN => None,
        other => Some(other.to_string()),
    }
}

/// Accepts `osd.12` as well as a bare `12`.
pub fn parse_osd_id(token: &str) -> Option<u32> {
    token.strip_prefix("osd.").unwrap_or(token).parse().ok()
}

impl HistoryEntry {
    pub fn new(osd_id: u32, aux_device: Option<String>, serial: Option<String>) -> Self {
        HistoryEntry {
            timestamp: Some(Local::now().naive_local()),
            osd_id,
            aux_device,
            serial,
        }
    }

    pub fn as_string(&self) -> String {
        format!(
            "{}\tosd.{}\t{}\t{}",
            match self.timestamp {
                Some(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
                None => "-".to_string(),
            },
            self.osd_id,
            self.aux_device.as_deref().unwrap_or(UNKNOWN),
            self.serial.as_deref().unwrap_or(UNKNOWN),
        )
    }

    /// Parse `timestamp osd.N aux serial`, or the older `osd.N aux serial`.
    pub fn from_string(line: &str) -> Result<Self, SourceError> {
        let parse_err = || SourceError::Parse {
            what: "snapshot entry",
            line: line.to_string(),
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        let (timestamp, rest) = match fields.len() {
            4 => {
                let ts = match fields[0] {
                    "-" => None,
                    ts => Some(
                        NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
                            .map_err(|_| parse_err())?,
                    ),
                };
                (ts, &fields[1..])
            }
            3 => (None, &fields[..]),
            _ => return Err(parse_err()),
        };

        Ok(HistoryEntry {
            timestamp,
            osd_id: parse_osd_id(rest[0]).ok_or_else(parse_err)?,
            aux_device: known(rest[1]),
            serial: known(rest[2]),
        })
    }
}

/// Reverse lookup over the snapshot log, keyed by OSD id.
#[derive(Debug, Default)]
pub struct HistoryIndex {
    entries: Vec<HistoryEntry>,
}

impl HistoryIndex {
    /// Load the snapshot log at `path`. A missing log is an empty index: the host may simply not
    /// have taken a snapshot yet.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("no snapshot log at {}", path.display());
                Ok(Self::default())
            }
            Err(error) => Err(SourceError::Io {
                path: path.display().to_string(),
                error,
            }),
        }
    }

    /// Lines that fail to parse are skipped; a snapshot interrupted mid-write leaves a truncated
    /// last line, which must not hide everything before it.
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match HistoryEntry::from_string(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::debug!("skipping snapshot line: {e}");
                    None
                }
            })
            .collect();
        HistoryIndex { entries }
    }

    /// The most recent entry for `osd_id`. Later lines in the log are more recent.
    pub fn latest(&self, osd_id: u32) -> Option<&HistoryEntry> {
        self.entries.iter().rev().find(|e| e.osd_id == osd_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append `entries` to the snapshot log at `path`, creating it if needed.
pub fn append(path: &Path, entries: &[HistoryEntry]) -> Result<(), SourceError> {
    let io_err = |error: io::Error| SourceError::Io {
        path: path.display().to_string(),
        error,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;

    let mut buf = String::new();
    for entry in entries {
        buf.push_str(&entry.as_string());
        buf.push('\n');
    }
    file.write_all(buf.as_bytes()).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let entry = HistoryEntry::new(12, Some("/dev/nvme0n1p3".to_string()), None);
        let parsed = HistoryEntry::from_string(&entry.as_string()).unwrap();
        assert_eq!(parsed, entry);
        assert!(entry.as_string().ends_with("\tosd.12\t/dev/nvme0n1p3\tunknown"));
    }

    #[test]
    fn accepts_untimestamped_lines() {
        let entry = HistoryEntry::from_string("osd.7 /dev/sdbk2 ZC10ABCD").unwrap();
        assert_eq!(entry.timestamp, None);
        assert_eq!(entry.osd_id, 7);
        assert_eq!(entry.aux_device.as_deref(), Some("/dev/sdbk2"));
        assert_eq!(entry.serial.as_deref(), Some("ZC10ABCD"));

        assert!(HistoryEntry::from_string("osd.x /dev/sdbk2 ZC10ABCD").is_err());
        assert!(HistoryEntry::from_string("osd.7 /dev/sdbk2").is_err());
        assert!(HistoryEntry::from_string("yesterday osd.7 /dev/sdbk2 ZC10ABCD").is_err());
    }

    #[test]
    fn append_then_load() {
        let dir = crate::test_env::test_dir("history_append_then_load");
        let path = Path::new(&dir).join("snap/snapshot.log");
        assert!(HistoryIndex::load(&path).unwrap().is_empty());

        append(&path, &[HistoryEntry::new(1, None, Some("A".to_string()))]).unwrap();
        append(&path, &[HistoryEntry::new(1, None, Some("B".to_string()))]).unwrap();
        let index = HistoryIndex::load(&path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.latest(1).unwrap().serial.as_deref(), Some("B"));
    }

    #[test]
    fn latest_entry_wins() {
        let index = HistoryIndex::parse(
            "\
2026-10-01T02:00:00.000000\tosd.3\t/dev/sdbk1\tOLDSERIAL
2026-10-01T02:00:00.000000\tosd.4\t/dev/sdbk2\tOTHER
2026-10-02T02:00:00.000000\tosd.3\t/dev/sdbk5\tNEWSERIAL
2026-10-03T02:00:00.0000",
        );
        assert_eq!(index.len(), 3);
        let latest = index.latest(3).unwrap();
        assert_eq!(latest.serial.as_deref(), Some("NEWSERIAL"));
        assert_eq!(latest.aux_device.as_deref(), Some("/dev/sdbk5"));
        assert!(index.latest(5).is_none());
    }
}
