// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::Path,
    sync::Mutex,
};

use chrono::{Local, NaiveDateTime};

use crate::{
    commands::{handled_error, Handle, HandledError, HandledResult},
    facts::ResultPayload,
};

/// The append-only log of removal steps taken on this host. It is never rewritten; the most
/// recent record for an OSD tells how far its removal got, which is what makes re-running a
/// removal safe.
#[derive(Debug)]
pub struct OperationLog {
    /// File that stores the records
    file: Mutex<File>,
    /// Every record read from the file, plus every record written since.
    records: Mutex<Vec<Record>>,
}

impl OperationLog {
    pub fn new(path: &str) -> HandledResult<Self> {
        if let Some(dir) = Path::new(path).parent() {
            std::fs::create_dir_all(dir).handle_err(|e| {
                eprintln!("could not create directory for operation log '{path}': '{e}'");
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .handle_err(|e| {
                eprintln!("could not open operation log path '{path}': '{e}'");
            })?;
        let records = Record::get_all_from_file(&file)?;
        Ok(Self {
            file: Mutex::new(file),
            records: Mutex::new(records),
        })
    }

    /// Writes a single record to the operation log.
    pub fn write_record(&self, record: Record) -> HandledResult<()> {
        let mut file = self.file.lock().unwrap();
        file.write_all(&[record.as_string().as_bytes(), b"\n"].concat())
            .handle_err(|e| {
                eprintln!("failed to write to operation log '{file:?}': '{e}'");
            })?;
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    /// Record `event` for `osd_id`. Failing to write the log never stops a removal; the error has
    /// already been reported.
    pub fn note(&self, event: Event, osd_id: u32, fsid: Option<&str>, comment: Option<String>) {
        if self
            .write_record(Record::new(event, osd_id, fsid, comment))
            .is_err()
        {
            log::warn!(
                "'{event}' for osd.{osd_id} was not logged; a re-run cannot resume from it"
            );
        }
    }

    /// The records of the current removal of `osd_id`, oldest first.
    ///
    /// Ceph hands the id of a purged OSD to the next one created, so only records after the last
    /// `purged` for the id count, and of those only the ones for the same OSD fsid.
    fn episode(&self, osd_id: u32, fsid: Option<&str>) -> Vec<Record> {
        let records = self.records.lock().unwrap();
        let for_id: Vec<&Record> = records.iter().filter(|r| r.osd_id == osd_id).collect();
        let start = for_id
            .iter()
            .rposition(|r| r.event == Event::Purged)
            .map_or(0, |i| i + 1);
        for_id[start..]
            .iter()
            .filter(|r| r.fsid.as_deref() == fsid)
            .map(|r| (*r).clone())
            .collect()
    }

    /// The most recent record of the current removal of `osd_id`.
    pub fn latest(&self, osd_id: u32, fsid: Option<&str>) -> Option<Record> {
        self.episode(osd_id, fsid).pop()
    }

    /// The facts most recently emitted during the current removal of `osd_id`, if any.
    pub fn emitted_payload(&self, osd_id: u32, fsid: Option<&str>) -> Option<ResultPayload> {
        self.episode(osd_id, fsid)
            .iter()
            .rev()
            .filter(|r| r.event == Event::Emitted)
            .find_map(|r| serde_json::from_str(r.comment.as_deref()?).ok())
    }
}

/// A single record of an event that is tracked in the operation log.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: NaiveDateTime,
    pub event: Event,
    pub osd_id: u32,
    /// The fsid of the OSD, which tells apart two OSDs that were given the same id.
    pub fsid: Option<String>,
    pub comment: Option<String>,
}

impl Record {
    pub fn new(event: Event, osd_id: u32, fsid: Option<&str>, comment: Option<String>) -> Self {
        Record {
            timestamp: Local::now().naive_local(),
            event,
            osd_id,
            fsid: fsid.map(str::to_string),
            comment,
        }
    }

    /// Attempt to get all Records from a File, sorted by timestamp in ascending order.
    pub fn get_all_from_file(file: &File) -> HandledResult<Vec<Record>> {
        let lines = BufReader::new(file).lines();
        let mut records: Vec<Record> = lines
            .map(|line| -> HandledResult<Record> {
                let line = line.handle_err(|e| {
                    eprintln!("unable to read operation log line: '{e}'");
                })?;

                Record::from_string(&line).handle_err(|_| {
                    eprintln!("failed parsing record from '{line}'");
                })
            })
            .collect::<HandledResult<Vec<Record>>>()?;
        records.sort_by_key(|record| record.timestamp);

        Ok(records)
    }

    /// Create a String from a Record.
    pub fn as_string(&self) -> String {
        format!(
            "{}\t{}\tosd.{}\t{}\t{}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S.%f"),
            self.event,
            self.osd_id,
            self.fsid.as_deref().unwrap_or("-"),
            match self.comment {
                Some(ref comment) => comment,
                None => "",
            },
        )
    }

    /// Create a Record from a &str.
    pub fn from_string(record: &str) -> HandledResult<Self> {
        let mut fields = record.split('\t');
        let Some(timestamp) = fields.next() else {
            eprintln!("missing timestamp field");
            return handled_error();
        };
        let Some(event) = fields.next() else {
            eprintln!("missing event field");
            return handled_error();
        };
        let Some(osd) = fields.next() else {
            eprintln!("missing osd field");
            return handled_error();
        };
        let Some(fsid) = fields.next() else {
            eprintln!("missing fsid field");
            return handled_error();
        };
        let comment = fields.collect::<Vec<_>>().join("\t");

        let timestamp = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S.%f")
            .handle_err(|e| eprintln!("failed to parse timestamp: '{e}'"))?;
        let Some(osd_id) = crate::history::parse_osd_id(osd) else {
            eprintln!("failed to parse '{osd}' as an OSD");
            return handled_error();
        };

        Ok(Self {
            timestamp,
            event: Event::try_from(event)?,
            osd_id,
            fsid: (fsid != "-").then(|| fsid.to_string()),
            comment: (!comment.is_empty()).then_some(comment),
        })
    }
}

/// All possible events that can be represented in the operation log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// The drive behind the OSD was located.
    Located,
    /// The OSD service was stopped and disabled.
    Stopped,
    /// The OSD data directory was unmounted.
    Unmounted,
    /// The drive facts were handed to the controller. The comment holds them as JSON.
    Emitted,
    /// The OSD was marked out of the cluster.
    MarkedOut,
    /// The cluster reported the OSD safe to destroy.
    Safe,
    /// The OSD identity was purged from the cluster.
    Purged,
    /// The operator interrupted the wait for safe-to-destroy.
    Cancelled,
    /// The removal stopped on an error. The comment holds the error.
    Aborted,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                Self::Located => "located",
                Self::Stopped => "stopped",
                Self::Unmounted => "unmounted",
                Self::Emitted => "emitted",
                Self::MarkedOut => "out",
                Self::Safe => "safe",
                Self::Purged => "purged",
                Self::Cancelled => "cancelled",
                Self::Aborted => "aborted",
            }
        )
    }
}

impl TryFrom<&str> for Event {
    type Error = HandledError;
    fn try_from(val: &str) -> Result<Self, Self::Error> {
        Ok(match val {
            "located" => Self::Located,
            "stopped" => Self::Stopped,
            "unmounted" => Self::Unmounted,
            "emitted" => Self::Emitted,
            "out" => Self::MarkedOut,
            "safe" => Self::Safe,
            "purged" => Self::Purged,
            "cancelled" => Self::Cancelled,
            "aborted" => Self::Aborted,
            _ => {
                eprintln!("failed to parse '{val}' as Event");
                return handled_error();
            }
        })
    }
}
