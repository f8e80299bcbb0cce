// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Controller-facing adapters: the Ceph CLI, and ssh to reach the storage node.

use std::collections::HashMap;

use nix::errno::Errno;
use serde::Deserialize;

use super::*;

/// The cluster coordinator through the `ceph` CLI. Every operation here is idempotent on the
/// cluster side.
pub struct Ceph;

/// The subset of `ceph osd find --format json` that is needed to find the OSD's host.
#[derive(Deserialize, Debug)]
struct OsdFind {
    host: Option<String>,
    osd_fsid: Option<String>,
    #[serde(default)]
    crush_location: HashMap<String, String>,
}

pub fn parse_osd_find(output: &str) -> Result<OsdLocation, SourceError> {
    let parse_err = || SourceError::Parse {
        what: "OSD host",
        line: output.trim().to_string(),
    };
    let found: OsdFind = serde_json::from_str(output).map_err(|_| parse_err())?;
    // Prefer the reported hostname; the CRUSH bucket name is not always resolvable.
    let host = found
        .host
        .or_else(|| found.crush_location.get("host").cloned())
        .ok_or_else(parse_err)?;
    Ok(OsdLocation {
        host,
        fsid: found.osd_fsid.filter(|f| !f.is_empty()),
    })
}

/// Map the exit status of `ceph osd safe-to-destroy`. The ceph CLI exits with the errno of the
/// failed request; only EBUSY and EAGAIN mean the data is still being moved off the OSD.
pub fn safe_to_destroy_status(status: Option<i32>) -> Option<bool> {
    match status {
        Some(0) => Some(true),
        Some(code) if code == Errno::EBUSY as i32 || code == Errno::EAGAIN as i32 => Some(false),
        _ => None,
    }
}

impl ClusterCoordinator for Ceph {
    fn find(&self, osd_id: u32) -> Result<Option<OsdLocation>, SourceError> {
        let id = osd_id.to_string();
        let args = ["osd", "find", id.as_str(), "--format", "json"];
        let output = run_unchecked("ceph", &args)?;
        match output.status {
            Some(0) => parse_osd_find(&output.stdout).map(Some),
            Some(code) if code == Errno::ENOENT as i32 => Ok(None),
            status => Err(SourceError::Failed {
                command: format!("ceph {}", args.join(" ")),
                status,
                stderr: output.stderr,
            }),
        }
    }

    fn mark_out(&self, osd_id: u32) -> Result<(), SourceError> {
        run("ceph", &["osd", "out", &osd_id.to_string()]).map(|_| ())
    }

    fn safe_to_destroy(&self, osd_id: u32) -> Result<bool, SourceError> {
        let id = osd_id.to_string();
        let output = run_unchecked("ceph", &["osd", "safe-to-destroy", &id])?;
        match safe_to_destroy_status(output.status) {
            Some(safe) => {
                if !safe {
                    log::debug!("osd.{osd_id} not yet safe to destroy: {}", output.stderr);
                }
                Ok(safe)
            }
            None => Err(SourceError::Failed {
                command: format!("ceph osd safe-to-destroy {id}"),
                status: output.status,
                stderr: output.stderr,
            }),
        }
    }

    fn purge(&self, osd_id: u32) -> Result<(), SourceError> {
        run(
            "ceph",
            &["osd", "purge", &osd_id.to_string(), "--yes-i-really-mean-it"],
        )
        .map(|_| ())
    }
}

/// Runs `osd-replace remove` on the storage node over ssh.
pub struct Ssh {
    ssh: String,
    command: String,
}

impl Ssh {
    pub fn new(remote: &crate::config::Remote) -> Self {
        Ssh {
            ssh: remote.ssh.clone(),
            command: remote.command.clone(),
        }
    }
}

impl RemoteRunner for Ssh {
    fn remove(
        &self,
        host: &str,
        osd_id: u32,
        fsid: Option<&str>,
    ) -> Result<ResultPayload, SourceError> {
        let id = osd_id.to_string();
        let mut args = vec![host, self.command.as_str(), "remove", id.as_str()];
        if let Some(fsid) = fsid {
            args.extend(["--fsid", fsid]);
        }
        let output = run(&self.ssh, &args)?;
        serde_json::from_str(output.trim()).map_err(|_| SourceError::Parse {
            what: "removal result",
            line: output.trim().to_string(),
        })
    }
}
