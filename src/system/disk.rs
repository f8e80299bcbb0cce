// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Drive-facing adapters: bus enumeration, SMART, the kernel log, and LVM.

use std::path::{Path, PathBuf};

use super::*;

/// Bus enumeration through `lsscsi`.
pub struct Lsscsi;

impl BusEnumerator for Lsscsi {
    fn enumerate(&self) -> Result<Vec<BusEntry>, SourceError> {
        BusEntry::parse_listing(&run("lsscsi", &[])?)
    }
}

/// smartctl exit status bits that mean the query itself could not be made: bad command line, or
/// the device could not be opened. The remaining bits describe the drive and leave the output
/// worth parsing.
const SMARTCTL_QUERY_FAILED: i32 = 0b11;

/// Drive health and identity through `smartctl`.
pub struct Smartctl;

impl Smartctl {
    fn query(&self, flag: &str, device: &str) -> Result<String, SourceError> {
        let output = run_unchecked("smartctl", &[flag, device])?;
        match output.status {
            Some(code) if code & SMARTCTL_QUERY_FAILED == 0 => Ok(output.stdout),
            status => Err(SourceError::Failed {
                command: format!("smartctl {flag} {device}"),
                status,
                stderr: if output.stderr.is_empty() {
                    output.stdout.trim().to_string()
                } else {
                    output.stderr
                },
            }),
        }
    }
}

impl DeviceHealth for Smartctl {
    fn health(&self, device: &str) -> Result<HealthReport, SourceError> {
        parse_smart_health(&self.query("-H", device)?)
    }

    fn serial(&self, device: &str) -> Result<String, SourceError> {
        parse_smart_serial(&self.query("-i", device)?)
    }
}

/// Parse the health verdict out of `smartctl -H`. ATA drives report a self-assessment result,
/// SAS drives a health status.
pub fn parse_smart_health(output: &str) -> Result<HealthReport, SourceError> {
    const MARKERS: [&str; 2] = [
        "SMART overall-health self-assessment test result:",
        "SMART Health Status:",
    ];

    for line in output.lines() {
        let line = line.trim();
        for marker in MARKERS {
            if let Some(verdict) = line.strip_prefix(marker) {
                let verdict = verdict.trim();
                return Ok(match verdict {
                    "PASSED" | "OK" => HealthReport::Healthy,
                    other => HealthReport::Degraded(other.to_string()),
                });
            }
        }
    }

    Err(SourceError::Parse {
        what: "SMART health",
        line: output.lines().last().unwrap_or_default().to_string(),
    })
}

/// Parse the serial number out of `smartctl -i`. ATA spells it "Serial Number", SAS "Serial
/// number".
pub fn parse_smart_serial(output: &str) -> Result<String, SourceError> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("serial number"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|serial| !serial.is_empty())
        .ok_or_else(|| SourceError::Parse {
            what: "serial number",
            line: output.lines().last().unwrap_or_default().to_string(),
        })
}

/// The kernel ring buffer through `dmesg`.
pub struct Dmesg {
    lines: usize,
}

impl Dmesg {
    pub fn new(lines: usize) -> Self {
        Dmesg { lines }
    }
}

impl KernelLog for Dmesg {
    fn mentions(&self, needles: &[String]) -> Result<Vec<String>, SourceError> {
        Ok(recent_mentions(&run("dmesg", &[])?, self.lines, needles))
    }
}

/// The lines among the last `recent` lines of `log` that mention any needle.
pub fn recent_mentions(log: &str, recent: usize, needles: &[String]) -> Vec<String> {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(recent);
    lines[start..]
        .iter()
        .filter(|line| needles.iter().any(|n| mentions_word(line, n)))
        .map(|line| line.to_string())
        .collect()
}

pub struct SysFs;

impl DeviceFs for SysFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_link(&self, path: &Path) -> Option<PathBuf> {
        std::fs::read_link(path).ok()
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        std::fs::read_to_string(path).ok()
    }
}

/// Volume group to physical volume mapping through `pvs`.
pub struct Lvm;

impl VolumeManager for Lvm {
    fn physical_volume(&self, volume_group: &str) -> Result<Option<String>, SourceError> {
        let output = run(
            "pvs",
            &["--noheadings", "--separator", " ", "-o", "pv_name,vg_name"],
        )?;
        parse_pvs(&output, volume_group)
    }
}

pub fn parse_pvs(output: &str, volume_group: &str) -> Result<Option<String>, SourceError> {
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut tokens = line.split_whitespace();
        let (Some(pv), vg) = (tokens.next(), tokens.next()) else {
            continue;
        };
        // Physical volumes that are not in any group print an empty vg_name.
        if vg == Some(volume_group) {
            return Ok(Some(pv.to_string()));
        }
        if tokens.next().is_some() {
            return Err(SourceError::Parse {
                what: "physical volume",
                line: line.to_string(),
            });
        }
    }
    Ok(None)
}
