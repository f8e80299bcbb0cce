// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Config is the model for a storage node and its chassis as described in the configuration file.
///
/// Every section and key has a default, so an empty file (or no file at all) describes the
/// standard 60-bay, two-enclosure chassis with a stock Ceph layout.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub chassis: ChassisConfig,
    pub paths: Paths,
    pub removal: Removal,
    pub remote: Remote,
}

impl Config {
    /// Load the config from `path`. When no path was given on the command line and the default
    /// config file does not exist, the built-in defaults are used.
    pub fn load(path: Option<&str>) -> Result<Self, crate::Error> {
        let (path, explicit) = match path {
            Some(p) => (p.to_string(), true),
            None => (crate::default_config_path(), false),
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => {
                log::debug!("no config file at '{path}'; using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(crate::Error::Config(format!(
                    "could not open config file \"{path}\": {e}"
                )))
            }
        };
        let config: Config = toml::from_str(&contents)
            .map_err(|e| crate::Error::Config(format!("could not parse \"{path}\": {e}")))?;
        config.chassis.validate()?;
        Ok(config)
    }

    /// The data directory of an OSD, e.g. `/var/lib/ceph/osd/ceph-12`.
    pub fn osd_dir(&self, osd_id: u32) -> PathBuf {
        PathBuf::from(&self.paths.osd_data_root).join(format!("{}-{osd_id}", self.paths.cluster))
    }

    /// The OSD id of a data directory, if `path` is one.
    pub fn parse_osd_dir(&self, path: &Path) -> Option<u32> {
        if path.parent()? != Path::new(&self.paths.osd_data_root) {
            return None;
        }
        path.file_name()?
            .to_str()?
            .strip_prefix(&self.paths.cluster)?
            .strip_prefix('-')?
            .parse()
            .ok()
    }

    /// The systemd unit that runs an OSD.
    pub fn osd_unit(&self, osd_id: u32) -> String {
        format!("{}@{osd_id}", self.removal.unit_prefix)
    }

    pub fn print_summary(&self) {
        let c = &self.chassis;
        println!(
            "chassis: bus {} target {}, luns 0-{}, enclosures at {} and {}",
            c.bus, c.target, c.max_lun, c.lower_enclosure, c.upper_enclosure
        );
        println!(
            "bays: {} ({} rows of {}, split {})",
            c.total_bays(),
            c.rows(),
            c.bays_per_row,
            c.column_split
        );
        println!("osd data: {}/{}-<id>", self.paths.osd_data_root, self.paths.cluster);
        println!("snapshot log: {}", self.paths.snapshot_log);
        println!("state file: {}", self.paths.state_file);
    }
}

/// The physical layout of the chassis: which bus addresses hold disks and where the two
/// enclosure controllers sit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChassisConfig {
    pub bus: u32,
    pub target: u32,
    /// The highest lun assigned within the chassis, including the upper enclosure controller.
    pub max_lun: u32,
    pub lower_enclosure: u32,
    pub upper_enclosure: u32,
    pub bays_per_row: u32,
    pub column_split: ColumnSplit,
}

impl Default for ChassisConfig {
    fn default() -> Self {
        ChassisConfig {
            bus: 0,
            target: 0,
            max_lun: 61,
            lower_enclosure: 30,
            upper_enclosure: 61,
            bays_per_row: 15,
            column_split: ColumnSplit::SixTwelve,
        }
    }
}

impl ChassisConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        let fail = |msg: String| Err(crate::Error::Config(msg));
        if self.lower_enclosure >= self.upper_enclosure {
            return fail(format!(
                "lower_enclosure ({}) must be below upper_enclosure ({})",
                self.lower_enclosure, self.upper_enclosure
            ));
        }
        // Bays are numbered by skipping the lower enclosure only, so nothing may follow the upper.
        if self.upper_enclosure != self.max_lun {
            return fail(format!(
                "upper_enclosure ({}) must be the last lun, max_lun ({})",
                self.upper_enclosure, self.max_lun
            ));
        }
        if self.bays_per_row == 0 || self.total_bays() % self.bays_per_row != 0 {
            return fail(format!(
                "{} bays cannot be laid out in rows of {}",
                self.total_bays(),
                self.bays_per_row
            ));
        }
        if self.column_split.gaps().iter().any(|gap| *gap >= self.bays_per_row) {
            return fail(format!(
                "column split {} does not fit rows of {}",
                self.column_split, self.bays_per_row
            ));
        }
        Ok(())
    }

    /// Number of bays that can hold a disk: every lun except the two enclosure controllers.
    pub fn total_bays(&self) -> u32 {
        (self.max_lun + 1).saturating_sub(2)
    }

    pub fn rows(&self) -> u32 {
        self.total_bays() / self.bays_per_row
    }

    /// The highest lun that may legitimately hold a disk.
    pub fn max_disk_lun(&self) -> u32 {
        (0..=self.max_lun)
            .rev()
            .find(|lun| !self.is_enclosure(*lun))
            .unwrap_or(0)
    }

    pub fn is_enclosure(&self, lun: u32) -> bool {
        lun == self.lower_enclosure || lun == self.upper_enclosure
    }
}

/// Where the bay diagram places its column gaps. Two labelling conventions exist in the field
/// for the same chassis, so both are kept.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnSplit {
    /// Gaps after the 6th and 12th bay of a row.
    SixTwelve,
    /// Gaps after the 6th and 11th bay of a row.
    SixEleven,
}

impl ColumnSplit {
    /// Positions (1-based, within a row) after which a gap is drawn.
    pub fn gaps(&self) -> [u32; 2] {
        match self {
            ColumnSplit::SixTwelve => [6, 12],
            ColumnSplit::SixEleven => [6, 11],
        }
    }
}

impl fmt::Display for ColumnSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ColumnSplit::SixTwelve => "six-twelve",
                ColumnSplit::SixEleven => "six-eleven",
            }
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub osd_data_root: String,
    pub cluster: String,
    /// Append-only snapshot of (osd, aux device, serial) written by `osd-replace snapshot`.
    pub snapshot_log: String,
    /// Append-only log of removal events on this host.
    pub state_file: String,
}

impl Default for Paths {
    fn default() -> Self {
        Paths {
            osd_data_root: "/var/lib/ceph/osd".to_string(),
            cluster: "ceph".to_string(),
            snapshot_log: crate::default_snapshot_log_path(),
            state_file: crate::default_statefile_path(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Removal {
    pub unit_prefix: String,
    /// Mount source reported for volume-manager backed OSDs, whose data directory is a tmpfs.
    pub volume_manager_sentinel: String,
    /// How many trailing lines of the kernel log count as "recent".
    pub kernel_log_lines: usize,
    /// Seconds between safe-to-destroy polls.
    pub poll_interval_secs: u64,
}

impl Default for Removal {
    fn default() -> Self {
        Removal {
            unit_prefix: "ceph-osd".to_string(),
            volume_manager_sentinel: "tmpfs".to_string(),
            kernel_log_lines: 5000,
            poll_interval_secs: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Remote {
    pub ssh: String,
    /// The command used to invoke this tool on the storage node.
    pub command: String,
}

impl Default for Remote {
    fn default() -> Self {
        Remote {
            ssh: "ssh".to_string(),
            command: "osd-replace".to_string(),
        }
    }
}
