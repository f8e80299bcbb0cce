// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The slot inventory model: what the chassis should contain, and what the bus currently reports.

use std::{collections::BTreeSet, fmt};

use crate::{config::ChassisConfig, system::SourceError, Error};

/// The bus-level position of a bay candidate.
///
/// The chassis reports each bay as its own SCSI id beneath a single host and channel, so a bus
/// address `[H:C:T:L]` maps to `bus = H`, `target = C`, `lun = T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotAddress {
    pub bus: u32,
    pub target: u32,
    pub lun: u32,
}

impl SlotAddress {
    pub fn new(bus: u32, target: u32, lun: u32) -> Self {
        SlotAddress { bus, target, lun }
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.bus, self.target, self.lun)
    }
}

/// The class of a device as reported by the bus enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceClass {
    Disk,
    Enclosure,
    Other(String),
}

impl From<&str> for DeviceClass {
    fn from(kind: &str) -> Self {
        match kind {
            "disk" => DeviceClass::Disk,
            // lsscsi truncates the type column to seven characters.
            "enclosu" | "enclosure" => DeviceClass::Enclosure,
            other => DeviceClass::Other(other.to_string()),
        }
    }
}

/// A single device reported by the bus enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEntry {
    /// The address as the kernel prints it, e.g. `0:0:45:0`.
    pub address: String,
    pub slot: SlotAddress,
    pub class: DeviceClass,
    /// The device node, if the kernel assigned one.
    pub device: Option<String>,
}

impl BusEntry {
    pub fn disk(slot: SlotAddress, device: &str) -> Self {
        BusEntry {
            address: format!("{slot}:0"),
            slot,
            class: DeviceClass::Disk,
            device: Some(device.to_string()),
        }
    }

    pub fn enclosure(slot: SlotAddress) -> Self {
        BusEntry {
            address: format!("{slot}:0"),
            slot,
            class: DeviceClass::Enclosure,
            device: None,
        }
    }

    /// Parse a line of `lsscsi` output, e.g.
    ///
    /// `[0:0:45:0]   disk    HGST     HUH721010AL4200  A21D  /dev/sdat`
    pub fn parse_line(line: &str) -> Result<Self, SourceError> {
        let parse_err = || SourceError::Parse {
            what: "bus enumeration",
            line: line.to_string(),
        };

        let mut tokens = line.split_whitespace();
        let address = tokens
            .next()
            .and_then(|a| a.strip_prefix('['))
            .and_then(|a| a.strip_suffix(']'))
            .ok_or_else(parse_err)?;
        let fields = address
            .split(':')
            .map(|f| f.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| parse_err())?;
        let [bus, target, lun, _] = fields[..] else {
            return Err(parse_err());
        };

        let class = DeviceClass::from(tokens.next().ok_or_else(parse_err)?);
        let device = match tokens.last() {
            Some(dev) if dev.starts_with("/dev/") => Some(dev.to_string()),
            _ => None,
        };

        Ok(BusEntry {
            address: address.to_string(),
            slot: SlotAddress { bus, target, lun },
            class,
            device,
        })
    }

    /// Parse a full `lsscsi` listing. Blank lines are skipped.
    pub fn parse_listing(output: &str) -> Result<Vec<Self>, SourceError> {
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(Self::parse_line)
            .collect()
    }

    /// Whether this entry sits on the chassis' host and channel.
    pub fn in_chassis(&self, chassis: &ChassisConfig) -> bool {
        self.slot.bus == chassis.bus && self.slot.target == chassis.target
    }
}

/// The static set of slots that should hold a disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedSlotSet(BTreeSet<SlotAddress>);

impl ExpectedSlotSet {
    pub fn from_config(chassis: &ChassisConfig) -> Self {
        ExpectedSlotSet(
            (0..=chassis.max_lun)
                .filter(|lun| !chassis.is_enclosure(*lun))
                .map(|lun| SlotAddress::new(chassis.bus, chassis.target, lun))
                .collect(),
        )
    }

    pub fn contains(&self, slot: &SlotAddress) -> bool {
        self.0.contains(slot)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotAddress> {
        self.0.iter()
    }

    /// Slots that are expected but not observed, in ascending order.
    pub fn difference<'a>(
        &'a self,
        observed: &'a ObservedSlotSet,
    ) -> impl Iterator<Item = &'a SlotAddress> {
        self.0.difference(&observed.0)
    }
}

/// The slots currently reporting a disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedSlotSet(BTreeSet<SlotAddress>);

impl ObservedSlotSet {
    /// Keep only disk-class entries on the chassis bus whose slot is an expected one. A drive
    /// that was re-seated shows up far outside the expected range and is left out here.
    pub fn from_entries(chassis: &ChassisConfig, entries: &[BusEntry]) -> Self {
        let expected = ExpectedSlotSet::from_config(chassis);
        ObservedSlotSet(
            entries
                .iter()
                .filter(|e| e.class == DeviceClass::Disk && e.in_chassis(chassis))
                .map(|e| e.slot)
                .filter(|slot| expected.contains(slot))
                .collect(),
        )
    }

    pub fn from_slots(slots: impl IntoIterator<Item = SlotAddress>) -> Self {
        ObservedSlotSet(slots.into_iter().collect())
    }

    pub fn contains(&self, slot: &SlotAddress) -> bool {
        self.0.contains(slot)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Both enclosure controllers must be reported exactly once. Anything else means the bus is not
/// laid out the way the chassis config says, and no bay inference can be trusted.
pub fn validate_topology(chassis: &ChassisConfig, entries: &[BusEntry]) -> Result<(), Error> {
    for lun in [chassis.lower_enclosure, chassis.upper_enclosure] {
        let slot = SlotAddress::new(chassis.bus, chassis.target, lun);
        let count = entries
            .iter()
            .filter(|e| e.class == DeviceClass::Enclosure && e.slot == slot)
            .count();
        if count != 1 {
            return Err(Error::Topology(format!(
                "expected one enclosure controller at {slot}, found {count}"
            )));
        }
    }
    Ok(())
}
