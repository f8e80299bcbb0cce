// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Turning bus slots into the bay number printed on the chassis.

use std::fmt::Write;

use crate::{
    config::ChassisConfig,
    slots::{BusEntry, DeviceClass, ExpectedSlotSet, ObservedSlotSet, SlotAddress},
    Error,
};

/// The outcome of comparing the expected slots with the observed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    /// Exactly one slot is missing: that is the failed drive.
    One(SlotAddress),
    /// The chassis is fully populated.
    None,
    /// More than one slot is missing, so no single bay can be named.
    Multiple(Vec<SlotAddress>),
}

pub fn resolve_missing_slot(expected: &ExpectedSlotSet, observed: &ObservedSlotSet) -> Missing {
    let mut missing: Vec<SlotAddress> = expected.difference(observed).copied().collect();
    match missing.len() {
        0 => Missing::None,
        1 => Missing::One(missing.remove(0)),
        _ => Missing::Multiple(missing),
    }
}

/// Luns above the lower enclosure controller are shifted down by one to skip it.
///
/// Only meaningful for slots in the expected set; re-seated drives must be filtered out with
/// `is_reseat_anomaly` first.
pub fn slot_to_bay(chassis: &ChassisConfig, slot: &SlotAddress) -> u32 {
    if slot.lun > chassis.lower_enclosure {
        slot.lun - 1
    } else {
        slot.lun
    }
}

/// A drive that is pulled and pushed back in is renumbered past the end of the chassis. Its lun
/// then says nothing about where it sits.
pub fn is_reseat_anomaly(chassis: &ChassisConfig, slot: &SlotAddress) -> bool {
    slot.lun > chassis.max_disk_lun()
}

/// How a bay was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Read straight off the drive's current bus address.
    Enumerated,
    /// Inferred as the only slot missing from the bus.
    Inferred,
    /// The drive is present but at a re-seat address; inferred as the only slot missing.
    Reseated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BayLocation {
    pub bay: u32,
    pub slot: SlotAddress,
    pub resolution: Resolution,
}

/// Find the bay of `device` (the whole-disk node, e.g. `/dev/sdq`) given the current bus
/// enumeration. `device` is `None` when the disk could not be derived at all.
pub fn locate_bay(
    chassis: &ChassisConfig,
    entries: &[BusEntry],
    device: Option<&str>,
) -> Result<BayLocation, Error> {
    let enumerated = device.and_then(|dev| {
        entries
            .iter()
            .find(|e| e.class == DeviceClass::Disk && e.device.as_deref() == Some(dev))
    });

    let resolution = match enumerated {
        Some(entry) if entry.in_chassis(chassis) && is_reseat_anomaly(chassis, &entry.slot) => {
            log::warn!(
                "{} reports bus address {}, beyond the chassis; it was probably re-seated",
                entry.device.as_deref().unwrap_or("device"),
                entry.address
            );
            Resolution::Reseated
        }
        Some(entry) => {
            let expected = ExpectedSlotSet::from_config(chassis);
            if !expected.contains(&entry.slot) {
                return Err(Error::Topology(format!(
                    "{} at bus address {} is not in a chassis bay",
                    entry.device.as_deref().unwrap_or("device"),
                    entry.address
                )));
            }
            return Ok(BayLocation {
                bay: slot_to_bay(chassis, &entry.slot),
                slot: entry.slot,
                resolution: Resolution::Enumerated,
            });
        }
        None => Resolution::Inferred,
    };

    let expected = ExpectedSlotSet::from_config(chassis);
    let observed = ObservedSlotSet::from_entries(chassis, entries);
    match resolve_missing_slot(&expected, &observed) {
        Missing::One(slot) => Ok(BayLocation {
            bay: slot_to_bay(chassis, &slot),
            slot,
            resolution,
        }),
        Missing::None => Err(Error::NoMissingSlot),
        Missing::Multiple(slots) => {
            let bays = slots.iter().map(|s| slot_to_bay(chassis, s)).collect();
            Err(Error::MultipleMissing { slots, bays })
        }
    }
}

/// Draw the chassis as seen from the front, with the topmost row (highest bays) first and `bay`
/// marked.
pub fn render_bay_diagram(chassis: &ChassisConfig, bay: u32) -> Result<String, Error> {
    let total = chassis.total_bays();
    if bay >= total {
        return Err(Error::OutOfRange { bay, total });
    }

    let width = (total - 1).to_string().len();
    let gaps = chassis.column_split.gaps();
    let mut out = String::new();

    for row in (0..chassis.rows()).rev() {
        let offset = row * chassis.bays_per_row;
        for position in 0..chassis.bays_per_row {
            let b = offset + position;
            if b == bay {
                let _ = write!(out, "[{b:0width$}]");
            } else {
                let _ = write!(out, " {b:0width$} ");
            }
            if gaps.contains(&(position + 1)) {
                out.push('|');
            }
        }
        out.push('\n');
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chassis() -> ChassisConfig {
        ChassisConfig::default()
    }

    #[test]
    fn slot_to_bay_is_bijective() {
        let chassis = chassis();
        let expected = ExpectedSlotSet::from_config(&chassis);
        let mut bays: Vec<u32> = expected.iter().map(|s| slot_to_bay(&chassis, s)).collect();
        bays.sort();
        bays.dedup();
        assert_eq!(bays, (0..chassis.total_bays()).collect::<Vec<_>>());
    }

    #[test]
    fn enclosure_offset() {
        let chassis = chassis();
        assert_eq!(slot_to_bay(&chassis, &SlotAddress::new(0, 0, 29)), 29);
        assert_eq!(slot_to_bay(&chassis, &SlotAddress::new(0, 0, 31)), 30);
        assert_eq!(slot_to_bay(&chassis, &SlotAddress::new(0, 0, 45)), 44);
        assert_eq!(slot_to_bay(&chassis, &SlotAddress::new(0, 0, 60)), 59);
    }

    /// The re-seat check looks at the highest disk lun, so it wins over the enclosure offset at
    /// the top of the range: 60 is a bay and anything above is anomalous.
    #[test]
    fn reseat_check_precedes_offset() {
        let chassis = chassis();
        assert!(!is_reseat_anomaly(&chassis, &SlotAddress::new(0, 0, 60)));
        // A disk reported at the upper enclosure's own address counts as re-seated too.
        assert!(is_reseat_anomaly(&chassis, &SlotAddress::new(0, 0, 61)));
        assert!(is_reseat_anomaly(&chassis, &SlotAddress::new(0, 0, 62)));
        assert!(is_reseat_anomaly(&chassis, &SlotAddress::new(0, 0, 90)));
    }

    #[test]
    fn missing_slot_cases() {
        let chassis = chassis();
        let expected = ExpectedSlotSet::from_config(&chassis);
        let all: Vec<SlotAddress> = expected.iter().copied().collect();

        let observed = ObservedSlotSet::from_slots(all.iter().copied());
        assert_eq!(resolve_missing_slot(&expected, &observed), Missing::None);

        let observed = ObservedSlotSet::from_slots(all.iter().copied().filter(|s| s.lun != 45));
        assert_eq!(
            resolve_missing_slot(&expected, &observed),
            Missing::One(SlotAddress::new(0, 0, 45))
        );

        let observed = ObservedSlotSet::from_slots(
            all.iter().copied().filter(|s| s.lun != 3 && s.lun != 50),
        );
        assert_eq!(
            resolve_missing_slot(&expected, &observed),
            Missing::Multiple(vec![SlotAddress::new(0, 0, 3), SlotAddress::new(0, 0, 50)])
        );
    }

    #[test]
    fn diagram_layout() {
        let chassis = chassis();
        let diagram = render_bay_diagram(&chassis, 3).unwrap();
        let rows: Vec<&str> = diagram.lines().collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[0].starts_with(" 45  46 "));
        assert!(rows[3].starts_with(" 00  01  02 [03] 04  05 | 06 "));
        assert_eq!(rows[3].matches('|').count(), 2);
        assert_eq!(diagram.matches('[').count(), 1);
        assert!(rows[3].contains(" 11 | 12 "));

        let mut chassis = chassis;
        chassis.column_split = crate::config::ColumnSplit::SixEleven;
        let diagram = render_bay_diagram(&chassis, 59).unwrap();
        let rows: Vec<&str> = diagram.lines().collect();
        assert!(rows[0].contains(" 55 | 56 "));
        assert!(rows[0].ends_with("[59]"));
    }

    #[test]
    fn diagram_out_of_range() {
        assert!(matches!(
            render_bay_diagram(&chassis(), 60),
            Err(Error::OutOfRange { bay: 60, total: 60 })
        ));
    }
}
