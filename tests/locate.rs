// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use osd_replace_lib::{
        bay::render_bay_diagram,
        config::{ColumnSplit, Config},
        history::HistoryIndex,
        removal::{Removal, RemovalState},
        slots::SlotAddress,
        system::{HealthReport, Indicator},
        test_env::{sd_name, FakeNode},
        Error,
    };

    fn degraded(fake: &mut FakeNode, lun: u32) {
        fake.health
            .insert(sd_name(lun), HealthReport::Degraded("FAILED".to_string()));
    }

    #[test]
    fn vanished_drive_is_found_by_its_empty_slot() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        fake.drop_lun(45);
        let history = HistoryIndex::default();
        let node = fake.node();

        let record = Removal::new(&config, &node, &history, None)
            .inspect(12, false)
            .unwrap();
        assert_eq!(record.bay, Some(44));
        assert!(fake.calls().is_empty());
        assert!(fake.indicators().is_empty());
    }

    #[test]
    fn present_drive_is_read_off_the_bus() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 29);
        degraded(&mut fake, 29);
        let history = HistoryIndex::default();
        let node = fake.node();

        let record = Removal::new(&config, &node, &history, None)
            .inspect(12, true)
            .unwrap();
        assert_eq!(record.bay, Some(29));
        assert_eq!(record.bus_address.as_deref(), Some("0:0:29:0"));
        assert_eq!(fake.indicators(), vec![Indicator::Fault(sd_name(29))]);
    }

    #[test]
    fn reseated_drive_is_found_by_its_empty_slot() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        degraded(&mut fake, 45);
        fake.reseat(45, 70);
        let history = HistoryIndex::default();
        let node = fake.node();

        let record = Removal::new(&config, &node, &history, None)
            .inspect(12, false)
            .unwrap();
        assert_eq!(record.bay, Some(44));
        assert_eq!(record.bus_address.as_deref(), Some("0:0:70:0"));
    }

    #[test]
    fn two_empty_slots_are_ambiguous() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        fake.drop_lun(45);
        fake.drop_lun(50);
        let history = HistoryIndex::default();
        let node = fake.node();

        let aborted = Removal::new(&config, &node, &history, None)
            .remove(12, None)
            .unwrap_err();
        match &aborted.error {
            Error::MultipleMissing { slots, bays } => {
                assert_eq!(
                    slots,
                    &vec![SlotAddress::new(0, 0, 45), SlotAddress::new(0, 0, 50)]
                );
                assert_eq!(bays, &vec![44, 49]);
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(aborted.error.to_string().contains("44, 49"));
        assert_eq!(aborted.state, RemovalState::TopologyValidated);
        assert!(!aborted.mutated());
        assert!(fake.calls().is_empty());
        assert!(fake.indicators().is_empty());
        assert_eq!(fake.mounts.lock().unwrap().len(), 1);
    }

    #[test]
    fn full_chassis_has_nothing_to_infer() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis);
        // Mounted from a disk outside the chassis, which has not dropped off the bus.
        fake.mount("/dev/sdzz1", config.osd_dir(5));
        let history = HistoryIndex::default();
        let node = fake.node();

        let aborted = Removal::new(&config, &node, &history, None)
            .inspect(5, false)
            .unwrap_err();
        assert!(matches!(aborted.error, Error::NoMissingSlot));
        assert_eq!(aborted.record.health.map(|h| h.to_string()).as_deref(), Some("absent"));
    }

    #[test]
    fn missing_enclosure_stops_everything() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        fake.drop_lun(61);
        let history = HistoryIndex::default();
        let node = fake.node();

        let aborted = Removal::new(&config, &node, &history, None)
            .remove(12, None)
            .unwrap_err();
        assert!(matches!(aborted.error, Error::Topology(_)));
        assert_eq!(aborted.state, RemovalState::Start);
        assert_eq!(aborted.record.partition, None);
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn diagram_marks_the_bay() {
        let mut config = Config::default();
        let diagram = render_bay_diagram(&config.chassis, 44).unwrap();
        let rows: Vec<&str> = diagram.lines().collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[1].contains("[44]"));
        assert!(rows[1].starts_with(" 30  31  32  33  34  35 |"));

        config.chassis.column_split = ColumnSplit::SixEleven;
        let diagram = render_bay_diagram(&config.chassis, 0).unwrap();
        let bottom = diagram.lines().last().unwrap();
        assert!(bottom.starts_with("[00] 01  02  03  04  05 | 06  07  08  09  10 | 11 "));

        assert!(matches!(
            render_bay_diagram(&config.chassis, 60),
            Err(Error::OutOfRange { bay: 60, total: 60 })
        ));
    }
}
