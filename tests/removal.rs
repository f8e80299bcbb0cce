// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use osd_replace_lib::{
        config::Config,
        facts::ResultPayload,
        history::HistoryIndex,
        removal::{Removal, RemovalState, Replacement},
        state::{Event, OperationLog},
        system::{HealthReport, Indicator},
        test_env::{controller, fsid, sd_name, test_dir, FakeCluster, FakeNode, FakeRemote},
        Error,
    };

    fn payload() -> ResultPayload {
        ResultPayload {
            disk: "/dev/sdat".to_string(),
            bay: Some("44".to_string()),
            serial: "ZC10ABCD".to_string(),
            aux_device: "/dev/sdbk1".to_string(),
            health: "absent".to_string(),
        }
    }

    #[test]
    fn removes_a_vanished_drive() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        fake.drop_lun(45);
        let history = HistoryIndex::parse("osd.12 /dev/sdbk1 ZC10ABCD\n");
        let node = fake.node();

        let record = Removal::new(&config, &node, &history, None)
            .remove(12, None)
            .unwrap();
        assert_eq!(record.payload(), payload());
        assert_eq!(record.fsid, Some(fsid(12, 45)));
        assert_eq!(
            fake.calls(),
            vec![
                "stop ceph-osd@12",
                "disable ceph-osd@12",
                "umount /var/lib/ceph/osd/ceph-12",
            ]
        );
        assert!(fake.mounts.lock().unwrap().is_empty());

        // The dark bay is the one not lit.
        let indicators = fake.indicators();
        assert_eq!(indicators.len(), 1);
        let Indicator::LocateAllExcept(good) = &indicators[0] else {
            panic!("unexpected indicator {:?}", indicators[0]);
        };
        assert_eq!(good.len(), 59);
        assert!(!good.contains(&sd_name(45)));
    }

    #[test]
    fn healthy_drive_is_left_alone() {
        let config = Config::default();
        let fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        let history = HistoryIndex::default();
        let node = fake.node();

        let aborted = Removal::new(&config, &node, &history, None)
            .remove(12, None)
            .unwrap_err();
        assert!(matches!(aborted.error, Error::NotADiskIssue { .. }));
        assert_eq!(aborted.record.serial.as_deref(), Some("SER45"));
        assert!(!aborted.mutated());
        assert!(fake.calls().is_empty());
        assert!(aborted.dump().contains("healthy"));
    }

    #[test]
    fn led_failure_does_not_stop_a_removal() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        fake.health
            .insert(sd_name(45), HealthReport::Degraded("FAILED".to_string()));
        fake.fail_leds = true;
        let history = HistoryIndex::default();
        let node = fake.node();

        let record = Removal::new(&config, &node, &history, None)
            .remove(12, None)
            .unwrap();
        assert_eq!(record.bay, Some(44));
        assert_eq!(fake.calls().len(), 3);
    }

    #[test]
    fn service_failure_keeps_the_record() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        fake.drop_lun(45);
        fake.fail_services = true;
        let history = HistoryIndex::default();
        let node = fake.node();

        let aborted = Removal::new(&config, &node, &history, None)
            .remove(12, None)
            .unwrap_err();
        assert_eq!(aborted.state, RemovalState::Located);
        assert_eq!(aborted.record.bay, Some(44));
        assert!(matches!(aborted.error, Error::Source(_)));
        assert!(aborted.dump().contains("bay:         44"));
        assert_eq!(fake.mounts.lock().unwrap().len(), 1);
    }

    #[test]
    fn other_fsid_is_left_alone() {
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        fake.drop_lun(45);
        let history = HistoryIndex::default();
        let node = fake.node();

        let aborted = Removal::new(&config, &node, &history, None)
            .remove(12, Some("fsid-of-another-osd"))
            .unwrap_err();
        match &aborted.error {
            Error::FsidMismatch {
                osd_id,
                expected,
                found,
            } => {
                assert_eq!(*osd_id, 12);
                assert_eq!(expected, "fsid-of-another-osd");
                assert_eq!(found, &fsid(12, 45));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(!aborted.mutated());
        assert!(fake.calls().is_empty());
        assert!(fake.indicators().is_empty());
        assert_eq!(fake.mounts.lock().unwrap().len(), 1);
    }

    #[test]
    fn removal_can_be_rerun() {
        let dir = test_dir("removal_can_be_rerun");
        let log = OperationLog::new(&format!("{dir}/operations.log")).unwrap();
        let config = Config::default();
        let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
        fake.drop_lun(45);
        let history = HistoryIndex::parse("osd.12 /dev/sdbk1 ZC10ABCD\n");
        let node = fake.node();
        let removal = Removal::new(&config, &node, &history, Some(&log));
        let id = fsid(12, 45);

        let first = removal.remove_or_resume(12, Some(&id)).unwrap();
        assert_eq!(log.latest(12, Some(&id)).unwrap().event, Event::Emitted);

        let second = removal.remove_or_resume(12, Some(&id)).unwrap();
        assert_eq!(first, second);
        assert_eq!(fake.calls().len(), 3);

        // The record survives a restart.
        let reopened = OperationLog::new(&format!("{dir}/operations.log")).unwrap();
        assert_eq!(reopened.emitted_payload(12, Some(&id)), Some(first));
    }

    #[test]
    fn reused_id_is_not_resumed() {
        let dir = test_dir("reused_id_is_not_resumed");
        let path = format!("{dir}/operations.log");
        let config = Config::default();
        let history = HistoryIndex::parse("osd.12 /dev/sdbk1 ZC10ABCD\n");

        {
            let log = OperationLog::new(&path).unwrap();
            let mut fake = FakeNode::new(&config.chassis).with_osd(&config, 12, 45);
            fake.drop_lun(45);
            let node = fake.node();
            Removal::new(&config, &node, &history, Some(&log))
                .remove_or_resume(12, Some(&fsid(12, 45)))
                .unwrap();
        }

        // osd.12 was purged and its id handed to a new OSD, whose data directory is not
        // mounted. The facts of the old drive must not come back.
        let log = OperationLog::new(&path).unwrap();
        let fake = FakeNode::new(&config.chassis);
        let node = fake.node();
        let aborted = Removal::new(&config, &node, &history, Some(&log))
            .remove_or_resume(12, Some("fsid-of-the-new-osd"))
            .unwrap_err();
        assert!(matches!(aborted.error, Error::NotMounted { osd_id: 12, .. }));
        assert!(!aborted.mutated());
        assert!(fake.calls().is_empty());

        // Without an fsid nothing is resumed either.
        let aborted = Removal::new(&config, &node, &history, Some(&log))
            .remove_or_resume(12, None)
            .unwrap_err();
        assert!(matches!(aborted.error, Error::NotMounted { .. }));
    }

    #[tokio::test]
    async fn replacement_purges_once_safe() {
        let cluster = FakeCluster::new(2).with_osd(12, "stor04", "F12");
        let remote = FakeRemote::new(Some(payload()));
        let controller = controller(&cluster, &remote);
        let replacement = Replacement::new(&controller, None, Duration::from_millis(1));

        let replaced = replacement
            .run(12, None, true, std::future::pending())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.state, RemovalState::Done);
        assert_eq!(replaced.payload, payload());
        assert_eq!(remote.calls(), vec!["stor04 remove 12 F12"]);
        assert_eq!(
            cluster.calls(),
            vec![
                "out 12",
                "safe-to-destroy 12",
                "safe-to-destroy 12",
                "safe-to-destroy 12",
                "purge 12",
            ]
        );
        assert!(cluster.osds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_wait_leaves_the_osd_out() {
        let cluster = FakeCluster::new(u32::MAX).with_osd(12, "stor01", "F12");
        let remote = FakeRemote::new(Some(payload()));
        let controller = controller(&cluster, &remote);
        let replacement = Replacement::new(&controller, None, Duration::from_secs(3600));

        let replaced = replacement
            .run(12, Some("stor04"), true, async {})
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.state, RemovalState::MarkedOut);
        assert_eq!(remote.calls(), vec!["stor04 remove 12 F12"]);
        assert_eq!(cluster.calls(), vec!["out 12", "safe-to-destroy 12"]);
    }

    #[tokio::test]
    async fn no_wait_stops_after_marking_out() {
        let cluster = FakeCluster::new(0).with_osd(12, "stor04", "F12");
        let remote = FakeRemote::new(Some(payload()));
        let controller = controller(&cluster, &remote);
        let replacement = Replacement::new(&controller, None, Duration::from_millis(1));

        let replaced = replacement
            .run(12, None, false, std::future::pending())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.state, RemovalState::MarkedOut);
        assert_eq!(cluster.calls(), vec!["out 12"]);
    }

    #[tokio::test]
    async fn failed_remote_removal_changes_nothing() {
        let cluster = FakeCluster::new(0).with_osd(12, "stor04", "F12");
        let remote = FakeRemote::new(None);
        let controller = controller(&cluster, &remote);
        let replacement = Replacement::new(&controller, None, Duration::from_millis(1));

        let result = replacement.run(12, None, true, std::future::pending()).await;
        assert!(matches!(result, Err(Error::Source(_))));
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_osd_is_a_no_op() {
        let cluster = FakeCluster::new(0);
        let remote = FakeRemote::new(Some(payload()));
        let controller = controller(&cluster, &remote);
        let replacement = Replacement::new(&controller, None, Duration::from_millis(1));

        let replaced = replacement
            .run(12, Some("stor04"), true, std::future::pending())
            .await
            .unwrap();
        assert_eq!(replaced, None);
        assert!(remote.calls().is_empty());
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn rerun_replacement_resumes_from_the_log() {
        let dir = test_dir("rerun_replacement_resumes_from_the_log");
        let log = OperationLog::new(&format!("{dir}/operations.log")).unwrap();

        let cluster = FakeCluster::new(0).with_osd(12, "stor04", "F12");
        let remote = FakeRemote::new(Some(payload()));
        let controller = controller(&cluster, &remote);
        let first = Replacement::new(&controller, Some(&log), Duration::from_millis(1));
        let replaced = first
            .run(12, None, false, std::future::pending())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.state, RemovalState::MarkedOut);
        assert_eq!(log.latest(12, Some("F12")).unwrap().event, Event::MarkedOut);

        // The storage node has already been cleaned up, so a second remote removal would fail.
        let unreachable = FakeRemote::new(None);
        let controller = osd_replace_lib::test_env::controller(&cluster, &unreachable);
        let second = Replacement::new(&controller, Some(&log), Duration::from_millis(1));
        let replaced = second
            .run(12, None, true, std::future::pending())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.state, RemovalState::Done);
        assert_eq!(replaced.payload, payload());
        assert!(unreachable.calls().is_empty());

        // Purged: the cluster no longer knows the OSD, so a third run does nothing.
        let replaced = second
            .run(12, None, true, std::future::pending())
            .await
            .unwrap();
        assert_eq!(replaced, None);
        assert!(unreachable.calls().is_empty());
        assert_eq!(cluster.calls().iter().filter(|c| *c == "purge 12").count(), 1);
    }

    #[tokio::test]
    async fn reused_id_is_replaced_again() {
        let dir = test_dir("reused_id_is_replaced_again");
        let log = OperationLog::new(&format!("{dir}/operations.log")).unwrap();

        let cluster = FakeCluster::new(0).with_osd(12, "stor04", "F-old");
        let remote = FakeRemote::new(Some(payload()));
        let controller = controller(&cluster, &remote);
        let replacement = Replacement::new(&controller, Some(&log), Duration::from_millis(1));
        let replaced = replacement
            .run(12, None, true, std::future::pending())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.state, RemovalState::Done);

        let replaced = replacement
            .run(12, None, true, std::future::pending())
            .await
            .unwrap();
        assert_eq!(replaced, None);
        assert_eq!(remote.calls().len(), 1);

        // The id is handed to the OSD on the replacement drive, which later fails too.
        cluster.add_osd(12, "stor07", "F-new");
        let new_payload = ResultPayload {
            serial: "NEWSERIAL".to_string(),
            ..payload()
        };
        let remote = FakeRemote::new(Some(new_payload.clone()));
        let controller = osd_replace_lib::test_env::controller(&cluster, &remote);
        let replacement = Replacement::new(&controller, Some(&log), Duration::from_millis(1));
        let replaced = replacement
            .run(12, None, true, std::future::pending())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.state, RemovalState::Done);
        assert_eq!(replaced.payload, new_payload);
        assert_eq!(remote.calls(), vec!["stor07 remove 12 F-new"]);
        assert_eq!(cluster.calls().iter().filter(|c| *c == "purge 12").count(), 2);
    }
}
