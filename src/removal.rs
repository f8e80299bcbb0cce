// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The removal state machine.
//!
//! The storage-node side runs
//! `Start -> TopologyValidated -> Located -> ServiceStopped -> Unmounted -> FactsEmitted`, and the
//! controller side picks up from there with
//! `MarkedOut -> SafeToDestroyConfirmed -> Purged -> Done`.
//!
//! Every step threads the partially filled `DriveRecord` along, so that whatever stops a removal
//! is reported together with everything that had been learned up to that point.

use std::{fmt, future::Future, time::Duration};

use crate::{
    bay::{locate_bay, Resolution},
    config::Config,
    facts::{Collector, DriveRecord, ResultPayload},
    history::HistoryIndex,
    slots::{validate_topology, BusEntry, DeviceClass},
    state::{Event, OperationLog},
    system::{Controller, Indicator, LocalNode},
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalState {
    Start,
    TopologyValidated,
    Located,
    ServiceStopped,
    Unmounted,
    FactsEmitted,
    MarkedOut,
    SafeToDestroyConfirmed,
    Purged,
    Done,
}

impl fmt::Display for RemovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RemovalState::Start => "start",
                RemovalState::TopologyValidated => "topology validated",
                RemovalState::Located => "located",
                RemovalState::ServiceStopped => "service stopped",
                RemovalState::Unmounted => "unmounted",
                RemovalState::FactsEmitted => "facts emitted",
                RemovalState::MarkedOut => "marked out",
                RemovalState::SafeToDestroyConfirmed => "safe to destroy",
                RemovalState::Purged => "purged",
                RemovalState::Done => "done",
            }
        )
    }
}

/// A removal that stopped part way. `state` is the last state that was reached.
#[derive(Debug)]
pub struct Aborted {
    pub state: RemovalState,
    pub record: DriveRecord,
    pub error: Error,
}

impl Aborted {
    /// Whether anything on the host had been changed before the removal stopped.
    pub fn mutated(&self) -> bool {
        !matches!(
            self.state,
            RemovalState::Start | RemovalState::TopologyValidated | RemovalState::Located
        )
    }

    pub fn dump(&self) -> String {
        format!(
            "removal of osd.{} aborted after '{}': {}\n{}",
            self.record.osd_id,
            self.state,
            self.error,
            self.record.dump()
        )
    }
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "removal of osd.{} aborted after '{}': {}",
            self.record.osd_id, self.state, self.error
        )
    }
}

impl std::error::Error for Aborted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// The storage-node side of a removal.
pub struct Removal<'a> {
    config: &'a Config,
    node: &'a LocalNode<'a>,
    history: &'a HistoryIndex,
    log: Option<&'a OperationLog>,
}

impl<'a> Removal<'a> {
    pub fn new(
        config: &'a Config,
        node: &'a LocalNode<'a>,
        history: &'a HistoryIndex,
        log: Option<&'a OperationLog>,
    ) -> Self {
        Removal {
            config,
            node,
            history,
            log,
        }
    }

    fn note(&self, event: Event, osd_id: u32, fsid: Option<&str>, comment: Option<String>) {
        if let Some(log) = self.log {
            log.note(event, osd_id, fsid, comment);
        }
    }

    /// Stop, unmount and describe the OSD's drive. Nothing is changed on the host unless the
    /// chassis topology checks out and the drive is really the problem. When `fsid` is given,
    /// the OSD on this host must have it.
    pub fn remove(&self, osd_id: u32, fsid: Option<&str>) -> Result<DriveRecord, Aborted> {
        let mut record = DriveRecord::new(osd_id);
        let mut state = RemovalState::Start;

        match self.run(&mut record, &mut state, fsid) {
            Ok(()) => Ok(record),
            Err(error) => {
                let key = record.fsid.as_deref().or(fsid);
                self.note(Event::Aborted, osd_id, key, Some(error.to_string()));
                Err(Aborted {
                    state,
                    record,
                    error,
                })
            }
        }
    }

    /// Run the read-only part of a removal: check the topology, collect the facts and find the
    /// bay. Only the enclosure lights are touched, and only if `led` is set.
    pub fn inspect(&self, osd_id: u32, led: bool) -> Result<DriveRecord, Aborted> {
        let mut record = DriveRecord::new(osd_id);
        let mut state = RemovalState::Start;

        let result = self.node.bus.enumerate().map_err(Error::from).and_then(|entries| {
            validate_topology(&self.config.chassis, &entries)?;
            state = RemovalState::TopologyValidated;
            self.locate(&mut record, &entries)?;
            state = RemovalState::Located;
            if led {
                self.light(&record, &entries);
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(record),
            Err(error) => Err(Aborted {
                state,
                record,
                error,
            }),
        }
    }

    /// Like `remove`, but if this host already emitted facts for the OSD with this `fsid` and
    /// its data directory is no longer mounted, hand back those facts again instead of failing.
    pub fn remove_or_resume(
        &self,
        osd_id: u32,
        fsid: Option<&str>,
    ) -> Result<ResultPayload, Aborted> {
        if let Some(payload) = self.resumable(osd_id, fsid) {
            log::info!("osd.{osd_id} was already removed on this host; re-emitting its facts");
            return Ok(payload);
        }
        self.remove(osd_id, fsid).map(|record| record.payload())
    }

    /// Without an fsid there is no telling an earlier removal of this OSD from one of an older
    /// OSD that had the same id, so nothing is resumed.
    fn resumable(&self, osd_id: u32, fsid: Option<&str>) -> Option<ResultPayload> {
        let log = self.log?;
        let fsid = fsid?;
        if log.latest(osd_id, Some(fsid))?.event != Event::Emitted {
            return None;
        }
        let dir = self.config.osd_dir(osd_id);
        match self.node.mounts.mount_source(&dir) {
            Ok(None) => log.emitted_payload(osd_id, Some(fsid)),
            _ => None,
        }
    }

    fn run(
        &self,
        record: &mut DriveRecord,
        state: &mut RemovalState,
        fsid: Option<&str>,
    ) -> Result<(), Error> {
        let osd_id = record.osd_id;

        let entries = self.node.bus.enumerate()?;
        validate_topology(&self.config.chassis, &entries)?;
        *state = RemovalState::TopologyValidated;

        self.locate(record, &entries)?;
        if let (Some(expected), Some(found)) = (fsid, record.fsid.as_deref()) {
            if expected != found {
                return Err(Error::FsidMismatch {
                    osd_id,
                    expected: expected.to_string(),
                    found: found.to_string(),
                });
            }
        }
        *state = RemovalState::Located;

        let key = record.fsid.clone().or(fsid.map(str::to_string));
        let key = key.as_deref();
        self.note(Event::Located, osd_id, key, record.bay.map(|b| format!("bay {b}")));
        self.light(record, &entries);

        let unit = self.config.osd_unit(osd_id);
        self.node.services.stop(&unit)?;
        self.node.services.disable(&unit)?;
        *state = RemovalState::ServiceStopped;
        self.note(Event::Stopped, osd_id, key, Some(unit));

        let dir = self.config.osd_dir(osd_id);
        self.node.mounts.force_unmount(&dir)?;
        *state = RemovalState::Unmounted;
        self.note(Event::Unmounted, osd_id, key, Some(dir.display().to_string()));

        let payload = record.payload();
        self.note(
            Event::Emitted,
            osd_id,
            key,
            serde_json::to_string(&payload).ok(),
        );
        *state = RemovalState::FactsEmitted;

        Ok(())
    }

    /// Collect the drive facts and work out its bay, without changing anything.
    pub fn locate(&self, record: &mut DriveRecord, entries: &[BusEntry]) -> Result<(), Error> {
        let collector = Collector::new(self.config, self.node, self.history, entries);
        collector.collect(record)?.into_result(record)?;

        let device = match record.device_present {
            Some(true) => record.device.as_deref(),
            _ => None,
        };
        let location = locate_bay(&self.config.chassis, entries, device)?;
        match location.resolution {
            Resolution::Enumerated => {}
            Resolution::Inferred => log::info!(
                "bay {} inferred as the only empty slot ({})",
                location.bay,
                location.slot
            ),
            Resolution::Reseated => log::warn!(
                "bay {} inferred as the only empty slot ({}); the drive was re-seated",
                location.bay,
                location.slot
            ),
        }
        record.bay = Some(location.bay);
        Ok(())
    }

    /// Light up the bay. A drive that is still present gets its failure light; for one that is
    /// gone, every other drive is lit so the dark bay stands out.
    fn light(&self, record: &DriveRecord, entries: &[BusEntry]) {
        let indicator = match (&record.device, record.device_present) {
            (Some(dev), Some(true)) => Indicator::Fault(dev.clone()),
            _ => Indicator::LocateAllExcept(
                entries
                    .iter()
                    .filter(|e| e.class == DeviceClass::Disk && e.in_chassis(&self.config.chassis))
                    .filter_map(|e| e.device.clone())
                    .collect(),
            ),
        };
        if let Err(e) = self.node.leds.set(&indicator) {
            log::warn!("could not set enclosure indicator: {e}");
        }
    }
}

/// How the wait for safe-to-destroy ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Safe,
    Cancelled,
}

/// What a controller-side run achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced {
    pub payload: ResultPayload,
    /// The last state reached: `Done` once purged, `MarkedOut` if the wait was cancelled or
    /// skipped.
    pub state: RemovalState,
}

/// The controller side of a removal.
pub struct Replacement<'a> {
    controller: &'a Controller<'a>,
    log: Option<&'a OperationLog>,
    poll_interval: Duration,
}

impl<'a> Replacement<'a> {
    pub fn new(
        controller: &'a Controller<'a>,
        log: Option<&'a OperationLog>,
        poll_interval: Duration,
    ) -> Self {
        Replacement {
            controller,
            log,
            poll_interval,
        }
    }

    fn note(&self, event: Event, osd_id: u32, fsid: Option<&str>, comment: Option<String>) {
        if let Some(log) = self.log {
            log.note(event, osd_id, fsid, comment);
        }
    }

    /// Get the drive facts from the storage node, running the removal there unless this
    /// controller already holds facts for this OSD from an earlier run.
    pub fn hand_off(
        &self,
        osd_id: u32,
        host: &str,
        fsid: Option<&str>,
    ) -> Result<ResultPayload, Error> {
        if let Some(payload) = self.log.and_then(|log| log.emitted_payload(osd_id, fsid)) {
            log::info!("reusing facts for osd.{osd_id} from an earlier run");
            return Ok(payload);
        }

        log::info!("removing osd.{osd_id} on {host}");
        let payload = self.controller.remote.remove(host, osd_id, fsid)?;
        self.note(
            Event::Emitted,
            osd_id,
            fsid,
            serde_json::to_string(&payload).ok(),
        );
        Ok(payload)
    }

    pub fn mark_out(&self, osd_id: u32, fsid: Option<&str>) -> Result<(), Error> {
        self.controller.cluster.mark_out(osd_id)?;
        self.note(Event::MarkedOut, osd_id, fsid, None);
        Ok(())
    }

    /// Poll until the cluster reports the OSD safe to destroy, or until `cancel` completes.
    /// Nothing irreversible has happened yet, so cancelling leaves the OSD merely marked out.
    pub async fn wait_safe_to_destroy<F>(
        &self,
        osd_id: u32,
        fsid: Option<&str>,
        cancel: F,
    ) -> Result<WaitOutcome, Error>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        loop {
            if self.controller.cluster.safe_to_destroy(osd_id)? {
                self.note(Event::Safe, osd_id, fsid, None);
                return Ok(WaitOutcome::Safe);
            }
            log::info!(
                "osd.{osd_id} is not yet safe to destroy; checking again in {}s",
                self.poll_interval.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = &mut cancel => {
                    self.note(Event::Cancelled, osd_id, fsid, None);
                    return Ok(WaitOutcome::Cancelled);
                }
            }
        }
    }

    pub fn purge(&self, osd_id: u32, fsid: Option<&str>) -> Result<(), Error> {
        self.controller.cluster.purge(osd_id)?;
        self.note(Event::Purged, osd_id, fsid, None);
        Ok(())
    }

    /// The whole controller side: hand off, mark out, wait, purge. With `wait` false the OSD is
    /// left marked out for a later run to finish. `None` means the cluster has no such OSD,
    /// either because an earlier run purged it or because it never existed.
    pub async fn run<F>(
        &self,
        osd_id: u32,
        host: Option<&str>,
        wait: bool,
        cancel: F,
    ) -> Result<Option<Replaced>, Error>
    where
        F: Future<Output = ()>,
    {
        let Some(location) = self.controller.cluster.find(osd_id)? else {
            log::info!("osd.{osd_id} is not in the cluster");
            return Ok(None);
        };
        let fsid = location.fsid.as_deref();
        let host = host.unwrap_or(&location.host);

        let payload = self.hand_off(osd_id, host, fsid)?;
        self.mark_out(osd_id, fsid)?;

        if !wait {
            return Ok(Some(Replaced {
                payload,
                state: RemovalState::MarkedOut,
            }));
        }

        let state = match self.wait_safe_to_destroy(osd_id, fsid, cancel).await? {
            WaitOutcome::Cancelled => RemovalState::MarkedOut,
            WaitOutcome::Safe => {
                self.purge(osd_id, fsid)?;
                RemovalState::Done
            }
        };
        Ok(Some(Replaced { payload, state }))
    }
}
