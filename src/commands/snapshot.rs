// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::path::Path;

use crate::{
    commands::{load_config, Cli, Handle, HandledResult},
    facts::Collector,
    history::{self, HistoryIndex},
    system::SystemNode,
};

/// Append one snapshot line per OSD mounted on this host. Meant to be run periodically, so that
/// the facts are on record before a drive fails and takes them with it.
pub fn snapshot(cli: &Cli) -> HandledResult<()> {
    let config = load_config(cli)?;
    let path = Path::new(&config.paths.snapshot_log);
    let history = HistoryIndex::load(path)
        .handle_err(|e| eprintln!("could not read snapshot log: {e}"))?;
    let system = SystemNode::new(&config);
    let node = system.node();

    // Bus addresses are not recorded, so a failed enumeration does not matter here.
    let entries = node.bus.enumerate().unwrap_or_else(|e| {
        log::warn!("could not enumerate the bus: {e}");
        Vec::new()
    });

    let collector = Collector::new(&config, &node, &history, &entries);
    let osds = collector
        .mounted_osds()
        .handle_err(|e| eprintln!("could not list OSDs: {e}"))?;
    let snapshot: Vec<_> = osds
        .into_iter()
        .filter_map(|osd_id| collector.snapshot(osd_id))
        .collect();

    history::append(path, &snapshot)
        .handle_err(|e| eprintln!("could not write snapshot log: {e}"))?;
    log::info!("recorded {} OSDs in {}", snapshot.len(), path.display());
    Ok(())
}
