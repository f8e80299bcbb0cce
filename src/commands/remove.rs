// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::path::Path;

use clap::Args;

use crate::{
    commands::{handled_error, load_config, parse_osd, Cli, Handle, HandledResult},
    history::HistoryIndex,
    removal::Removal,
    state::OperationLog,
    system::SystemNode,
};

#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
    #[arg(value_parser = parse_osd)]
    pub osd: u32,

    /// The fsid the cluster knows the OSD by. The removal refuses to touch an OSD with a
    /// different one, and only a removal with a known fsid is ever resumed.
    #[arg(long)]
    pub fsid: Option<String>,
}

/// Run the storage-node side of a removal. The drive facts go to stdout as a single line of
/// JSON for the controller to read; everything else goes to stderr.
pub fn remove(cli: &Cli, args: &RemoveArgs) -> HandledResult<()> {
    let config = load_config(cli)?;
    let history = HistoryIndex::load(Path::new(&config.paths.snapshot_log))
        .handle_err(|e| eprintln!("could not read snapshot log: {e}"))?;
    let log = OperationLog::new(&config.paths.state_file)?;
    let system = SystemNode::new(&config);
    let node = system.node();

    let removal = Removal::new(&config, &node, &history, Some(&log));
    let payload = match removal.remove_or_resume(args.osd, args.fsid.as_deref()) {
        Ok(payload) => payload,
        Err(aborted) => {
            eprintln!("{}", aborted.dump());
            if !aborted.mutated() {
                eprintln!("nothing was changed on this host");
            }
            return handled_error();
        }
    };

    let json = serde_json::to_string(&payload)
        .handle_err(|e| eprintln!("could not serialize drive facts: {e}"))?;
    println!("{json}");
    Ok(())
}
