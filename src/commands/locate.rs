// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::path::Path;

use clap::Args;

use crate::{
    bay::render_bay_diagram,
    commands::{handled_error, load_config, parse_osd, Cli, Handle, HandledResult},
    history::HistoryIndex,
    removal::Removal,
    system::SystemNode,
};

#[derive(Args, Debug, Clone)]
pub struct LocateArgs {
    #[arg(value_parser = parse_osd)]
    pub osd: u32,

    /// Also light up the bay on the enclosure.
    #[arg(long)]
    pub led: bool,

    /// Print the drive facts as JSON instead of a report.
    #[arg(long)]
    pub json: bool,
}

pub fn locate(cli: &Cli, args: &LocateArgs) -> HandledResult<()> {
    let config = load_config(cli)?;
    let history = HistoryIndex::load(Path::new(&config.paths.snapshot_log))
        .handle_err(|e| eprintln!("could not read snapshot log: {e}"))?;
    let system = SystemNode::new(&config);
    let node = system.node();

    let record = match Removal::new(&config, &node, &history, None).inspect(args.osd, args.led) {
        Ok(record) => record,
        Err(aborted) => {
            eprintln!("{}", aborted.dump());
            return handled_error();
        }
    };

    if args.json {
        let json = serde_json::to_string_pretty(&record.payload())
            .handle_err(|e| eprintln!("could not serialize drive facts: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    print!("{}", record.dump());
    if let Some(bay) = record.bay {
        println!();
        let diagram = render_bay_diagram(&config.chassis, bay).handle_err(|e| eprintln!("{e}"))?;
        print!("{diagram}");
    }
    Ok(())
}
