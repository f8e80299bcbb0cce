// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::time::Duration;

use clap::Args;

use crate::{
    bay::render_bay_diagram,
    commands::{load_config, parse_osd, Cli, Handle, HandledResult},
    removal::{RemovalState, Replacement},
    state::OperationLog,
    system::SystemController,
};

#[derive(Args, Debug, Clone)]
pub struct ReplaceArgs {
    #[arg(value_parser = parse_osd)]
    pub osd: u32,

    /// The storage node that holds the OSD. Looked up in the cluster when not given.
    #[arg(long)]
    pub host: Option<String>,

    /// Stop once the OSD is marked out instead of waiting to purge it.
    #[arg(long)]
    pub no_wait: bool,
}

/// Completes when the operator hits ctrl-c. If the signal handler cannot be installed, it never
/// completes.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await
    }
}

pub async fn replace(cli: &Cli, args: &ReplaceArgs) -> HandledResult<()> {
    let config = load_config(cli)?;
    let log = OperationLog::new(&config.paths.state_file)?;
    let system = SystemController::new(&config);
    let controller = system.controller();
    let replacement = Replacement::new(
        &controller,
        Some(&log),
        Duration::from_secs(config.removal.poll_interval_secs),
    );

    let replaced = replacement
        .run(args.osd, args.host.as_deref(), !args.no_wait, interrupted())
        .await
        .handle_err(|e| eprintln!("replacing osd.{} failed: {e}", args.osd))?;
    let Some(replaced) = replaced else {
        println!("osd.{} does not exist in the cluster; nothing to do", args.osd);
        return Ok(());
    };

    let payload = &replaced.payload;
    println!("disk:       {}", payload.disk);
    println!("serial:     {}", payload.serial);
    println!("aux device: {}", payload.aux_device);
    println!("health:     {}", payload.health);
    match payload.bay.as_deref().and_then(|b| b.parse::<u32>().ok()) {
        Some(bay) => {
            println!("bay:        {bay}\n");
            if let Ok(diagram) = render_bay_diagram(&config.chassis, bay) {
                print!("{diagram}");
            }
        }
        None => println!("bay:        unknown"),
    }

    match replaced.state {
        RemovalState::Done => println!("osd.{} has been purged", args.osd),
        _ => println!(
            "osd.{} is marked out but not purged; run this command again to finish",
            args.osd
        ),
    }
    Ok(())
}
