// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    bay::render_bay_diagram,
    commands::{load_config, Cli, Handle, HandledResult},
    config::ColumnSplit,
};

#[derive(Args, Debug, Clone)]
pub struct DiagramArgs {
    pub bay: u32,

    /// Override the column split from the config file.
    #[arg(long, value_enum)]
    pub split: Option<ColumnSplit>,
}

pub fn diagram(cli: &Cli, args: &DiagramArgs) -> HandledResult<()> {
    let mut chassis = load_config(cli)?.chassis;
    if let Some(split) = args.split {
        chassis.column_split = split;
    }

    let diagram = render_bay_diagram(&chassis, args.bay).handle_err(|e| eprintln!("{e}"))?;
    print!("{diagram}");
    Ok(())
}
