// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use crate::commands::{load_config, Cli, HandledResult};

pub fn validate(cli: &Cli) -> HandledResult<()> {
    let config = load_config(cli)?;

    config.print_summary();

    Ok(())
}
