// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;

use osd_replace_lib::commands::{self, Cli};

/// The osd-replace binary runs both sides of a drive replacement: `remove` on the storage node,
/// `replace` on the controller.
fn main() {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("OSD_REPLACE_LOG", default_level),
    )
    .init();

    if commands::main(&args).is_err() {
        std::process::exit(1);
    }
}
