// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod diagram;
pub mod locate;
pub mod remove;
pub mod replace;
pub mod snapshot;
pub mod validate;

use {
    diagram::DiagramArgs, locate::LocateArgs, remove::RemoveArgs, replace::ReplaceArgs,
};

use clap::{Parser, Subcommand};

use crate::config::Config;

/// A `HandledError` represents an error that has already been handled. When you call a function
/// that returns a `HandledError` or `HandledResult`, you don't need to do anything with that error,
/// other than just be aware that it happened, and return it on to your caller.
///
/// `main()` has a special responsibility: since its "caller" is, in a certain sense, the operating
/// system, `main()` must return a nonzero exit status when it gets a `HandledError`.
///
/// The primary way to construct a `HandledError` is with the `handle_err()` function, which turns a
/// generic error into a `HandledError`, and also runs some caller-provided code to handle the
/// error. That provided code would normally do something like report the error to stderr.
///
/// A `HandledError` intentionally has no data about what the specific error was; the process of
/// handling the error "consumes" that information, and it is no longer needed as the error was
/// already appropriately handled.
#[derive(Debug, PartialEq)]
pub struct HandledError {}

pub type HandledResult<T> = std::result::Result<T, HandledError>;

pub fn handled_error<T>() -> HandledResult<T> {
    HandledResult::Err(HandledError {})
}

pub trait Handle<T, F> {
    fn handle_err(self, handler: F) -> HandledResult<T>;
}

impl<T, E, F: FnOnce(E)> Handle<T, F> for std::result::Result<T, E> {
    /// Handle an error by running the provided `handler` code, giving it the error.
    ///
    /// Then, return a `HandledResult`, so that transitive callers of this function know that they
    /// do not need to do anything further to handle the error.
    fn handle_err(self, handler: F) -> HandledResult<T> {
        self.map_err(|e| {
            handler(e);
            HandledError {}
        })
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Locate, remove and purge failed Ceph OSD drives", long_about = None)]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report the drive behind an OSD and the bay it sits in, without changing anything.
    Locate(LocateArgs),
    /// Draw the chassis with one bay highlighted.
    Diagram(DiagramArgs),
    /// Stop an OSD on this host, unmount it and print its drive facts as JSON.
    Remove(RemoveArgs),
    /// Remove an OSD from wherever it runs, then mark it out and purge it from the cluster.
    Replace(ReplaceArgs),
    /// Record the serial number and auxiliary device of every OSD on this host.
    Snapshot,
    /// Check the config file and print a summary of it.
    Validate,
}

/// Parse an OSD given as `osd.12` or `12`.
pub fn parse_osd(arg: &str) -> Result<u32, String> {
    crate::history::parse_osd_id(arg).ok_or_else(|| format!("'{arg}' is not an OSD id"))
}

fn load_config(cli: &Cli) -> HandledResult<Config> {
    Config::load(cli.config.as_deref()).handle_err(|e| eprintln!("{e}"))
}

pub fn main(cli: &Cli) -> HandledResult<()> {
    match &cli.command {
        Commands::Locate(args) => locate::locate(cli, args),
        Commands::Diagram(args) => diagram::diagram(cli, args),
        Commands::Remove(args) => remove::remove(cli, args),
        Commands::Replace(args) => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .handle_err(|e| eprintln!("Error launching tokio runtime: {e}"))?;

            rt.block_on(replace::replace(cli, args))
        }
        Commands::Snapshot => snapshot::snapshot(cli),
        Commands::Validate => validate::validate(cli),
    }
}
