// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod health;
pub mod status;
pub mod upgrade;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cluster::Cluster;
use crate::config::Config;
use crate::ssh::SshConnector;

use {health::HealthArgs, status::StatusArgs, upgrade::UpgradeArgs};

/// A `HandledError` represents an error that has already been handled. When
/// a function returns a `HandledError` or `HandledResult`, the caller does
/// not need to do anything with the error other than be aware that it
/// happened and pass it on up.
///
/// `main()` has a special responsibility: since its "caller" is, in a
/// certain sense, the operating system, `main()` must return a nonzero exit
/// status when it gets a `HandledError`.
///
/// The primary way to construct a `HandledError` is with `handle_err()`,
/// which turns a generic error into a `HandledError` and runs some
/// caller-provided code (normally reporting to stderr) to handle it.
#[derive(Debug, PartialEq)]
pub struct HandledError {}

pub type HandledResult<T> = std::result::Result<T, HandledError>;

pub fn handled_error() -> HandledResult<()> {
    HandledResult::Err(HandledError {})
}

pub trait Handle<T, F> {
    fn handle_err(self, handler: F) -> HandledResult<T>;
}

impl<T, E, F: FnOnce(E)> Handle<T, F> for std::result::Result<T, E> {
    /// Handle an error by running the provided `handler` code, giving it
    /// the error, then return a `HandledResult` so transitive callers know
    /// nothing further is needed.
    fn handle_err(self, handler: F) -> HandledResult<T> {
        self.map_err(|e| {
            handler(e);
            HandledError {}
        })
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the cluster inventory file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Status(StatusArgs),
    Health(HealthArgs),
    Upgrade(UpgradeArgs),
}

pub fn main(cli: &Cli) -> HandledResult<()> {
    let rt = tokio::runtime::Runtime::new()
        .handle_err(|e| eprintln!("Error launching tokio runtime: {e}"))?;

    rt.block_on(async {
        let config = Config::load(cli.config.clone())
            .handle_err(|e| eprintln!("Could not load cluster inventory: {e}"))?;
        let cluster = Cluster::from_config(&config, Arc::new(SshConnector::new()))
            .handle_err(|e| eprintln!("Could not build the cluster model: {e}"))?;
        let cluster = Arc::new(cluster);

        match &cli.command {
            Commands::Status(args) => status::status(&cluster, args).await,
            Commands::Health(args) => health::health(&cluster, args).await,
            Commands::Upgrade(args) => upgrade::upgrade(cluster, &config.upgrade, args).await,
        }
    })
}
