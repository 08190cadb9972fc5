// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::sync::Arc;

use clap::Args;

use crate::cluster::Cluster;
use crate::commands::{handled_error, HandledResult};
use crate::config::UpgradeSpec;
use crate::upgrade::{Orch, UpgradeConfig};

#[derive(Args, Debug, Clone)]
pub struct UpgradeArgs {
    /// Target container image; the "latest" tag when omitted.
    #[arg(long)]
    image: Option<String>,

    /// Run a client write workload for the duration of the upgrade.
    #[arg(long)]
    benchmark: bool,

    /// Verify cluster health once the upgrade completes.
    #[arg(long)]
    verify_health: bool,
}

pub async fn upgrade(
    cluster: Arc<Cluster>,
    spec: &UpgradeSpec,
    args: &UpgradeArgs,
) -> HandledResult<()> {
    // Command-line flags win over the inventory's upgrade section.
    let mut config = UpgradeConfig::from(spec);
    if args.image.is_some() {
        config.image = args.image.clone();
    }
    config.benchmark |= args.benchmark;
    config.verify_cluster_health |= args.verify_health;

    let orch = Orch::new(cluster, config);
    match orch.run().await {
        0 => Ok(()),
        _ => handled_error(),
    }
}
