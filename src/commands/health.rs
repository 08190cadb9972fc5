// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::sync::Arc;

use clap::Args;
use tokio::time::Duration;

use crate::cluster::Cluster;
use crate::commands::{handled_error, Handle, HandledResult};

#[derive(Args, Debug, Clone)]
pub struct HealthArgs {
    /// Seconds to wait for pending placement groups to settle.
    #[arg(long, default_value_t = 300)]
    timeout: u64,
}

pub async fn health(cluster: &Arc<Cluster>, args: &HealthArgs) -> HandledResult<()> {
    let client = cluster
        .admin_client()
        .handle_err(|e| eprintln!("No node can answer health queries: {e}"))?;

    let healthy = cluster
        .check_health(&client, Duration::from_secs(args.timeout))
        .await
        .handle_err(|e| eprintln!("Health check did not complete: {e}"))?;

    if healthy {
        println!("cluster {} is healthy", cluster.name);
        Ok(())
    } else {
        eprintln!("cluster {} is unhealthy", cluster.name);
        handled_error()
    }
}
