// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::sync::Arc;

use clap::Args;

use crate::cluster::Cluster;
use crate::commands::{Handle, HandledResult};
use crate::exec::ExecOpts;

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Also query the live cluster status text.
    #[arg(long)]
    live: bool,
}

pub async fn status(cluster: &Arc<Cluster>, args: &StatusArgs) -> HandledResult<()> {
    println!("cluster {} (version {})", cluster.name, cluster.version());

    for node in cluster.nodes() {
        println!(
            "{}: roles [{}], volumes {} free / {} allocated",
            node,
            node.role(),
            node.free_volumes(),
            node.allocated_volumes(),
        );
    }

    let networks = cluster.networks();
    if !networks.public.is_empty() {
        println!("public networks: {}", networks.public_csv());
    }
    if !networks.cluster.is_empty() {
        println!("cluster networks: {}", networks.cluster_csv());
    }

    if args.live {
        let client = cluster
            .admin_client()
            .handle_err(|e| eprintln!("No node can answer status queries: {e}"))?;
        let output = client
            .exec_command(&cluster.admin_command("ceph -s"), &ExecOpts::as_root())
            .await
            .handle_err(|e| eprintln!("Could not query cluster status: {e}"))?;
        println!("{}", output.stdout);
    }

    Ok(())
}
