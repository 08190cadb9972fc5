// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use cidr::IpCidr;
use futures::future;
use log::{error, info};
use serde_json::Value;
use tokio::time::{sleep, Duration, Instant};

use crate::config::Config;
use crate::conn::Connector;
use crate::error::CephError;
use crate::exec::{CommandOutput, ExecOpts};
use crate::node::Node;
use crate::role::RoleObject;

/// Placement-group states that mean the cluster is still settling.
const PENDING_STATES: [&str; 3] = ["peering", "activating", "creating"];

/// Placement-group states a settled cluster must show.
const VALID_STATES: [&str; 1] = ["active+clean"];

/// Cadence of the health-check poll loop.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Release marker for a cluster, e.g. "4.3" or "5.1".
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterVersion(String);

impl ClusterVersion {
    pub fn new(version: &str) -> Self {
        ClusterVersion(version.to_string())
    }

    pub fn major(&self) -> u32 {
        self.0
            .split('.')
            .next()
            .and_then(|major| major.parse().ok())
            .unwrap_or(0)
    }

    /// From major version 5 on, the cluster is driven through the cephadm
    /// shell and no longer serves the standalone quorum_status query.
    pub fn uses_cephadm(&self) -> bool {
        self.major() >= 5
    }
}

impl std::fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subnet classification of the cluster's traffic.
#[derive(Debug, Clone, Default)]
pub struct Networks {
    pub public: Vec<IpCidr>,
    pub cluster: Vec<IpCidr>,
}

impl Networks {
    fn parse(networks: &[String]) -> Result<Vec<IpCidr>, CephError> {
        networks
            .iter()
            .map(|network| {
                IpCidr::from_str(network)
                    .map_err(|e| CephError::Config(format!("bad network \"{network}\": {e}")))
            })
            .collect()
    }

    /// Comma-separated list of public networks.
    pub fn public_csv(&self) -> String {
        self.public
            .iter()
            .map(|cidr| cidr.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Comma-separated list of cluster networks.
    pub fn cluster_csv(&self) -> String {
        self.cluster
            .iter()
            .map(|cidr| cidr.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Cluster-wide configuration shared by every node and role-object
/// operation that needs build context. Written once at setup, read
/// everywhere; a Cluster cannot be constructed without it.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    pub container_image: Option<String>,
    pub repo_base_url: Option<String>,
    pub overrides: Vec<String>,
}

/// Cluster is the in-memory model of a running storage cluster: an ordered
/// list of nodes carrying role objects. Order matters: first-match lookups
/// by role depend on it.
#[derive(Debug)]
pub struct Cluster {
    pub name: String,
    nodes: Vec<Arc<Node>>,
    version: ClusterVersion,
    networks: Networks,
    config: ClusterConfig,
}

impl Cluster {
    pub fn new(
        name: &str,
        nodes: Vec<Arc<Node>>,
        version: ClusterVersion,
        networks: Networks,
        config: ClusterConfig,
    ) -> Self {
        Cluster {
            name: name.to_string(),
            nodes,
            version,
            networks,
            config,
        }
    }

    /// Build the in-memory model from a parsed inventory.
    pub fn from_config(config: &Config, connector: Arc<dyn Connector>) -> Result<Self, CephError> {
        let nodes = config
            .nodes
            .iter()
            .map(|spec| Node::from_spec(spec, Arc::clone(&connector)))
            .collect::<Result<Vec<_>, _>>()?;

        let networks = Networks {
            public: Networks::parse(&config.cluster.public_networks)?,
            cluster: Networks::parse(&config.cluster.cluster_networks)?,
        };

        Ok(Cluster::new(
            &config.cluster.name,
            nodes,
            ClusterVersion::new(&config.cluster.version),
            networks,
            ClusterConfig {
                container_image: config.cluster.container_image.clone(),
                repo_base_url: config.cluster.repo_base_url.clone(),
                overrides: config.cluster.overrides.clone(),
            },
        ))
    }

    pub fn version(&self) -> &ClusterVersion {
        &self.version
    }

    pub fn networks(&self) -> &Networks {
        &self.networks
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes carrying `role`; all nodes when no role is given.
    pub fn get_nodes(&self, role: Option<&str>) -> Vec<Arc<Node>> {
        self.nodes
            .iter()
            .filter(|node| match role {
                Some(role) => node.role().contains(role),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn get_node_by_hostname(&self, hostname: &str) -> Option<Arc<Node>> {
        self.nodes
            .iter()
            .find(|node| node.hostname == hostname)
            .cloned()
    }

    /// Role objects across the cluster, optionally narrowed to one role,
    /// in node order.
    pub fn get_role_objects(&self, role: Option<&str>) -> Vec<Arc<RoleObject>> {
        self.nodes
            .iter()
            .flat_map(|node| node.get_role_objects(role))
            .collect()
    }

    /// The first role object carrying `role`.
    pub fn get_role_object(&self, role: &str) -> Result<Arc<RoleObject>, CephError> {
        self.get_role_objects(Some(role))
            .into_iter()
            .next()
            .ok_or_else(|| CephError::NotFound(format!("{role} object")))
    }

    /// Active demons across the cluster.
    pub fn get_demons(&self, role: Option<&str>) -> Vec<Arc<RoleObject>> {
        self.nodes
            .iter()
            .flat_map(|node| node.get_demons(role))
            .collect()
    }

    /// Expected number of demons per role.
    pub fn demon_stat(&self) -> HashMap<String, usize> {
        let mut stat = HashMap::new();
        for demon in self.get_demons(None) {
            *stat.entry(demon.role().to_string()).or_insert(0) += 1;
        }
        stat
    }

    /// The object used for administrative queries: a client if the cluster
    /// has one, the first monitor otherwise.
    pub fn admin_client(&self) -> Result<Arc<RoleObject>, CephError> {
        self.get_role_object("client")
            .or_else(|_| self.get_role_object("mon"))
    }

    /// Issue the same command on every node concurrently. All nodes run to
    /// completion (or error) before this returns; no cross-node ordering is
    /// guaranteed.
    pub async fn exec_on_all(
        &self,
        command: &str,
        opts: &ExecOpts,
    ) -> Vec<Result<CommandOutput, CephError>> {
        let futures: Vec<_> = self
            .nodes
            .iter()
            .map(|node| node.exec_command(command, opts))
            .collect();

        future::join_all(futures).await
    }

    /// Wrap an administrative command for this cluster's era.
    pub fn admin_command(&self, command: &str) -> String {
        if self.version.uses_cephadm() {
            format!("cephadm shell -- {command}")
        } else {
            command.to_string()
        }
    }

    /// Check that every object-storage demon is simultaneously up and in
    /// service.
    pub async fn osd_check(&self, client: &RoleObject) -> Result<bool, CephError> {
        let cmd = self.admin_command("ceph -s -f json");
        let output = client.exec_command(&cmd, &ExecOpts::as_root()).await?;
        let status: Value = serde_json::from_str(&output.stdout)
            .map_err(|e| CephError::MalformedStatus(format!("ceph -s -f json: {e}")))?;

        let (total, up, in_service) = osd_counts(&status).ok_or_else(|| {
            CephError::MalformedStatus("status report carries no osdmap counts".to_string())
        })?;

        if total != up {
            error!("not all osds are up. Actual: {up} / Expected: {total}");
            return Ok(false);
        }
        if total != in_service {
            error!("not all osds are in. Actual: {in_service} / Expected: {total}");
            return Ok(false);
        }

        info!("all osds are up and in");
        Ok(true)
    }

    /// Check if the cluster is in a healthy state.
    ///
    /// Polls the status text until pending placement-group states clear and
    /// the valid state shows up, bounded by `timeout`. After the loop the
    /// cluster is healthy only if the valid state is present, every OSD is
    /// up and in, the monitor quorum is complete (on releases that still
    /// serve the quorum query), and no hard error is flagged anywhere in
    /// the status text.
    pub async fn check_health(
        &self,
        client: &RoleObject,
        timeout: Duration,
    ) -> Result<bool, CephError> {
        let deadline = Instant::now() + timeout;
        let cmd = self.admin_command("ceph -s");

        let mut status_text;
        loop {
            status_text = client
                .exec_command(&cmd, &ExecOpts::as_root())
                .await?
                .stdout;

            if !PENDING_STATES.iter().any(|state| status_text.contains(state))
                && VALID_STATES.iter().all(|state| status_text.contains(state))
            {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(HEALTH_POLL_INTERVAL).await;
        }
        info!("{status_text}");

        if !VALID_STATES.iter().all(|state| status_text.contains(state)) {
            error!("valid states are not found in the health check");
            return Ok(false);
        }

        if !self.osd_check(client).await? {
            return Ok(false);
        }

        if !self.version.uses_cephadm() {
            let output = client
                .exec_command("ceph quorum_status -f json", &ExecOpts::as_root())
                .await?;
            let report: Value = serde_json::from_str(&output.stdout)
                .map_err(|e| CephError::MalformedStatus(format!("quorum_status: {e}")))?;
            let quorum = report
                .get("quorum")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            let expected = self.demon_stat().get("mon").copied().unwrap_or(0);

            info!("expected mons: {expected}, mons in quorum: {quorum}");
            if quorum != expected {
                error!("not all monitors are in the cluster quorum");
                return Ok(false);
            }
        }

        if status_text.contains("HEALTH_ERR") {
            error!("health is in the error state");
            return Ok(false);
        }

        Ok(true)
    }
}

/// Pull the OSD counters out of a status report. The osdmap moved between
/// releases, so both nestings are accepted.
fn osd_counts(status: &Value) -> Option<(u64, u64, u64)> {
    let osdmap = status.get("osdmap")?;
    let osdmap = osdmap.get("osdmap").unwrap_or(osdmap);
    Some((
        osdmap.get("num_osds")?.as_u64()?,
        osdmap.get("num_up_osds")?.as_u64()?,
        osdmap.get("num_in_osds")?.as_u64()?,
    ))
}
