// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Orchestration of a cluster-wide upgrade.
//!
//! The workflow walks the cluster through repository setup, tool install,
//! a version-skew preflight, the upgrade trigger, and completion polling,
//! with optional health verification at the end. Whatever happens, a fixed
//! set of diagnostic command outputs is collected on the way out.

use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use crate::cluster::Cluster;
use crate::config::UpgradeSpec;
use crate::error::CephError;
use crate::exec::{ExecOpts, TimeoutSpec};
use crate::node::{Node, PkgType};
use crate::role::RoleObject;

/// Diagnostic command outputs collected unconditionally when the workflow
/// exits, for post-mortem analysis.
pub const CLUSTER_STATE_COMMANDS: [&str; 7] = [
    "ceph status",
    "ceph versions",
    "ceph orch ps -f yaml",
    "ceph orch ls -f yaml",
    "ceph orch upgrade status",
    "ceph mgr dump",
    "ceph mon stat",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpgradePhase {
    Init,
    RepoConfigured,
    Installed,
    PreflightChecked,
    UpgradeTriggered,
    Monitoring,
    HealthVerified,
    Done,
    Failed,
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Init => "init",
                Self::RepoConfigured => "repo-configured",
                Self::Installed => "installed",
                Self::PreflightChecked => "preflight-checked",
                Self::UpgradeTriggered => "upgrade-triggered",
                Self::Monitoring => "monitoring",
                Self::HealthVerified => "health-verified",
                Self::Done => "done",
                Self::Failed => "failed",
            }
        )
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Target image override; the "latest" tag when unset.
    pub image: Option<String>,
    pub benchmark: bool,
    pub verify_cluster_health: bool,
    pub poll_interval: Duration,
    pub monitor_timeout: Duration,
    pub health_timeout: Duration,
}

impl From<&UpgradeSpec> for UpgradeConfig {
    fn from(spec: &UpgradeSpec) -> Self {
        UpgradeConfig {
            image: spec.image.clone(),
            benchmark: spec.benchmark,
            verify_cluster_health: spec.verify_cluster_health,
            poll_interval: Duration::from_secs(spec.poll_interval_secs),
            monitor_timeout: Duration::from_secs(spec.monitor_timeout_secs),
            health_timeout: Duration::from_secs(spec.health_timeout_secs),
        }
    }
}

/// The upgrade orchestrator.
pub struct Orch {
    cluster: Arc<Cluster>,
    config: UpgradeConfig,
    phase: Mutex<UpgradePhase>,
}

impl Orch {
    pub fn new(cluster: Arc<Cluster>, config: UpgradeConfig) -> Self {
        Orch {
            cluster,
            config,
            phase: Mutex::new(UpgradePhase::Init),
        }
    }

    pub fn phase(&self) -> UpgradePhase {
        *self.phase.lock().unwrap()
    }

    fn advance(&self, phase: UpgradePhase) {
        *self.phase.lock().unwrap() = phase;
        info!("upgrade phase: {phase}");
    }

    fn installer(&self) -> Result<Arc<RoleObject>, CephError> {
        self.cluster.get_role_object("installer")
    }

    /// Run an administrative command through the cephadm shell on the
    /// installer node.
    async fn shell(&self, command: &str) -> Result<crate::exec::CommandOutput, CephError> {
        let installer = self.installer()?;
        installer
            .exec_command(&format!("cephadm shell -- {command}"), &ExecOpts::as_root())
            .await
    }

    fn resolve_image(&self) -> String {
        match &self.config.image {
            Some(image) => image.clone(),
            None => match &self.cluster.config().container_image {
                Some(image) => image.clone(),
                None => "latest".to_string(),
            },
        }
    }

    /// Point every node's package source at the target build, all nodes at
    /// once.
    pub async fn set_tool_repo(&self) -> Result<(), CephError> {
        let base_url = match &self.cluster.config().repo_base_url {
            Some(url) => url.clone(),
            None => {
                warn!("no repo_base_url configured; leaving package sources alone");
                return Ok(());
            }
        };

        let futures: Vec<_> = self
            .cluster
            .nodes()
            .map(|node| set_node_repo(Arc::clone(node), base_url.clone()))
            .collect();

        for result in futures::future::join_all(futures).await {
            result?;
        }
        Ok(())
    }

    /// Install (or upgrade) the orchestration tool itself on the installer
    /// node.
    pub async fn install(&self) -> Result<(), CephError> {
        let installer = self.installer()?;
        let node = installer.node()?;
        let cmd = match node.pkg_type {
            PkgType::Rpm => "sudo yum install -y cephadm",
            PkgType::Deb => "sudo apt-get install -y cephadm",
        };
        installer.exec_command(cmd, &ExecOpts::default()).await?;

        let version = installer
            .exec_command("sudo cephadm version", &ExecOpts::default())
            .await?;
        debug!("cephadm version: {}", version.stdout.trim());
        Ok(())
    }

    /// Compare running component versions against the target image. Skew
    /// here is context for later analysis, never a failure.
    pub async fn upgrade_check(&self) -> Result<(), CephError> {
        let image = self.resolve_image();
        let output = self
            .shell(&format!("ceph orch upgrade check --image {image}"))
            .await?;
        info!("upgrade check against {image}: {}", output.stdout);
        Ok(())
    }

    /// A known-bad 16.2.7 intermediate build can leave a wedged in-flight
    /// upgrade behind; stop it explicitly before starting a new one.
    pub async fn stop_stale_upgrade(&self) -> Result<(), CephError> {
        if self.cluster.version().major() != 5 {
            return Ok(());
        }

        let installer = self.installer()?;
        let packages = installer
            .exec_command(
                "rpm -qa | grep ceph-common",
                &ExecOpts {
                    sudo: true,
                    check_ec: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        if packages.stdout.contains("16.2.7") {
            let output = installer
                .exec_command("cephadm -v shell -- ceph orch upgrade stop", &ExecOpts::as_root())
                .await?;
            info!("{}", output.stdout);
        }
        Ok(())
    }

    /// Kick off the cluster-wide upgrade to the resolved image.
    pub async fn start_upgrade(&self) -> Result<(), CephError> {
        let image = self.resolve_image();
        self.shell(&format!("ceph orch upgrade start --image {image}"))
            .await?;
        Ok(())
    }

    /// Poll the upgrade status until the orchestration reports completion.
    pub async fn monitor_upgrade_status(&self) -> Result<(), CephError> {
        let deadline = Instant::now() + self.config.monitor_timeout;
        loop {
            let output = self.shell("ceph orch upgrade status").await?;
            if upgrade_complete(&output.stdout) {
                info!("upgrade reported complete");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CephError::Timeout {
                    command: "ceph orch upgrade status".to_string(),
                });
            }
            debug!("upgrade still in progress");
            sleep(self.config.poll_interval).await;
        }
    }

    /// Capture the fixed diagnostics list. Failures are logged, never
    /// propagated; this runs after the workflow has already succeeded or
    /// failed.
    pub async fn get_cluster_state(&self) {
        for command in CLUSTER_STATE_COMMANDS {
            match self.shell(command).await {
                Ok(output) => info!("{command}:\n{}", output.stdout),
                Err(e) => error!("could not capture `{command}`: {e}"),
            }
        }
    }

    async fn execute(&self, bench: &mut Option<RadosBench>) -> Result<(), CephError> {
        if self.config.benchmark {
            *bench = Some(RadosBench::start(Arc::clone(&self.cluster)).await?);
        }

        self.set_tool_repo().await?;
        self.advance(UpgradePhase::RepoConfigured);

        self.install().await?;
        self.advance(UpgradePhase::Installed);

        self.upgrade_check().await?;
        self.advance(UpgradePhase::PreflightChecked);

        self.stop_stale_upgrade().await?;

        self.start_upgrade().await?;
        self.advance(UpgradePhase::UpgradeTriggered);

        self.advance(UpgradePhase::Monitoring);
        self.monitor_upgrade_status().await?;

        if self.config.verify_cluster_health {
            let client = self.installer()?;
            if !self
                .cluster
                .check_health(&client, self.config.health_timeout)
                .await?
            {
                return Err(CephError::UpgradeFailed(
                    "cluster is in HEALTH_ERR state".to_string(),
                ));
            }
            self.advance(UpgradePhase::HealthVerified);
        }

        self.advance(UpgradePhase::Done);
        Ok(())
    }

    /// Drive the whole workflow. Every failure is caught here, logged with
    /// its context, and turned into a status code; cleanup and diagnostics
    /// collection run no matter what.
    pub async fn run(&self) -> i32 {
        info!("upgrading cluster {}...", self.cluster.name);

        let mut bench = None;
        let result = self.execute(&mut bench).await;

        if let Some(bench) = bench {
            bench.teardown().await;
        }
        self.get_cluster_state().await;

        match result {
            Ok(()) => 0,
            Err(e) => {
                self.advance(UpgradePhase::Failed);
                error!("upgrade workflow failed: {e:?}");
                1
            }
        }
    }
}

/// Rewrite one node's package source for the target build.
async fn set_node_repo(node: Arc<Node>, base_url: String) -> Result<(), CephError> {
    let cmd = match node.pkg_type {
        PkgType::Rpm => {
            format!("sudo curl -o /etc/yum.repos.d/ceph-tools.repo {base_url}")
        }
        PkgType::Deb => format!(
            "sudo curl -o /etc/apt/sources.list.d/ceph-tools.list {base_url} && sudo apt-get update"
        ),
    };
    node.exec_command(&cmd, &ExecOpts::default()).await?;
    Ok(())
}

/// Whether an upgrade status report says the orchestration is finished.
fn upgrade_complete(report: &str) -> bool {
    if report.contains("No upgrade in progress") {
        return true;
    }
    match serde_json::from_str::<Value>(report) {
        Ok(value) => value
            .get("in_progress")
            .and_then(Value::as_bool)
            .map(|in_progress| !in_progress)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Client write workload run alongside the upgrade to keep data moving
/// while demons restart.
pub struct RadosBench {
    cluster: Arc<Cluster>,
    tasks: Vec<JoinHandle<()>>,
}

impl RadosBench {
    pub const POOL: &'static str = "rbench";

    /// Create the bench pool and start a writer on every client node.
    pub async fn start(cluster: Arc<Cluster>) -> Result<Self, CephError> {
        let clients = cluster.get_nodes(Some("client"));
        if clients.is_empty() {
            return Err(CephError::NotFound("client node".to_string()));
        }

        clients[0]
            .exec_command(
                &cluster.admin_command(&format!("ceph osd pool create {} 64 64", Self::POOL)),
                &ExecOpts::as_root(),
            )
            .await?;

        let tasks = clients
            .into_iter()
            .map(|client| {
                let pool = Self::POOL;
                let cmd =
                    format!("sudo rados --no-log-to-stderr -b 4096 -p {pool} bench 3600 write");
                tokio::spawn(async move {
                    let opts = ExecOpts {
                        sudo: true,
                        long_running: true,
                        check_ec: Some(false),
                        timeout: TimeoutSpec::None,
                        ..Default::default()
                    };
                    if let Err(e) = client.exec_command(&cmd, &opts).await {
                        warn!("rados bench writer on {} exited: {e}", client.hostname);
                    }
                })
            })
            .collect();

        Ok(RadosBench { cluster, tasks })
    }

    /// Stop the writers and drop the bench pool. Failures only get logged;
    /// teardown runs on the error path too.
    pub async fn teardown(self) {
        for task in &self.tasks {
            task.abort();
        }

        let clients = self.cluster.get_nodes(Some("client"));
        if let Some(client) = clients.first() {
            let cmd = self.cluster.admin_command(&format!(
                "ceph osd pool delete {pool} {pool} --yes-i-really-really-mean-it",
                pool = Self::POOL
            ));
            if let Err(e) = client.exec_command(&cmd, &ExecOpts::as_root()).await {
                warn!("could not remove the bench pool: {e}");
            }
        }
    }
}
