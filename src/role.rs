// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! What runs on a node.
//!
//! Every role object presents the same surface: execute a command, move
//! file contents, proxy to the owning node. A closed set of kinds covers
//! the behavioral differences: demons may run containerized and wrap
//! their commands in a container-exec prefix, OSDs are bound to a device,
//! and the installer edits orchestration config on its node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::CephError;
use crate::exec::{CommandOutput, ExecOpts};
use crate::node::Node;

/// Roles that run as long-lived service processes.
pub const DEMON_ROLES: [&str; 7] = ["mon", "osd", "mgr", "rgw", "mds", "nfs", "grafana"];

/// Where the installer keeps orchestration configuration.
pub const ANSIBLE_DIR: &str = "/usr/share/ceph-ansible";

/// Synthesize the prefix that reroutes a command into a role's container.
/// OS major version 8 ships podman; older hosts run docker.
pub fn container_exec_prefix(os_version: &str, containerized: bool, container_name: &str) -> String {
    if !containerized {
        return String::new();
    }
    let runtime = if os_version.starts_with('8') {
        "podman"
    } else {
        "docker"
    };
    format!("sudo {runtime} exec {container_name}")
}

#[derive(Debug)]
pub struct DemonState {
    containerized: AtomicBool,
    custom_container_name: Mutex<Option<String>>,
    active: AtomicBool,
}

impl DemonState {
    fn new() -> Self {
        DemonState {
            containerized: AtomicBool::new(false),
            custom_container_name: Mutex::new(None),
            active: AtomicBool::new(true),
        }
    }
}

#[derive(Debug)]
pub struct OsdState {
    containerized: AtomicBool,
    device: Mutex<Option<String>>,
}

impl OsdState {
    fn new(device: Option<String>) -> Self {
        OsdState {
            containerized: AtomicBool::new(false),
            device: Mutex::new(device),
        }
    }
}

#[derive(Debug)]
pub enum RoleKind {
    Generic,
    Client,
    Installer,
    Demon(DemonState),
    Osd(OsdState),
}

/// A single duty on a single node. The node owns the object; the object
/// only holds a back-reference.
#[derive(Debug)]
pub struct RoleObject {
    role: String,
    node: Weak<Node>,
    kind: RoleKind,
}

/// Create the right kind of role object for `role` on `node`.
///
/// An OSD consumes the node's first free volume and is bound to its device;
/// a node without a free volume cannot take another OSD, and that is an
/// inventory error rather than a retryable condition.
pub fn create_role_object(node: &Arc<Node>, role: &str) -> Result<Arc<RoleObject>, CephError> {
    let kind = match role {
        "pool" => {
            return Err(CephError::Config(
                "the pool sentinel does not own a role object".to_string(),
            ))
        }
        "installer" => RoleKind::Installer,
        "client" => RoleKind::Client,
        "osd" => {
            let device = node.allocate_volume()?;
            RoleKind::Osd(OsdState::new(device))
        }
        demon if DEMON_ROLES.contains(&demon) => RoleKind::Demon(DemonState::new()),
        _ => RoleKind::Generic,
    };

    Ok(Arc::new(RoleObject {
        role: role.to_string(),
        node: Arc::downgrade(node),
        kind,
    }))
}

impl RoleObject {
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn kind(&self) -> &RoleKind {
        &self.kind
    }

    /// The node this object runs on.
    pub fn node(&self) -> Result<Arc<Node>, CephError> {
        self.node
            .upgrade()
            .ok_or_else(|| CephError::NotFound(format!("owning node for {} object", self.role)))
    }

    pub fn is_demon(&self) -> bool {
        matches!(self.kind, RoleKind::Demon(_) | RoleKind::Osd(_))
    }

    pub fn is_osd(&self) -> bool {
        matches!(self.kind, RoleKind::Osd(_))
    }

    /// Whether this object is part of the cluster. For an OSD this is
    /// derived: active exactly while a device is assigned.
    pub fn is_active(&self) -> bool {
        match &self.kind {
            RoleKind::Demon(demon) => demon.active.load(Ordering::Relaxed),
            RoleKind::Osd(osd) => osd.device.lock().unwrap().is_some(),
            _ => false,
        }
    }

    /// Flip a demon in or out of the cluster. An OSD's activity follows its
    /// device assignment, so this does nothing there.
    pub fn set_active(&self, active: bool) {
        if let RoleKind::Demon(demon) = &self.kind {
            demon.active.store(active, Ordering::Relaxed);
        }
    }

    pub fn containerized(&self) -> bool {
        match &self.kind {
            RoleKind::Demon(demon) => demon.containerized.load(Ordering::Relaxed),
            RoleKind::Osd(osd) => osd.containerized.load(Ordering::Relaxed),
            _ => false,
        }
    }

    pub fn set_containerized(&self, containerized: bool) {
        match &self.kind {
            RoleKind::Demon(demon) => demon.containerized.store(containerized, Ordering::Relaxed),
            RoleKind::Osd(osd) => osd.containerized.store(containerized, Ordering::Relaxed),
            _ => {}
        }
    }

    /// Override the derived container name. Only meaningful for demons.
    pub fn set_container_name(&self, name: &str) {
        if let RoleKind::Demon(demon) = &self.kind {
            *demon.custom_container_name.lock().unwrap() = Some(name.to_string());
        }
    }

    /// The name of the container this role runs in, when containerized.
    pub fn container_name(&self) -> Option<String> {
        if !self.containerized() {
            return None;
        }
        let node = self.node.upgrade()?;
        match &self.kind {
            RoleKind::Demon(demon) => Some(
                demon
                    .custom_container_name
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| format!("ceph-{}-{}", self.role, node.shortname)),
            ),
            RoleKind::Osd(osd) => {
                let device = osd.device.lock().unwrap().clone().unwrap_or_default();
                Some(format!("ceph-osd-{}-{}", node.hostname, device))
            }
            _ => None,
        }
    }

    /// The device backing an OSD.
    pub fn device(&self) -> Option<String> {
        match &self.kind {
            RoleKind::Osd(osd) => osd.device.lock().unwrap().clone(),
            _ => None,
        }
    }

    /// Bind an OSD to a device, activating it.
    pub fn set_device(&self, device: &str) {
        if let RoleKind::Osd(osd) = &self.kind {
            *osd.device.lock().unwrap() = Some(device.to_string());
        }
    }

    /// Execute a command in this role's context. A containerized demon has
    /// any literal privilege-escalation prefix stripped and the container
    /// exec prefix prepended; everything else goes straight to the node.
    pub async fn exec_command(
        &self,
        command: &str,
        opts: &ExecOpts,
    ) -> Result<CommandOutput, CephError> {
        let node = self.node()?;

        if self.is_demon() && self.containerized() {
            let os_version = node.os_version().await?;
            let name = self.container_name().unwrap_or_default();
            let prefix = container_exec_prefix(&os_version, true, &name);
            let stripped = command.replace("sudo", "");
            let wrapped = format!("{prefix} {}", stripped.trim());
            return node.exec_command(&wrapped, opts).await;
        }

        node.exec_command(command, opts).await
    }

    /// Append to a remote file on the owning node.
    pub async fn file_append(&self, path: &str, content: &str, sudo: bool) -> Result<(), CephError> {
        self.node()?.file_append(path, content, sudo).await
    }

    /// Read a remote file from the owning node.
    pub async fn file_read(&self, path: &str, sudo: bool) -> Result<String, CephError> {
        self.node()?.file_read(path, sudo).await
    }

    /// Installer helper: append a configuration overlay under the fixed
    /// orchestration config directory.
    pub async fn append_conf(&self, file_name: &str, content: &str) -> Result<(), CephError> {
        self.require_installer()?;
        let path = format!("{ANSIBLE_DIR}/group_vars/{file_name}");
        self.file_append(&path, content, true).await?;
        self.node()?
            .exec_command(&format!("chmod 644 {path}"), &ExecOpts::as_root())
            .await?;
        Ok(())
    }

    /// Installer helper: replace a configuration overlay wholesale.
    pub async fn write_conf(&self, file_name: &str, content: &str) -> Result<(), CephError> {
        self.require_installer()?;
        let path = format!("{ANSIBLE_DIR}/group_vars/{file_name}");
        self.node()?.file_write(&path, content, true).await?;
        self.node()?
            .exec_command(&format!("chmod 644 {path}"), &ExecOpts::as_root())
            .await?;
        Ok(())
    }

    /// Installer helper: read back a configuration overlay.
    pub async fn read_conf(&self, file_name: &str) -> Result<String, CephError> {
        self.require_installer()?;
        self.file_read(&format!("{ANSIBLE_DIR}/group_vars/{file_name}"), true)
            .await
    }

    /// Installer helper: what ceph packages the node has installed.
    pub async fn installed_ceph_versions(&self) -> Result<String, CephError> {
        self.require_installer()?;
        let node = self.node()?;
        let output = match node.pkg_type {
            crate::node::PkgType::Rpm => {
                node.exec_command("rpm -qa | grep ceph", &ExecOpts::default())
                    .await?
            }
            crate::node::PkgType::Deb => {
                node.exec_command("apt-cache search ceph", &ExecOpts::as_root())
                    .await?
            }
        };
        Ok(output.stdout)
    }

    fn require_installer(&self) -> Result<(), CephError> {
        match self.kind {
            RoleKind::Installer => Ok(()),
            _ => Err(CephError::Config(format!(
                "{} object cannot edit orchestration config",
                self.role
            ))),
        }
    }
}
