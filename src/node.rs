// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! A cluster member: identity, credentials, its volume pool, the role
//! objects running on it, and the pair of connections used to reach it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::NodeSpec;
use crate::conn::{ConnectionManager, Connector, Credentials};
use crate::error::CephError;
use crate::exec::{self, CommandOutput, ExecOpts};
use crate::role::{self, RoleObject};

/// Which package manager family a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PkgType {
    Rpm,
    Deb,
}

/// A storage volume on a node. One volume backs exactly one OSD while
/// allocated.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeVolume {
    pub status: VolumeStatus,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolumeStatus {
    Free,
    Allocated,
}

/// Container for single or multiple node roles.
///
/// A node with no active duty carries the sentinel role "pool". Queries
/// against a single role answer "is this role present"; queries against a
/// collection answer "does this node carry every one of these roles".
#[derive(Debug, Clone, PartialEq)]
pub struct RolesContainer {
    roles: Vec<String>,
}

impl RolesContainer {
    pub const POOL: &'static str = "pool";

    pub fn new() -> Self {
        RolesContainer {
            roles: vec![Self::POOL.to_string()],
        }
    }

    /// Build from a role list, deduplicating while preserving order. An
    /// empty list collapses to the pool sentinel.
    pub fn from_roles<I: IntoIterator<Item = String>>(roles: I) -> Self {
        let mut container = RolesContainer { roles: Vec::new() };
        for role in roles {
            container.add(&role);
        }
        if container.roles.is_empty() {
            container.roles.push(Self::POOL.to_string());
        }
        container
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// True when this node's role set is a superset of `roles`.
    pub fn contains_all<'a, I: IntoIterator<Item = &'a str>>(&self, roles: I) -> bool {
        roles.into_iter().all(|role| self.contains(role))
    }

    pub fn add(&mut self, role: &str) {
        if !self.contains(role) {
            self.roles.push(role.to_string());
        }
    }

    pub fn remove(&mut self, role: &str) {
        self.roles.retain(|r| r != role);
    }

    /// Take up duties: drop the pool sentinel and add the given roles.
    pub fn update_roles(&mut self, roles: &[String]) {
        self.remove(Self::POOL);
        for role in roles {
            self.add(role);
        }
    }

    /// Back to no active duty.
    pub fn clear(&mut self) {
        self.roles = vec![Self::POOL.to_string()];
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl Default for RolesContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RolesContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.roles.join(","))
    }
}

/// A server in the cluster.
#[derive(Debug)]
pub struct Node {
    pub hostname: String,
    pub shortname: String,
    pub ip_address: String,
    pub internal_ip: Option<String>,
    pub pkg_type: PkgType,

    root_conn: ConnectionManager,
    conn: ConnectionManager,

    /// Allocation is a critical section: concurrent role-object creation
    /// races over the first free volume otherwise.
    volumes: Mutex<Vec<NodeVolume>>,
    objects: Mutex<Vec<Arc<RoleObject>>>,

    os_version: OnceLock<String>,
    run_once: AtomicBool,
}

impl Node {
    /// Build a Node from its inventory entry, then bring up the role
    /// objects it is configured to carry. When the node has the osd role,
    /// every remaining free volume gets an OSD of its own.
    pub fn from_spec(
        spec: &NodeSpec,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>, CephError> {
        let shortname = match spec.hostname.split('.').next() {
            Some(short) => short.to_string(),
            None => spec.hostname.clone(),
        };

        let volumes = if !spec.devices.is_empty() {
            spec.devices
                .iter()
                .map(|device| NodeVolume {
                    status: VolumeStatus::Free,
                    path: Some(device.clone()),
                })
                .collect()
        } else {
            (0..spec.no_of_volumes)
                .map(|_| NodeVolume {
                    status: VolumeStatus::Free,
                    path: None,
                })
                .collect()
        };

        let root_creds = Credentials {
            host: spec.ip_address.clone(),
            username: "root".to_string(),
            password: spec.root_password.clone(),
            private_key_path: spec.private_key_path.clone(),
        };
        let user_creds = Credentials {
            host: spec.ip_address.clone(),
            username: spec.username.clone(),
            password: spec.password.clone(),
            private_key_path: spec.private_key_path.clone(),
        };

        let node = Arc::new(Node {
            hostname: spec.hostname.clone(),
            shortname,
            ip_address: spec.ip_address.clone(),
            internal_ip: spec.internal_ip.clone(),
            pkg_type: spec.pkg_type,
            root_conn: ConnectionManager::new(root_creds, Arc::clone(&connector)),
            conn: ConnectionManager::new(user_creds, connector),
            volumes: Mutex::new(volumes),
            objects: Mutex::new(Vec::new()),
            os_version: OnceLock::new(),
            run_once: AtomicBool::new(false),
        });

        if let Some(version) = &spec.os_version {
            let _ = node.os_version.set(version.clone());
        }

        for role in spec.roles.iter().filter(|role| *role != RolesContainer::POOL) {
            node.create_role_object(role)?;
        }
        while !node.get_role_objects(Some("osd")).is_empty() && node.free_volumes() > 0 {
            node.create_role_object("osd")?;
        }

        Ok(node)
    }

    /// Execute the given command on this node.
    ///
    /// A logical timeout is translated into an execution failure carrying
    /// the timeout as its cause; transport faults other than a socket
    /// timeout are wrapped the same way. When exit checking applies, a
    /// non-zero status fails with the command, stderr, exit code, and host.
    pub async fn exec_command(
        &self,
        command: &str,
        opts: &ExecOpts,
    ) -> Result<CommandOutput, CephError> {
        if self.run_once.load(Ordering::Relaxed) {
            self.root_conn.keepalive().await;
            self.conn.keepalive().await;
        }

        let conn = if opts.sudo { &self.root_conn } else { &self.conn };
        let output = match exec::run(conn, command, opts).await {
            Ok(output) => output,
            Err(err @ CephError::Timeout { .. }) | Err(err @ CephError::Transport(_)) => {
                return Err(CephError::ExecutionFailed {
                    command: command.to_string(),
                    host: self.ip_address.clone(),
                    source: Box::new(err),
                })
            }
            Err(other) => return Err(other),
        };
        self.run_once.store(true, Ordering::Relaxed);

        if opts.pretty_print {
            let mut msg = format!("\nCommand:    {command}");
            msg += &format!("\nDuration:   {} seconds", output.duration);
            msg += &format!("\nExit Code:  {}", output.exit_status);
            if !output.stdout.is_empty() {
                msg += &format!("\nStdout:     {}", output.stdout);
            }
            if !output.stderr.is_empty() {
                msg += &format!("\nStderr:     {}", output.stderr);
            }
            info!("{msg}");
        }

        if opts.check_exit() && output.exit_status != 0 {
            return Err(CephError::CommandFailed {
                command: command.to_string(),
                stderr: output.stderr.clone(),
                exit_status: output.exit_status,
                host: self.ip_address.clone(),
            });
        }

        Ok(output)
    }

    /// Append `content` to a remote file through the execution contract.
    pub async fn file_append(
        &self,
        path: &str,
        content: &str,
        sudo: bool,
    ) -> Result<(), CephError> {
        let opts = ExecOpts {
            sudo,
            ..Default::default()
        };
        let cmd = format!("printf '%s' {} | tee -a {path}", sh_quote(content));
        self.exec_command(&cmd, &opts).await?;
        Ok(())
    }

    /// Replace a remote file's contents through the execution contract.
    pub async fn file_write(
        &self,
        path: &str,
        content: &str,
        sudo: bool,
    ) -> Result<(), CephError> {
        let opts = ExecOpts {
            sudo,
            ..Default::default()
        };
        let cmd = format!("printf '%s' {} | tee {path}", sh_quote(content));
        self.exec_command(&cmd, &opts).await?;
        Ok(())
    }

    /// Return the contents of a remote file.
    pub async fn file_read(&self, path: &str, sudo: bool) -> Result<String, CephError> {
        let opts = if sudo {
            ExecOpts::as_root()
        } else {
            ExecOpts::default()
        };
        let output = self.exec_command(&format!("cat {path}"), &opts).await?;
        Ok(output.stdout)
    }

    /// The OS version id, queried from the node once and cached.
    pub async fn os_version(&self) -> Result<String, CephError> {
        if let Some(version) = self.os_version.get() {
            return Ok(version.clone());
        }

        let output = self
            .exec_command("cat /etc/os-release", &ExecOpts::default())
            .await?;
        let version = output
            .stdout
            .lines()
            .find_map(|line| line.strip_prefix("VERSION_ID="))
            .map(|value| value.trim_matches('"').to_string())
            .ok_or_else(|| {
                CephError::MalformedStatus(format!("no VERSION_ID in os-release on {}", self.hostname))
            })?;
        let _ = self.os_version.set(version.clone());
        Ok(version)
    }

    /// Mark the first free volume allocated and hand back its device path.
    pub fn allocate_volume(&self) -> Result<Option<String>, CephError> {
        let mut volumes = self.volumes.lock().unwrap();
        match volumes
            .iter_mut()
            .find(|volume| volume.status == VolumeStatus::Free)
        {
            Some(volume) => {
                volume.status = VolumeStatus::Allocated;
                Ok(volume.path.clone())
            }
            None => Err(CephError::NoFreeVolume {
                host: self.hostname.clone(),
            }),
        }
    }

    /// Release a volume, preferring the one backing `device`.
    pub fn free_volume(&self, device: Option<&str>) {
        let mut volumes = self.volumes.lock().unwrap();
        let position = volumes
            .iter()
            .position(|volume| {
                volume.status == VolumeStatus::Allocated && volume.path.as_deref() == device
            })
            .or_else(|| {
                volumes
                    .iter()
                    .position(|volume| volume.status == VolumeStatus::Allocated)
            });
        if let Some(position) = position {
            volumes[position].status = VolumeStatus::Free;
        }
    }

    pub fn free_volumes(&self) -> usize {
        self.volumes
            .lock()
            .unwrap()
            .iter()
            .filter(|volume| volume.status == VolumeStatus::Free)
            .count()
    }

    pub fn allocated_volumes(&self) -> usize {
        self.volumes
            .lock()
            .unwrap()
            .iter()
            .filter(|volume| volume.status == VolumeStatus::Allocated)
            .count()
    }

    /// Create a role object on this node and take ownership of it.
    pub fn create_role_object(
        self: &Arc<Self>,
        role: &str,
    ) -> Result<Arc<RoleObject>, CephError> {
        let object = role::create_role_object(self, role)?;
        self.objects.lock().unwrap().push(Arc::clone(&object));
        Ok(object)
    }

    /// Remove a role object from this node. An OSD hands its volume back to
    /// the pool.
    pub fn remove_role_object(&self, object: &Arc<RoleObject>) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(position) = objects.iter().position(|o| Arc::ptr_eq(o, object)) {
            objects.remove(position);
        }
        drop(objects);

        if object.is_osd() {
            self.free_volume(object.device().as_deref());
        }
    }

    /// Role objects on this node, optionally narrowed to one role.
    pub fn get_role_objects(&self, role: Option<&str>) -> Vec<Arc<RoleObject>> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|object| role.is_none() || role == Some(object.role()))
            .cloned()
            .collect()
    }

    /// Demons on this node that are part of the cluster (active).
    pub fn get_demons(&self, role: Option<&str>) -> Vec<Arc<RoleObject>> {
        self.get_role_objects(role)
            .into_iter()
            .filter(|object| object.is_demon() && object.is_active())
            .collect()
    }

    /// The set of roles this node carries.
    pub fn role(&self) -> RolesContainer {
        RolesContainer::from_roles(
            self.objects
                .lock()
                .unwrap()
                .iter()
                .map(|object| object.role().to_string()),
        )
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.hostname, self.ip_address)
    }
}

/// Wrap a string in single quotes for the remote shell.
fn sh_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
