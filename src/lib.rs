// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod cluster;
pub mod commands;
pub mod config;
pub mod conn;
pub mod error;
pub mod exec;
pub mod node;
pub mod role;
pub mod ssh;
pub mod test_env;
pub mod upgrade;

/// Gets the path of the cluster inventory file.
pub fn default_config_path() -> String {
    match std::env::var("CEPHUP_CONFIG") {
        Ok(conf) => conf,
        Err(_) => "/etc/cephup/cephup.conf".to_string(),
    }
}

/// Gets the SSH port used to reach cluster nodes.
pub fn remote_port() -> u16 {
    match std::env::var("CEPHUP_SSH_PORT") {
        Ok(port) => port
            .parse::<u16>()
            .expect("CEPHUP_SSH_PORT must be a valid port number"),
        Err(_) => 22,
    }
}
