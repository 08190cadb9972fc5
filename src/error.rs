// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The closed set of failures the automation layer can report.
//!
//! Low-level transport and command errors propagate unchanged until the
//! upgrade orchestrator boundary, where they are logged and converted into a
//! process-level failure code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CephError {
    /// The connect retry loop exhausted its outage window without a live
    /// session. Aborts the calling operation; never retried further up.
    #[error("unable to establish a connection with {host}")]
    ConnectionUnestablished { host: String },

    /// A transport-level read or write exceeded its deadline. Distinct from
    /// the logical command timeout below.
    #[error("socket timeout while talking to {host}: {source}")]
    SocketTimeout {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The remote command exceeded its allocated execution time.
    #[error("`{command}` exceeded the allocated execution time")]
    Timeout { command: String },

    /// The remote command finished with a non-zero exit status while exit
    /// checking was enabled.
    #[error("`{command}` returned \"{stderr}\" and code {exit_status} on {host}")]
    CommandFailed {
        command: String,
        stderr: String,
        exit_status: u32,
        host: String,
    },

    /// The remote command could not be carried through to completion. Wraps
    /// the underlying cause (a logical timeout or a transport fault).
    #[error("`{command}` failed to execute on {host}")]
    ExecutionFailed {
        command: String,
        host: String,
        #[source]
        source: Box<CephError>,
    },

    /// A new OSD was requested on a node whose volume pool is exhausted.
    /// Signals a broken inventory, not a runtime condition worth retrying.
    #[error("{host} has no free volume for a new osd")]
    NoFreeVolume { host: String },

    /// A topology query came up empty.
    #[error("no {0} in the cluster")]
    NotFound(String),

    /// The upgrade completed mechanically but left the cluster degraded.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    /// A machine-readable status report could not be parsed.
    #[error("unparseable status report: {0}")]
    MalformedStatus(String),

    /// Anything else the transport can raise.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Inventory or construction errors.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CephError {
    /// True when this error is a logical command timeout, including one
    /// wrapped inside an execution failure.
    pub fn is_timeout(&self) -> bool {
        match self {
            CephError::Timeout { .. } => true,
            CephError::ExecutionFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
