// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Lazy, reconnecting management of one remote session per (host, login)
//! pair.
//!
//! A `ConnectionManager` owns at most one live session at a time and
//! re-establishes it transparently when the transport dies, bounded by an
//! outage timeout. The session handle itself is transient state: only
//! `Credentials` are ever persisted, and a restored manager redials on first
//! use.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as SessionLock, MutexGuard};
use tokio::time::{sleep, Duration, Instant};

use crate::error::CephError;

/// Interval between connection attempts while a host is unreachable.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Cumulative time a manager keeps retrying before declaring the host
/// unreachable.
pub const OUTAGE_TIMEOUT: Duration = Duration::from_secs(600);

/// The persisted identity of a remote login. This is the only part of a
/// connection that survives serialization; live handles are rebuilt from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
    pub private_key_path: Option<String>,
}

/// One event observed on a command channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit(u32),
    Eof,
}

/// The event stream of a single remote command.
#[async_trait]
pub trait RemoteChannel: Send {
    /// The next event from the remote process, or `None` once the channel
    /// has closed.
    async fn recv(&mut self) -> Result<Option<ChannelData>, CephError>;
}

/// A live login session on a remote host.
#[async_trait]
pub trait RemoteSession: Send {
    fn is_active(&self) -> bool;

    /// Issue `command` on a fresh command channel.
    async fn exec(&mut self, command: &str) -> Result<Box<dyn RemoteChannel>, CephError>;
}

/// Dials a host. The production implementation lives in [`crate::ssh`]; the
/// tests substitute a scripted one.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, creds: &Credentials) -> Result<Box<dyn RemoteSession>, CephError>;
}

pub struct ConnectionManager {
    creds: Credentials,
    connector: Arc<dyn Connector>,
    /// The lock also serializes commands: one outstanding command per
    /// connection at a time.
    session: SessionLock<Option<Box<dyn RemoteSession>>>,
    outage_timeout: Duration,
    retry_interval: Duration,
    /// When the current outage began. Cleared on a successful connect so a
    /// later disconnection starts a fresh window.
    outage_start: Mutex<Option<Instant>>,
}

impl ConnectionManager {
    pub fn new(creds: Credentials, connector: Arc<dyn Connector>) -> Self {
        ConnectionManager {
            creds,
            connector,
            session: SessionLock::new(None),
            outage_timeout: OUTAGE_TIMEOUT,
            retry_interval: RETRY_INTERVAL,
            outage_start: Mutex::new(None),
        }
    }

    /// Override the outage window and the retry cadence.
    pub fn with_timing(mut self, outage_timeout: Duration, retry_interval: Duration) -> Self {
        self.outage_timeout = outage_timeout;
        self.retry_interval = retry_interval;
        self
    }

    pub fn host(&self) -> &str {
        &self.creds.host
    }

    /// Return a guard over a live session, dialing first if no session
    /// exists or the existing one has gone inactive.
    pub async fn session(&self) -> Result<ActiveSession<'_>, CephError> {
        let mut guard = self.session.lock().await;
        let live = match guard.take() {
            Some(session) if session.is_active() => session,
            _ => self.connect().await?,
        };
        *guard = Some(live);
        Ok(ActiveSession { guard })
    }

    /// Refresh the liveness of an existing session. A session that has gone
    /// inactive is dropped so the next command redials; a manager that never
    /// connected is left alone.
    pub async fn keepalive(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            if !session.is_active() {
                debug!("dropping dead session to {}", self.creds.host);
                *guard = None;
            }
        }
    }

    /// Dial until a session is established or the outage window closes.
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, CephError> {
        let end_time = Instant::now() + self.outage_timeout;
        while Instant::now() < end_time {
            match self.connector.connect(&self.creds).await {
                Ok(session) => {
                    *self.outage_start.lock().unwrap() = None;
                    return Ok(session);
                }
                Err(e) => {
                    warn!("error connecting to {}: {e}", self.creds.host);
                    {
                        let mut outage_start = self.outage_start.lock().unwrap();
                        if outage_start.is_none() {
                            *outage_start = Some(Instant::now());
                        }
                    }

                    debug!("retrying connection in {:?}", self.retry_interval);
                    sleep(self.retry_interval).await;
                }
            }
        }

        Err(CephError::ConnectionUnestablished {
            host: self.creds.host.clone(),
        })
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("host", &self.creds.host)
            .field("username", &self.creds.username)
            .finish()
    }
}

/// Exclusive use of a live session for the duration of one command.
pub struct ActiveSession<'a> {
    guard: MutexGuard<'a, Option<Box<dyn RemoteSession>>>,
}

impl ActiveSession<'_> {
    pub async fn exec(&mut self, command: &str) -> Result<Box<dyn RemoteChannel>, CephError> {
        match self.guard.as_mut() {
            Some(session) => session.exec(command).await,
            // session() only hands out a guard after (re)connecting.
            None => unreachable!(),
        }
    }
}
