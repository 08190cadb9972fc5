// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! SSH transport backed by russh.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use russh::client::{self, Handle};
use russh::ChannelMsg;
use russh_keys::key;
use tokio::time::Duration;

use crate::conn::{ChannelData, Connector, Credentials, RemoteChannel, RemoteSession};
use crate::error::CephError;

/// Accepts whatever host key the node presents. The harness provisions the
/// nodes it talks to, so there is no prior-knowledge key database to check
/// against.
struct TrustingClient;

#[async_trait]
impl client::Handler for TrustingClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Map a transport error, keeping socket timeouts as their own kind.
fn transport_error(host: &str, err: russh::Error) -> CephError {
    match err {
        russh::Error::IO(source) if source.kind() == io::ErrorKind::TimedOut => {
            CephError::SocketTimeout {
                host: host.to_string(),
                source,
            }
        }
        other => CephError::Transport(other.to_string()),
    }
}

pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new() -> Self {
        let config = client::Config {
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        };
        SshConnector {
            config: Arc::new(config),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, creds: &Credentials) -> Result<Box<dyn RemoteSession>, CephError> {
        debug!("dialing {}@{}", creds.username, creds.host);
        let mut handle = client::connect(
            Arc::clone(&self.config),
            (creds.host.as_str(), crate::remote_port()),
            TrustingClient,
        )
        .await
        .map_err(|e| transport_error(&creds.host, e))?;

        let authenticated = match &creds.private_key_path {
            Some(path) => {
                let keypair = russh_keys::load_secret_key(path, None)
                    .map_err(|e| CephError::Transport(format!("unusable key {path}: {e}")))?;
                handle
                    .authenticate_publickey(creds.username.as_str(), Arc::new(keypair))
                    .await
                    .map_err(|e| transport_error(&creds.host, e))?
            }
            None => handle
                .authenticate_password(creds.username.as_str(), creds.password.as_str())
                .await
                .map_err(|e| transport_error(&creds.host, e))?,
        };

        if !authenticated {
            return Err(CephError::Transport(format!(
                "authentication rejected for {}@{}",
                creds.username, creds.host
            )));
        }

        Ok(Box::new(SshSession {
            host: creds.host.clone(),
            handle,
        }))
    }
}

struct SshSession {
    host: String,
    handle: Handle<TrustingClient>,
}

#[async_trait]
impl RemoteSession for SshSession {
    fn is_active(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn exec(&mut self, command: &str) -> Result<Box<dyn RemoteChannel>, CephError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| transport_error(&self.host, e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| transport_error(&self.host, e))?;

        Ok(Box::new(SshChannel { channel }))
    }
}

struct SshChannel {
    channel: russh::Channel<client::Msg>,
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn recv(&mut self) -> Result<Option<ChannelData>, CephError> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    return Ok(Some(ChannelData::Stdout(data.to_vec())))
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    return Ok(Some(ChannelData::Stderr(data.to_vec())))
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return Ok(Some(ChannelData::Exit(exit_status)))
                }
                Some(ChannelMsg::Eof) => return Ok(Some(ChannelData::Eof)),
                // Window adjustments and other control traffic are not
                // interesting to the executor.
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }
}
