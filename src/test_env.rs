// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Scripted in-memory transport and cluster builders for the integration
//! tests.
//!
//! A `TestConnector` takes the place of SSH: tests register canned
//! responses keyed on command substrings, and every command that reaches
//! the transport is recorded so tests can assert on what was issued.
//! All access to transport scripting should go through the helpers here
//! rather than be coded in the tests themselves.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cluster::{Cluster, ClusterConfig, ClusterVersion, Networks};
use crate::config::NodeSpec;
use crate::conn::{
    ChannelData, Connector, Credentials, RemoteChannel, RemoteSession,
};
use crate::error::CephError;
use crate::node::{Node, PkgType};
use tokio::time::{sleep_until, Duration, Instant};

/// One canned reply: a sequence of (delay, event) pairs played back through
/// the channel, ending with channel close.
#[derive(Debug, Clone)]
pub struct TestResponse {
    events: Vec<(Duration, ChannelData)>,
}

impl TestResponse {
    /// Exit 0 with the given stdout.
    pub fn ok(stdout: &str) -> Self {
        TestResponse {
            events: vec![
                (Duration::ZERO, ChannelData::Stdout(stdout.as_bytes().to_vec())),
                (Duration::ZERO, ChannelData::Exit(0)),
                (Duration::ZERO, ChannelData::Eof),
            ],
        }
    }

    /// Non-zero exit with the given stderr.
    pub fn failed(exit_status: u32, stderr: &str) -> Self {
        TestResponse {
            events: vec![
                (Duration::ZERO, ChannelData::Stderr(stderr.as_bytes().to_vec())),
                (Duration::ZERO, ChannelData::Exit(exit_status)),
                (Duration::ZERO, ChannelData::Eof),
            ],
        }
    }

    /// A command that never completes.
    pub fn hang() -> Self {
        TestResponse {
            events: vec![(Duration::from_secs(7 * 24 * 3600), ChannelData::Eof)],
        }
    }

    /// Full control over the event sequence.
    pub fn raw(events: Vec<(Duration, ChannelData)>) -> Self {
        TestResponse { events }
    }
}

struct Rule {
    pattern: String,
    /// Responses consumed in order; the last one repeats.
    responses: VecDeque<TestResponse>,
}

struct TestState {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    connect_attempts: AtomicUsize,
    refuse: bool,
}

/// A scripted stand-in for the SSH connector.
pub struct TestConnector {
    state: Arc<TestState>,
}

impl TestConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(TestConnector {
            state: Arc::new(TestState {
                rules: Mutex::new(Vec::new()),
                commands: Mutex::new(Vec::new()),
                connect_attempts: AtomicUsize::new(0),
                refuse: false,
            }),
        })
    }

    /// A connector whose host never accepts a session.
    pub fn refusing() -> Arc<Self> {
        Arc::new(TestConnector {
            state: Arc::new(TestState {
                rules: Mutex::new(Vec::new()),
                commands: Mutex::new(Vec::new()),
                connect_attempts: AtomicUsize::new(0),
                refuse: true,
            }),
        })
    }

    /// Respond to commands containing `pattern` with `response`, every time.
    pub fn respond(&self, pattern: &str, response: TestResponse) {
        self.respond_seq(pattern, vec![response]);
    }

    /// Respond to commands containing `pattern` with each response in turn;
    /// the last response keeps repeating.
    pub fn respond_seq(&self, pattern: &str, responses: Vec<TestResponse>) {
        self.state.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            responses: responses.into(),
        });
    }

    /// Every command issued through this connector, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    /// True if some issued command contains `needle`.
    pub fn saw_command(&self, needle: &str) -> bool {
        self.commands().iter().any(|cmd| cmd.contains(needle))
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::Relaxed)
    }
}

impl TestState {
    /// Pick the scripted response whose pattern gives the longest match
    /// inside `command`; unmatched commands succeed with empty output.
    fn response_for(&self, command: &str) -> TestResponse {
        self.commands.lock().unwrap().push(command.to_string());

        let mut rules = self.rules.lock().unwrap();
        let best = rules
            .iter_mut()
            .filter(|rule| command.contains(&rule.pattern))
            .max_by_key(|rule| rule.pattern.len());
        match best {
            Some(rule) => {
                if rule.responses.len() > 1 {
                    rule.responses.pop_front().unwrap()
                } else {
                    rule.responses[0].clone()
                }
            }
            None => TestResponse::ok(""),
        }
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self, creds: &Credentials) -> Result<Box<dyn RemoteSession>, CephError> {
        self.state.connect_attempts.fetch_add(1, Ordering::Relaxed);
        if self.state.refuse {
            return Err(CephError::Transport(format!(
                "connection refused by {}",
                creds.host
            )));
        }
        Ok(Box::new(TestSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct TestSession {
    state: Arc<TestState>,
}

#[async_trait]
impl RemoteSession for TestSession {
    fn is_active(&self) -> bool {
        true
    }

    async fn exec(&mut self, command: &str) -> Result<Box<dyn RemoteChannel>, CephError> {
        let response = self.state.response_for(command);
        Ok(Box::new(TestChannel {
            events: response.events.into(),
            next_ready: None,
        }))
    }
}

struct TestChannel {
    events: VecDeque<(Duration, ChannelData)>,
    /// Absolute readiness of the front event, so a wait cancelled by the
    /// executor's poll timeout does not restart the scripted delay.
    next_ready: Option<Instant>,
}

#[async_trait]
impl RemoteChannel for TestChannel {
    async fn recv(&mut self) -> Result<Option<ChannelData>, CephError> {
        let delay = match self.events.front() {
            Some((delay, _)) => *delay,
            None => return Ok(None),
        };

        let ready_at = *self.next_ready.get_or_insert_with(|| Instant::now() + delay);
        sleep_until(ready_at).await;
        self.next_ready = None;

        match self.events.pop_front() {
            Some((_, data)) => Ok(Some(data)),
            None => Ok(None),
        }
    }
}

/// Credentials for a host in the scripted environment.
pub fn test_credentials(host: &str) -> Credentials {
    Credentials {
        host: host.to_string(),
        username: "cephuser".to_string(),
        password: "cephpasswd".to_string(),
        private_key_path: None,
    }
}

/// Inventory entry for a scripted node: device-backed volumes, rpm, an OS
/// that ships podman.
pub fn test_node_spec(hostname: &str, roles: &[&str], volumes: usize) -> NodeSpec {
    NodeSpec {
        hostname: hostname.to_string(),
        ip_address: format!("10.0.0.{}", hostname.len()),
        internal_ip: None,
        username: "cephuser".to_string(),
        password: "cephpasswd".to_string(),
        root_password: "passwd".to_string(),
        private_key_path: None,
        roles: roles.iter().map(|role| role.to_string()).collect(),
        devices: (0..volumes).map(|i| format!("/dev/vd{}", (b'b' + i as u8) as char)).collect(),
        no_of_volumes: 0,
        pkg_type: PkgType::Rpm,
        os_version: Some("8.6".to_string()),
    }
}

/// Build a node wired to the scripted transport.
pub fn test_node(
    hostname: &str,
    roles: &[&str],
    volumes: usize,
    connector: &Arc<TestConnector>,
) -> Arc<Node> {
    Node::from_spec(
        &test_node_spec(hostname, roles, volumes),
        Arc::clone(connector) as Arc<dyn Connector>,
    )
    .expect("test inventory must build")
}

/// Build a cluster of scripted nodes from inventory entries (see
/// [`test_node_spec`]).
pub fn test_cluster(
    version: &str,
    specs: Vec<NodeSpec>,
    connector: &Arc<TestConnector>,
) -> Arc<Cluster> {
    let nodes = specs
        .iter()
        .map(|spec| {
            Node::from_spec(spec, Arc::clone(connector) as Arc<dyn Connector>)
                .expect("test inventory must build")
        })
        .collect();

    Arc::new(Cluster::new(
        "test",
        nodes,
        ClusterVersion::new(version),
        Networks::default(),
        ClusterConfig {
            container_image: None,
            repo_base_url: Some("http://repo.test/compose/Tools".to_string()),
            overrides: Vec::new(),
        },
    ))
}
