// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Execution of a single remote command: streaming read with incremental
//! decoding, timeout enforcement, and the (stdout, stderr, exit status,
//! duration) result contract.

use log::{debug, error, info};
use tokio::time::{timeout, Duration, Instant};

use crate::conn::{ChannelData, ConnectionManager};
use crate::error::CephError;

/// Polling cadence while waiting for the remote process to finish.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on the trailing read performed after the exit status arrives.
const FINAL_DRAIN: Duration = Duration::from_secs(10);

/// Default command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default timeout for long-running commands.
pub const LONG_RUNNING_TIMEOUT: Duration = Duration::from_secs(3600);

/// How long a command may run before it is abandoned.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum TimeoutSpec {
    /// 600 seconds, or 3600 for a long-running command.
    #[default]
    Default,
    /// Wait forever.
    None,
    Secs(u64),
}

#[derive(Debug, Clone, Default)]
pub struct ExecOpts {
    /// Run over the root connection.
    pub sudo: bool,
    /// Selects the longer default timeout and forces line logging.
    pub long_running: bool,
    /// Raise on a non-zero exit status. Defaults to true, except for
    /// long-running commands.
    pub check_ec: Option<bool>,
    pub timeout: TimeoutSpec,
    /// Log output lines as they stream in.
    pub verbose: bool,
    /// Log a formatted command/duration/exit/output block afterwards.
    pub pretty_print: bool,
}

impl ExecOpts {
    pub fn as_root() -> Self {
        ExecOpts {
            sudo: true,
            ..Default::default()
        }
    }

    pub fn resolved_timeout(&self) -> Option<Duration> {
        match self.timeout {
            TimeoutSpec::Default => Some(if self.long_running {
                LONG_RUNNING_TIMEOUT
            } else {
                DEFAULT_TIMEOUT
            }),
            TimeoutSpec::None => None,
            TimeoutSpec::Secs(secs) => Some(Duration::from_secs(secs)),
        }
    }

    pub fn check_exit(&self) -> bool {
        self.check_ec.unwrap_or(!self.long_running)
    }
}

/// What came back from one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: u32,
    /// Wall-clock seconds from issuing the command to its exit status.
    pub duration: f64,
}

/// Incremental lossy UTF-8 decoding.
///
/// Output arrives from the transport in arbitrary chunks, so a multi-byte
/// sequence can be split across reads. Complete input decodes exactly as
/// `String::from_utf8_lossy` would decode the concatenated bytes: a split
/// sequence is held back until its remainder arrives, and an invalid one
/// becomes U+FFFD. Decoding never fails.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, holding back any trailing incomplete sequence.
    pub fn decode(&mut self, input: &[u8]) -> String {
        self.pending.extend_from_slice(input);
        let buf = std::mem::take(&mut self.pending);
        let mut out = String::with_capacity(buf.len());
        let mut bytes = &buf[..];

        loop {
            match std::str::from_utf8(bytes) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&bytes[..valid_up_to]).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            bytes = &bytes[valid_up_to + bad..];
                        }
                        None => {
                            // A sequence truncated at the chunk boundary; the
                            // rest should arrive with the next read.
                            self.pending.extend_from_slice(&bytes[valid_up_to..]);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush a sequence left truncated at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

/// Accumulates one output stream, logging completed lines as they arrive
/// (error level for stderr, debug for stdout).
struct StreamReader {
    decoder: Utf8Decoder,
    text: String,
    line_start: usize,
    stderr: bool,
    log_lines: bool,
}

impl StreamReader {
    fn new(stderr: bool, log_lines: bool) -> Self {
        StreamReader {
            decoder: Utf8Decoder::new(),
            text: String::new(),
            line_start: 0,
            stderr,
            log_lines,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        let decoded = self.decoder.decode(bytes);
        self.text.push_str(&decoded);
        if self.log_lines {
            self.log_complete_lines();
        }
    }

    fn log_complete_lines(&mut self) {
        while let Some(offset) = self.text[self.line_start..].find('\n') {
            let end = self.line_start + offset;
            let line = &self.text[self.line_start..end];
            if self.stderr {
                error!("{line}");
            } else {
                debug!("{line}");
            }
            self.line_start = end + 1;
        }
    }

    fn into_text(mut self) -> String {
        let tail = self.decoder.finish();
        self.text.push_str(&tail);
        if self.log_lines && self.line_start < self.text.len() {
            let line = &self.text[self.line_start..];
            if self.stderr {
                error!("{line}");
            } else {
                debug!("{line}");
            }
        }
        self.text
    }
}

/// Run `command` over `conn`, holding the connection for the duration so
/// commands on one connection stay strictly sequential.
pub async fn run(
    conn: &ConnectionManager,
    command: &str,
    opts: &ExecOpts,
) -> Result<CommandOutput, CephError> {
    let timeout_limit = opts.resolved_timeout();
    // Long-running commands always log their stream.
    let log_lines = opts.verbose || opts.long_running;

    let mut session = conn.session().await?;

    info!("execute `{command}` on {}", conn.host());
    let start = Instant::now();
    let deadline = timeout_limit.map(|limit| start + limit);
    let mut channel = session.exec(command).await?;

    let mut stdout = StreamReader::new(false, log_lines);
    let mut stderr = StreamReader::new(true, log_lines);
    let mut exit_status = None;
    let mut closed = false;

    while exit_status.is_none() && !closed {
        // Wake at least once a second to enforce the deadline, but never
        // spin faster than data arrives.
        match timeout(POLL_INTERVAL, channel.recv()).await {
            Err(_) => {}
            Ok(event) => match event? {
                Some(ChannelData::Stdout(bytes)) => stdout.push(&bytes),
                Some(ChannelData::Stderr(bytes)) => stderr.push(&bytes),
                Some(ChannelData::Exit(status)) => exit_status = Some(status),
                Some(ChannelData::Eof) => {}
                None => closed = true,
            },
        }

        if let Some(deadline) = deadline {
            if exit_status.is_none() && Instant::now() >= deadline {
                error!("`{command}` failed to execute within {timeout_limit:?}");
                return Err(CephError::Timeout {
                    command: command.to_string(),
                });
            }
        }
    }

    let duration = start.elapsed().as_secs_f64();
    info!("execution of `{command}` on {} took {duration} seconds", conn.host());

    // The exit status and the last of the buffered output are not ordered
    // with respect to each other on the transport, so a bounded trailing
    // read is required to pick up residue.
    let drain_deadline = Instant::now() + FINAL_DRAIN;
    while !closed && Instant::now() < drain_deadline {
        match timeout(POLL_INTERVAL, channel.recv()).await {
            Err(_) => break,
            Ok(event) => match event? {
                Some(ChannelData::Stdout(bytes)) => stdout.push(&bytes),
                Some(ChannelData::Stderr(bytes)) => stderr.push(&bytes),
                Some(ChannelData::Exit(status)) => exit_status = Some(status),
                Some(ChannelData::Eof) => {}
                None => closed = true,
            },
        }
    }

    let exit_status = exit_status.ok_or_else(|| {
        CephError::Transport(format!("`{command}` channel closed without an exit status"))
    })?;

    Ok(CommandOutput {
        stdout: stdout.into_text(),
        stderr: stderr.into_text(),
        exit_status,
        duration,
    })
}
