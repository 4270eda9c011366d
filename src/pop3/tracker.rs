//! POP3 request/response tracking for one session.
//!
//! The tracker is a plain state machine: the session feeds it client lines
//! and upstream events and acts on what it returns. It is `Idle` while no
//! command is in flight and `AwaitingResponse` from the moment a command is
//! forwarded until its response is complete.

use std::sync::OnceLock;
use std::time::Duration;

use log::debug;
use regex::bytes::Regex;
use tokio::time::Instant;

use super::command::{Pop3Command, Verb};
use crate::network::upstream::UpstreamEvent;

/// How long RETR/TOP may run, once all headers are in, before the headers
/// are handed over without waiting for the terminator.
pub const RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do with a line received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send these bytes to the server.
    Forward(Vec<u8>),
    /// Quit upstream and tear the session down.
    Kill,
    /// Blank line: nothing is forwarded.
    Ignore,
}

/// A finished response, ready for the rewrite policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedResponse {
    pub command: Pop3Command,
    pub response: Vec<u8>,
    /// Completed by the retrieval timeout rather than by its terminator.
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Nothing,
    /// Unsolicited upstream data, relayed untouched.
    Relay(Vec<u8>),
    Rewrite(CompletedResponse),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub step: Step,
    /// Close the client once `step` has been delivered.
    pub close_client: bool,
}

#[derive(Debug)]
pub struct ResponseTracker {
    command: Option<Pop3Command>,
    started: Option<Instant>,
    response: Vec<u8>,
    seen_all_headers: bool,
    closing: bool,
    timeout: Duration,
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self::new(RETRIEVAL_TIMEOUT)
    }
}

impl ResponseTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            command: None,
            started: None,
            response: Vec::new(),
            seen_all_headers: false,
            closing: false,
            timeout,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.command.is_none()
    }

    pub fn command(&self) -> Option<&Pop3Command> {
        self.command.as_ref()
    }

    pub fn on_client_line(&mut self, line: &[u8], now: Instant) -> ClientAction {
        let Some(command) = Pop3Command::parse(line) else {
            // Someone just hit the Enter key.
            self.reset();
            return ClientAction::Ignore;
        };
        if command.verb == Verb::Kill {
            return ClientAction::Kill;
        }

        debug!("Command in flight: {}", command);
        self.command = Some(command);
        self.started = Some(now);

        let mut forward = line.to_vec();
        if !forward.ends_with(b"\r\n") {
            forward.extend_from_slice(b"\r\n");
        }
        ClientAction::Forward(forward)
    }

    pub fn on_upstream(&mut self, event: UpstreamEvent, now: Instant) -> Outcome {
        let line = match event {
            UpstreamEvent::Line(line) => line,
            UpstreamEvent::Closed => {
                self.closing = true;
                Vec::new()
            }
        };
        let is_first_line = self.response.is_empty();
        self.response.extend_from_slice(&line);
        self.seen_all_headers = self.seen_all_headers || line == b"\r\n" || line == b"\n";

        let Some(command) = self.command.take() else {
            // Greeting banners and anything else nobody asked for.
            let data = std::mem::take(&mut self.response);
            let close_client = self.closing;
            self.reset();
            let step = if data.is_empty() {
                Step::Nothing
            } else {
                Step::Relay(data)
            };
            return Outcome { step, close_client };
        };

        let timed_out = command.is_retrieval()
            && self.seen_all_headers
            && self
                .started
                .is_some_and(|started| now.duration_since(started) > self.timeout);
        let complete = timed_out
            || !command.expects_multiline()
            || line == b".\r\n"
            || (is_first_line && line.starts_with(b"-ERR"))
            || self.closing;

        if !complete {
            self.command = Some(command);
            return Outcome {
                step: Step::Nothing,
                close_client: false,
            };
        }

        if timed_out {
            debug!(
                "{} exceeded {:?} after the headers; passing the rest through",
                command, self.timeout
            );
        }
        let mut response = std::mem::take(&mut self.response);
        if command.verb == Verb::Capa {
            response = strip_unsupported_capabilities(&response);
        }
        let close_client = self.closing;
        self.reset();

        let step = if response.is_empty() {
            Step::Nothing
        } else {
            Step::Rewrite(CompletedResponse {
                command,
                response,
                timed_out,
            })
        };
        Outcome { step, close_client }
    }

    fn reset(&mut self) {
        self.command = None;
        self.started = None;
        self.response.clear();
        self.seen_all_headers = false;
        self.closing = false;
    }
}

/// Removes capabilities the proxy cannot pass through from a CAPA answer.
pub fn strip_unsupported_capabilities(response: &[u8]) -> Vec<u8> {
    static UNSUPPORTED: OnceLock<Regex> = OnceLock::new();
    let re = UNSUPPORTED.get_or_init(|| {
        Regex::new(r"(?im-u)^(?:PIPELINING|STLS)[^\n]*\n").expect("static regex")
    });
    re.replace_all(response, &b""[..]).into_owned()
}
