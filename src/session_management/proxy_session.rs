//! One proxied POP3 conversation.
//!
//! A `ProxySession` sits between one email client and its upstream server.
//! Client lines go through the [`ResponseTracker`] before being forwarded;
//! upstream lines are accumulated by the tracker and every completed
//! response is passed through the [`RewritePolicy`] on its way back.
//!
//! The client is not read while a command is in flight, so command N's
//! response reaches the client before command N+1 goes upstream.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, trace};
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::registry::SessionTicket;
use super::session::Session;
use super::SessionStatus;
use crate::configuration::ProxyEndpoint;
use crate::data_capture::{Direction, TranscriptRecorder};
use crate::error_handling::types::SessionError;
use crate::network::line_framer::LineFramer;
use crate::network::upstream::{UpstreamConnection, UpstreamEvent};
use crate::pop3::{ClientAction, ResponseTracker, Step};
use crate::rewrite::RewritePolicy;

const QUIT: &[u8] = b"QUIT\r\n";
const PREVIEW: usize = 64;

pub struct ProxySession<C, U = TcpStream> {
    session: Session,
    client_lines: LineFramer<ReadHalf<C>>,
    client_writer: WriteHalf<C>,
    upstream: UpstreamConnection<U>,
    tracker: ResponseTracker,
    policy: RewritePolicy,
    ticket: SessionTicket,
    transcript: Option<Arc<TranscriptRecorder>>,
}

impl<C, U> ProxySession<C, U>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    pub fn new(
        client: C,
        client_addr: SocketAddr,
        endpoint: &ProxyEndpoint,
        upstream: UpstreamConnection<U>,
        policy: RewritePolicy,
    ) -> Self {
        let session = Session::new(endpoint, client_addr);
        let ticket = policy.state().registry.open_session();
        let transcript = policy.state().transcript().cloned();
        let (reader, client_writer) = split(client);
        info!(
            "[{}] Session opened for {} via {}",
            session.id, client_addr, endpoint
        );
        Self {
            session,
            client_lines: LineFramer::new(reader),
            client_writer,
            upstream,
            tracker: ResponseTracker::default(),
            policy,
            ticket,
            transcript,
        }
    }

    /// Drives the conversation until either side goes away or the client
    /// sends `KILL`. Returns the finished session record.
    pub async fn run(mut self) -> Session {
        let status = loop {
            let idle = self.tracker.is_idle();
            let step = tokio::select! {
                biased;
                event = self.upstream.next_event() => self.on_upstream(event).await,
                line = self.client_lines.next_line(), if idle => match line {
                    Ok(Some(line)) => self.on_client_line(line).await,
                    Ok(None) => {
                        debug!("[{}] Client closed the connection", self.session.id);
                        Err(SessionStatus::Completed)
                    }
                    Err(e) => {
                        debug!("[{}] {}", self.session.id, SessionError::ClientIo(e));
                        Err(SessionStatus::Error)
                    }
                },
            };
            if let Err(status) = step {
                break status;
            }
        };
        self.close(status).await
    }

    /// `Err` carries the status the session ends with.
    async fn on_upstream(&mut self, event: UpstreamEvent) -> Result<(), SessionStatus> {
        let outcome = self.tracker.on_upstream(event, Instant::now());
        let delivered = match outcome.step {
            Step::Nothing => Ok(()),
            Step::Relay(data) => self.to_client(&data).await,
            Step::Rewrite(done) => {
                if done.timed_out {
                    info!(
                        "[{}] {} is slow, delivering what has arrived",
                        self.session.id, done.command
                    );
                }
                let rewritten = self.policy.rewrite(&done.command, &done.response);
                self.to_client(&rewritten).await
            }
        };
        if let Err(e) = delivered {
            debug!("[{}] {}", self.session.id, e);
            return Err(SessionStatus::Error);
        }
        if outcome.close_client {
            debug!("[{}] Upstream {} is gone", self.session.id, self.upstream.target());
            return Err(SessionStatus::Completed);
        }
        Ok(())
    }

    async fn on_client_line(&mut self, line: Vec<u8>) -> Result<(), SessionStatus> {
        self.session.bytes_from_client += line.len() as u64;
        if let Some(transcript) = &self.transcript {
            transcript.record(self.session.id, Direction::ClientToProxy, &line);
        }

        match self.tracker.on_client_line(&line, Instant::now()) {
            ClientAction::Forward(data) => {
                self.session.commands += 1;
                self.upstream.send(&data).await;
                Ok(())
            }
            ClientAction::Kill => {
                info!("[{}] KILL received, quitting upstream", self.session.id);
                self.upstream.send(QUIT).await;
                Err(SessionStatus::Killed)
            }
            ClientAction::Ignore => Ok(()),
        }
    }

    async fn to_client(&mut self, data: &[u8]) -> Result<(), SessionError> {
        trace!(
            "[{}] <- {} byte(s): {}",
            self.session.id,
            data.len(),
            String::from_utf8_lossy(&data[..data.len().min(PREVIEW)]).trim_end()
        );
        if let Some(transcript) = &self.transcript {
            transcript.record(self.session.id, Direction::ProxyToClient, data);
        }
        self.client_writer.write_all(data).await?;
        self.client_writer.flush().await?;
        self.session.bytes_to_client += data.len() as u64;
        Ok(())
    }

    async fn close(mut self, status: SessionStatus) -> Session {
        self.upstream.shutdown().await;
        let _ = self.client_writer.shutdown().await;
        self.ticket.close();
        self.session.finish(status);
        info!(
            "[{}] Session closed ({:?}) after {} command(s), {} byte(s) in, {} byte(s) out, {}s",
            self.session.id,
            self.session.status,
            self.session.commands,
            self.session.bytes_from_client,
            self.session.bytes_to_client,
            self.session.duration().num_seconds()
        );
        self.session
    }
}
