use std::collections::VecDeque;

use log::{debug, info, trace, warn};
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::line_framer::LineFramer;

/// What the session sees of its upstream server: one line at a time, then a
/// single close signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Line(Vec<u8>),
    Closed,
}

enum LinkState<S> {
    Open {
        lines: LineFramer<ReadHalf<S>>,
        writer: WriteHalf<S>,
    },
    Synthetic(VecDeque<UpstreamEvent>),
    Closed,
}

/// The socket to the real POP3 server for one session.
///
/// Transport failures never surface as errors. A failed connect becomes a
/// synthesized `-ERR` line followed by [`UpstreamEvent::Closed`], and read
/// failures become `Closed`, so the session state machine has one uniform
/// input channel and the client always gets a protocol-level answer.
pub struct UpstreamConnection<S = TcpStream> {
    target: String,
    state: LinkState<S>,
}

impl UpstreamConnection<TcpStream> {
    /// Connects to `host:port`. Never fails; see the type documentation.
    pub async fn connect(host: &str, port: u16) -> Self {
        let target = format!("{}:{}", host, port);
        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                info!("Connected to upstream {}", target);
                Self::from_stream(stream, target)
            }
            Err(e) => {
                let reason = format!("Can't connect to {}: {}", target, e);
                warn!("{}", reason);
                Self::unreachable(target, &reason)
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite> UpstreamConnection<S> {
    pub fn from_stream(stream: S, target: String) -> Self {
        let (reader, writer) = split(stream);
        Self {
            target,
            state: LinkState::Open {
                lines: LineFramer::new(reader),
                writer,
            },
        }
    }

    /// A connection that could not be established: yields `-ERR <reason>`
    /// and then closes.
    pub fn unreachable(target: String, reason: &str) -> Self {
        let events = VecDeque::from(vec![
            UpstreamEvent::Line(format!("-ERR {}\r\n", reason).into_bytes()),
            UpstreamEvent::Closed,
        ]);
        Self {
            target,
            state: LinkState::Synthetic(events),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, LinkState::Open { .. })
    }

    /// Waits for the next line or the close signal.
    ///
    /// Cancel safe. Once `Closed` has been returned, later calls never
    /// resolve.
    pub async fn next_event(&mut self) -> UpstreamEvent {
        let event = match &mut self.state {
            LinkState::Open { lines, .. } => match lines.next_line().await {
                Ok(Some(line)) => Some(UpstreamEvent::Line(line)),
                Ok(None) => {
                    debug!("Upstream {} closed the connection", self.target);
                    None
                }
                Err(e) => {
                    debug!("Upstream {} read failed: {}", self.target, e);
                    None
                }
            },
            LinkState::Synthetic(queue) => queue.pop_front(),
            LinkState::Closed => return std::future::pending().await,
        };

        match event {
            Some(UpstreamEvent::Line(line)) => UpstreamEvent::Line(line),
            Some(UpstreamEvent::Closed) | None => {
                self.state = LinkState::Closed;
                UpstreamEvent::Closed
            }
        }
    }

    /// Forwards bytes to the server. Failures are logged and dropped; the
    /// read side reports the breakage as `Closed`.
    pub async fn send(&mut self, data: &[u8]) {
        match &mut self.state {
            LinkState::Open { writer, .. } => {
                trace!(
                    "-> {} {}",
                    self.target,
                    String::from_utf8_lossy(&data[..data.len().min(64)]).trim_end()
                );
                let result = match writer.write_all(data).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    debug!("Write to upstream {} failed: {}", self.target, e);
                }
            }
            _ => debug!(
                "Dropping {} byte(s) for unconnected upstream {}",
                data.len(),
                self.target
            ),
        }
    }

    pub async fn shutdown(&mut self) {
        if let LinkState::Open { writer, .. } = &mut self.state {
            let _ = writer.shutdown().await;
        }
        self.state = LinkState::Closed;
    }
}
