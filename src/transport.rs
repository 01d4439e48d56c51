//! Unified adapter transport.
//!
//! Exactly one variant is live at a time: nothing, a stdio-piped child,
//! or a TCP stream to a child that announced its port.  A TCP transport
//! may additionally retain the parent-session stream that a child-session
//! swap replaced; it is held only so teardown closes it.
//!
//! All reads and writes go through here so the correlator never cares
//! which wire it is on.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::errors::DebugError;
use crate::spawn::DetachedProcess;

#[derive(Debug, Default)]
pub enum Transport {
    #[default]
    None,
    Stdio(DetachedProcess),
    Tcp {
        stream: TcpStream,
        /// Parent-session stream displaced by a child-session swap; kept
        /// open until teardown, then dropped (closed) with the rest.
        parent: Option<TcpStream>,
        /// The adapter process behind the socket, when this proxy spawned
        /// it.  `None` when attached to an externally managed adapter.
        child: Option<DetachedProcess>,
    },
}

impl Transport {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Pid of the adapter process, if this transport owns one.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::None => None,
            Self::Stdio(proc) => Some(proc.pid()),
            Self::Tcp { child, .. } => child.as_ref().map(DetachedProcess::pid),
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), DebugError> {
        match self {
            Self::None => Err(DebugError::NotInitialized),
            Self::Stdio(proc) => {
                let stdin = proc.stdin.as_mut().ok_or(DebugError::ConnectionClosed)?;
                stdin
                    .write_all(bytes)
                    .await
                    .map_err(|source| DebugError::WriteFailed { source })?;
                stdin
                    .flush()
                    .await
                    .map_err(|source| DebugError::WriteFailed { source })
            }
            Self::Tcp { stream, .. } => stream
                .write_all(bytes)
                .await
                .map_err(|source| DebugError::WriteFailed { source }),
        }
    }

    /// Reads whatever is available into `buf`.  `Ok(0)` is end-of-stream;
    /// the caller translates that to [`DebugError::ConnectionClosed`].
    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, DebugError> {
        match self {
            Self::None => Err(DebugError::NotInitialized),
            Self::Stdio(proc) => {
                let stdout = proc.stdout.as_mut().ok_or(DebugError::ConnectionClosed)?;
                stdout
                    .read(buf)
                    .await
                    .map_err(|source| DebugError::ReadFailed { source })
            }
            Self::Tcp { stream, .. } => stream
                .read(buf)
                .await
                .map_err(|source| DebugError::ReadFailed { source }),
        }
    }

    /// Swaps the active TCP stream for a freshly connected one (the
    /// child-session swap), retaining the old stream for teardown.
    /// No-op on non-TCP transports.
    pub fn swap_stream(&mut self, new_stream: TcpStream) {
        if let Self::Tcp { stream, parent, .. } = self {
            let old = std::mem::replace(stream, new_stream);
            *parent = Some(old);
        }
    }

    /// Kills the adapter process group and drops every held handle,
    /// including any retained parent stream.  Leaves the transport at
    /// [`Transport::None`]; safe to call repeatedly.
    pub fn kill(&mut self) {
        match std::mem::take(self) {
            Self::None => {}
            Self::Stdio(mut proc) => proc.kill(),
            Self::Tcp {
                stream,
                parent,
                child,
            } => {
                drop(stream);
                drop(parent);
                if let Some(mut proc) = child {
                    proc.kill();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
