//! Crate-wide error type for driver operations.
//!
//! Errors fall into four families:
//!
//! - **Setup errors** — dependency checks, install resolution, spawning,
//!   TCP connection, port detection.  No session state is established.
//! - **Protocol errors** — timeouts, closed connections, I/O failures,
//!   malformed responses.  [`DebugError::Timeout`] leaves the session
//!   usable: the stale-response filter drops the late reply when it
//!   eventually arrives.
//! - **Capability refusals** — [`DebugError::NotSupported`] is returned
//!   synchronously when the adapter did not advertise the capability an
//!   operation needs; no wire traffic occurs.
//! - **Best-effort paths** — `disconnect`, `terminate`, `cancel` and
//!   breakpoint re-arm swallow errors because the peer may already be gone.

use std::{error::Error, fmt::Display};

#[derive(Debug)]
pub enum DebugError {
    /// An operation was invoked before a session was launched or attached,
    /// or it needs cached stop state that does not exist yet.
    NotInitialized,
    /// The adapter did not advertise the capability the operation requires.
    NotSupported { operation: &'static str },
    /// No complete reply arrived within `request_timeout_ms`.
    Timeout { waiting_for: String },
    /// The transport reached EOF; the adapter is gone.
    ConnectionClosed,
    ReadFailed { source: std::io::Error },
    WriteFailed { source: std::io::Error },
    /// The peer sent something that cannot be interpreted in context.
    InvalidResponse { context: String },
    /// The adapter's port-announcement line could not be parsed.
    PortParseFailed { line: String },
    ConnectionFailed { addr: String, source: std::io::Error },
    /// A configured dependency check failed; carries that check's message.
    DependencyCheckFailed { message: String },
    UnsupportedLanguage { language: String },
    /// The adapter rejected a memory reference (`success=false` on a
    /// read/write memory request).  Distinct from [`DebugError::NotSupported`]
    /// so transient address failures are not mistaken for missing features.
    InvalidAddress { reference: String },
    SpawnFailed { command: String, source: std::io::Error },
    /// Adapter installation could not produce an install directory.
    InstallFailed { message: String },
}

impl Display for DebugError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "no debug session is initialized"),
            Self::NotSupported { operation } => {
                write!(f, "adapter does not support {operation}")
            }
            Self::Timeout { waiting_for } => {
                write!(f, "timed out waiting for {waiting_for}")
            }
            Self::ConnectionClosed => write!(f, "adapter connection closed"),
            Self::ReadFailed { source } => write!(f, "transport read failed: {source}"),
            Self::WriteFailed { source } => write!(f, "transport write failed: {source}"),
            Self::InvalidResponse { context } => {
                write!(f, "invalid adapter response: {context}")
            }
            Self::PortParseFailed { line } => {
                write!(f, "cannot parse adapter port from: {line:?}")
            }
            Self::ConnectionFailed { addr, source } => {
                write!(f, "cannot connect to adapter at {addr}: {source}")
            }
            Self::DependencyCheckFailed { message } => write!(f, "{message}"),
            Self::UnsupportedLanguage { language } => {
                write!(f, "unsupported language: {language}")
            }
            Self::InvalidAddress { reference } => {
                write!(f, "adapter rejected memory reference {reference}")
            }
            Self::SpawnFailed { command, source } => {
                write!(f, "failed to spawn adapter {command:?}: {source}")
            }
            Self::InstallFailed { message } => {
                write!(f, "adapter install failed: {message}")
            }
        }
    }
}

impl Error for DebugError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadFailed { source }
            | Self::WriteFailed { source }
            | Self::ConnectionFailed { source, .. }
            | Self::SpawnFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
