//! DAP proxy core.
//!
//! Speaks the Debug Adapter Protocol on behalf of a higher-level tool:
//! spawns and supervises a debug adapter process (detached from any
//! controlling terminal), runs the initialization handshake, multiplexes
//! request/response/event/reverse-request traffic over one transport,
//! keeps breakpoint and session state across restarts, and bridges the
//! child debug sessions that `startDebugging`-style adapters spawn.
//!
//! The embedding tool drives a [`DapProxy`] from one task: launch or
//! attach, register breakpoints, `run` to the next stop, inspect, and
//! periodically drain the notification queue for its own subscribers.
//!
//! # References
//!
//! - DAP specification: <https://microsoft.github.io/debug-adapter-protocol/specification>

pub mod config;
pub mod dap_parser;
pub mod errors;
pub mod events;
pub mod install;
mod ops;
pub mod proxy;
pub mod requests;
pub mod session;
pub mod spawn;
pub mod transport;
pub mod types;

pub use config::{
    AdapterConfig, DependencyCheck, InstallSpec, RestartMethod, TransportKind,
};
pub use errors::DebugError;
pub use install::AdapterInstaller;
pub use proxy::DapProxy;
pub use session::{Capabilities, ExceptionFilter, Notification};
pub use types::{
    BreakpointInfo, BreakpointLocation, CompletionItem, DataBreakpointInfoResult,
    DisassembledInstruction, ExceptionDetails, GotoTarget, InspectRequest, InspectResult,
    MemoryChunk, ModuleInfo, OutputChunk, RunAction, RunOptions, ScopeInfo, SourceContent,
    SourceInfo, StackFrameInfo, StepInTarget, StopReason, StopState, ThreadInfo, VariableInfo,
};
