//! Caller-owned result records.
//!
//! Every query operation allocates fresh values here; nothing borrows
//! from the JSON a response was parsed out of.  Numeric fields that are
//! missing or of the wrong JSON kind default to 0; optional strings
//! default to `None`.

use serde::Serialize;
use serde_json::Value;

/// Why the debuggee stopped, translated from the adapter's reason string.
/// Unrecognized reasons map to [`StopReason::Step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Breakpoint,
    Step,
    Exception,
    Entry,
    Pause,
    Goto,
    FunctionBreakpoint,
    DataBreakpoint,
    InstructionBreakpoint,
    /// The program ran to completion instead of stopping.
    Exited,
}

impl StopReason {
    pub fn from_adapter(reason: &str) -> Self {
        match reason {
            "breakpoint" => Self::Breakpoint,
            "step" => Self::Step,
            "exception" => Self::Exception,
            "entry" => Self::Entry,
            "pause" => Self::Pause,
            "goto" => Self::Goto,
            "function breakpoint" => Self::FunctionBreakpoint,
            "data breakpoint" => Self::DataBreakpoint,
            "instruction breakpoint" => Self::InstructionBreakpoint,
            _ => Self::Step,
        }
    }
}

/// Execution-control actions accepted by `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Continue,
    StepInto,
    StepOver,
    StepOut,
    Pause,
    ReverseContinue,
    StepBack,
}

/// Optional parameters for `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Thread to drive; defaults to the session's last stopped thread.
    pub thread_id: Option<i64>,
    /// Stepping granularity (`statement`, `line`, `instruction`); only
    /// forwarded when the adapter advertises stepping granularity.
    pub granularity: Option<String>,
    /// `stepIn` target from a prior `stepInTargets` query.
    pub target_id: Option<i64>,
}

/// State returned by `run` once the debuggee stops (or exits).
#[derive(Debug, Clone, Serialize)]
pub struct StopState {
    pub reason: StopReason,
    pub description: Option<String>,
    pub thread_id: Option<i64>,
    pub hit_breakpoint_ids: Vec<i64>,
    /// Exit code, for [`StopReason::Exited`].
    pub exit_code: Option<i64>,
    pub frames: Vec<StackFrameInfo>,
    /// Output captured since the previous stop, in arrival order.
    pub output: Vec<OutputChunk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackFrameInfo {
    pub id: i64,
    pub name: String,
    pub source_path: Option<String>,
    pub line: i64,
    pub column: i64,
    pub instruction_pointer_reference: Option<String>,
}

/// One `output` event's payload, minus telemetry noise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputChunk {
    pub category: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadInfo {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeInfo {
    pub name: String,
    pub variables_reference: i64,
    pub expensive: bool,
    pub named_variables: Option<i64>,
    pub indexed_variables: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
    pub variables_reference: i64,
    pub memory_reference: Option<String>,
}

/// Result of the three-way `inspect` operation.
#[derive(Debug, Clone, Serialize)]
pub struct InspectResult {
    /// Evaluated value, empty for pure expansion queries.
    pub value: String,
    pub type_name: Option<String>,
    pub variables_reference: i64,
    /// Direct children: scope or variable members, or one auto-expanded
    /// level of an evaluate result.
    pub children: Vec<VariableInfo>,
}

/// Parameters for `inspect`.  Exactly one of `variable_ref > 0`, `scope`,
/// or `expression` drives the dispatch, checked in that order.
#[derive(Debug, Clone, Default)]
pub struct InspectRequest {
    pub expression: Option<String>,
    pub variable_ref: i64,
    pub scope: Option<String>,
    /// 0-based frame position, 0 = topmost; defaults to the cached top.
    pub frame_index: Option<usize>,
    /// Evaluate context (`watch`, `repl`, `hover`, `clipboard`).
    pub context: Option<String>,
}

/// A registered breakpoint, materialized from the registry.
#[derive(Debug, Clone, Serialize)]
pub struct BreakpointInfo {
    pub id: u32,
    pub file: Option<String>,
    pub line: Option<i64>,
    pub function: Option<String>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub id: String,
    pub name: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: Option<String>,
    pub path: Option<String>,
    pub source_reference: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceContent {
    pub content: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionItem {
    pub label: String,
    pub text: Option<String>,
    pub item_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisassembledInstruction {
    pub address: String,
    pub instruction: String,
    pub instruction_bytes: Option<String>,
    pub symbol: Option<String>,
    pub line: Option<i64>,
}

/// Decoded `readMemory` result.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryChunk {
    pub address: String,
    pub data: Vec<u8>,
    pub unreadable_bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepInTarget {
    pub id: i64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GotoTarget {
    pub id: i64,
    pub label: String,
    pub line: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakpointLocation {
    pub line: i64,
    pub column: Option<i64>,
    pub end_line: Option<i64>,
    pub end_column: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionDetails {
    pub exception_id: String,
    pub description: Option<String>,
    pub break_mode: Option<String>,
    pub type_name: Option<String>,
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataBreakpointInfoResult {
    /// `None` when the adapter cannot watch this datum.
    pub data_id: Option<String>,
    pub description: String,
    pub access_types: Vec<String>,
    pub can_persist: bool,
}

// ---------------------------------------------------------------------------
// JSON field helpers
// ---------------------------------------------------------------------------

/// `body[field]` as i64, defaulting to 0 on absence or wrong kind.
pub(crate) fn int_or_zero(value: &Value, field: &str) -> i64 {
    value.get(field).and_then(Value::as_i64).unwrap_or(0)
}

pub(crate) fn opt_int(value: &Value, field: &str) -> Option<i64> {
    value.get(field).and_then(Value::as_i64)
}

pub(crate) fn opt_str(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn str_or_empty(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn bool_or_false(value: &Value, field: &str) -> bool {
    value.get(field).and_then(Value::as_bool).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
