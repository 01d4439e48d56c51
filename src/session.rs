//! Per-session state: sequence counter, capability record, breakpoint
//! registry, frame-id cache, saved launch parameters, and the buffers the
//! event classifier writes into.
//!
//! The breakpoint registry outlives any single adapter connection.  On
//! restart or child-session swap the registry survives unchanged and is
//! replayed to the new adapter before `configurationDone`; everything
//! else here is reset per connection.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{BreakpointInfo, OutputChunk};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Adapter capability record, mirroring the DAP `supportsX` / `supportX`
/// flags.  Replaced wholesale from the `initialize` response; individual
/// fields are overridden by `capabilities` events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub supports_configuration_done_request: bool,
    pub supports_function_breakpoints: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_hit_conditional_breakpoints: bool,
    pub supports_evaluate_for_hovers: bool,
    pub supports_step_back: bool,
    pub supports_set_variable: bool,
    pub supports_restart_frame: bool,
    pub supports_goto_targets_request: bool,
    pub supports_step_in_targets_request: bool,
    pub supports_completions_request: bool,
    pub supports_modules_request: bool,
    pub supports_restart_request: bool,
    pub supports_exception_options: bool,
    pub supports_exception_info_request: bool,
    pub support_terminate_debuggee: bool,
    pub support_suspend_debuggee: bool,
    pub supports_delayed_stack_trace_loading: bool,
    pub supports_loaded_sources_request: bool,
    pub supports_log_points: bool,
    pub supports_terminate_threads_request: bool,
    pub supports_set_expression: bool,
    pub supports_terminate_request: bool,
    pub supports_data_breakpoints: bool,
    pub supports_read_memory_request: bool,
    pub supports_write_memory_request: bool,
    pub supports_disassemble_request: bool,
    pub supports_cancel_request: bool,
    pub supports_breakpoint_locations_request: bool,
    pub supports_clipboard_context: bool,
    pub supports_stepping_granularity: bool,
    pub supports_instruction_breakpoints: bool,
    pub supports_exception_filter_options: bool,
    pub supports_single_thread_execution_requests: bool,
}

impl Capabilities {
    /// Full replacement from an `initialize` response body.  Unknown
    /// fields are ignored; missing fields read as false.
    pub fn from_initialize_body(body: &Value) -> Self {
        serde_json::from_value(body.clone()).unwrap_or_default()
    }

    /// Field-level override from a `capabilities` event: only the fields
    /// present in `delta` change.
    pub fn apply_overrides(&mut self, delta: &Value) {
        let Ok(Value::Object(mut current)) = serde_json::to_value(&*self) else {
            return;
        };
        if let Value::Object(changes) = delta {
            for (key, value) in changes {
                current.insert(key.clone(), value.clone());
            }
        }
        if let Ok(updated) = serde_json::from_value(Value::Object(current)) {
            *self = updated;
        }
    }
}

/// One exception filter offered by the adapter in its `initialize`
/// response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExceptionFilter {
    pub filter: String,
    pub label: String,
    pub default: bool,
}

impl Default for ExceptionFilter {
    fn default() -> Self {
        Self {
            filter: String::new(),
            label: String::new(),
            default: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Breakpoint registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileBreakpoint {
    pub id: u32,
    pub line: i64,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub verified: bool,
    /// Adapter-assigned id from the last `setBreakpoints` response, used
    /// to resolve `breakpoint` events back to this entry.
    pub adapter_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FunctionBreakpoint {
    pub id: u32,
    pub name: String,
    pub condition: Option<String>,
}

/// Breakpoints known to the proxy, independent of what the adapter has
/// acknowledged.  Local ids are monotonic from 1 and never reused; the
/// auxiliary location map lets removal work by id alone.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    next_id: u32,
    /// Per-file ordered entries, keyed by resolved absolute path.
    files: BTreeMap<String, Vec<FileBreakpoint>>,
    functions: Vec<FunctionBreakpoint>,
    /// Active exception filter ids, last-set-wins.
    exception_filters: Vec<String>,
    /// local id -> (file, line); every id here appears exactly once in
    /// exactly one per-file sequence.
    locations: HashMap<u32, (String, i64)>,
}

impl BreakpointRegistry {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_file_breakpoint(
        &mut self,
        file: String,
        line: i64,
        condition: Option<String>,
        hit_condition: Option<String>,
        log_message: Option<String>,
    ) -> u32 {
        let id = self.alloc_id();
        self.locations.insert(id, (file.clone(), line));
        self.files.entry(file).or_default().push(FileBreakpoint {
            id,
            line,
            condition,
            hit_condition,
            log_message,
            verified: false,
            adapter_id: None,
        });
        id
    }

    /// Removes a file breakpoint by local id, returning the file whose
    /// set must be re-sent to the adapter.
    pub fn remove(&mut self, id: u32) -> Option<String> {
        let (file, _line) = self.locations.remove(&id)?;
        if let Some(entries) = self.files.get_mut(&file) {
            entries.retain(|bp| bp.id != id);
            if entries.is_empty() {
                self.files.remove(&file);
            }
        }
        Some(file)
    }

    pub fn add_function_breakpoint(&mut self, name: String, condition: Option<String>) -> u32 {
        let id = self.alloc_id();
        self.functions.push(FunctionBreakpoint {
            id,
            name,
            condition,
        });
        id
    }

    pub fn set_exception_filters(&mut self, filters: Vec<String>) {
        self.exception_filters = filters;
    }

    pub fn exception_filters(&self) -> &[String] {
        &self.exception_filters
    }

    pub fn files(&self) -> impl Iterator<Item = (&String, &Vec<FileBreakpoint>)> {
        self.files.iter()
    }

    pub fn file_entries(&self, file: &str) -> &[FileBreakpoint] {
        self.files.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn function_breakpoints(&self) -> &[FunctionBreakpoint] {
        &self.functions
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.functions.is_empty() && self.exception_filters.is_empty()
    }

    /// Records the adapter's acknowledgement for one file's set, pairing
    /// response entries with registry entries by position (DAP guarantees
    /// the response array parallels the request array).
    pub fn record_acknowledgement(&mut self, file: &str, acknowledged: &[Value]) {
        let Some(entries) = self.files.get_mut(file) else {
            return;
        };
        for (entry, ack) in entries.iter_mut().zip(acknowledged) {
            entry.adapter_id = ack.get("id").and_then(Value::as_i64);
            entry.verified = ack.get("verified").and_then(Value::as_bool).unwrap_or(false);
            if let Some(line) = ack.get("line").and_then(Value::as_i64) {
                entry.line = line;
            }
        }
        // Lines may have moved (source maps); refresh the location map.
        for entry in entries.iter() {
            self.locations
                .insert(entry.id, (file.to_string(), entry.line));
        }
    }

    /// Local id of the entry the adapter knows under `adapter_id`.
    pub fn local_id_for_adapter_id(&self, adapter_id: i64) -> Option<u32> {
        self.files
            .values()
            .flatten()
            .find(|bp| bp.adapter_id == Some(adapter_id))
            .map(|bp| bp.id)
    }

    /// Applies a `breakpoint` event: resolves the adapter id back to the
    /// registry entry and refreshes its verified flag and line.
    pub fn apply_breakpoint_event(&mut self, adapter_id: i64, verified: bool, line: Option<i64>) {
        for (file, entries) in self.files.iter_mut() {
            for entry in entries.iter_mut() {
                if entry.adapter_id == Some(adapter_id) {
                    entry.verified = verified;
                    if let Some(line) = line {
                        entry.line = line;
                        self.locations
                            .insert(entry.id, (file.clone(), line));
                    }
                    return;
                }
            }
        }
    }

    /// Everything the registry tracks, file breakpoints first, as
    /// caller-owned records.
    pub fn list(&self) -> Vec<BreakpointInfo> {
        let mut out = Vec::new();
        for (file, entries) in &self.files {
            for bp in entries {
                out.push(BreakpointInfo {
                    id: bp.id,
                    file: Some(file.clone()),
                    line: Some(bp.line),
                    function: None,
                    condition: bp.condition.clone(),
                    hit_condition: bp.hit_condition.clone(),
                    log_message: bp.log_message.clone(),
                    verified: bp.verified,
                });
            }
        }
        for fb in &self.functions {
            out.push(BreakpointInfo {
                id: fb.id,
                file: None,
                line: None,
                function: Some(fb.name.clone()),
                condition: fb.condition.clone(),
                hit_condition: None,
                log_message: None,
                verified: true,
            });
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn location_of(&self, id: u32) -> Option<&(String, i64)> {
        self.locations.get(&id)
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        // Every id in the location map appears exactly once across the
        // per-file sequences, and vice versa.
        let mut seen = std::collections::HashSet::new();
        for entries in self.files.values() {
            for bp in entries {
                assert!(seen.insert(bp.id), "id {} appears twice", bp.id);
                assert!(
                    self.locations.contains_key(&bp.id),
                    "id {} missing from location map",
                    bp.id
                );
            }
        }
        assert_eq!(seen.len(), self.locations.len());
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Lifecycle phase of the session.  `DeferredConfigDone` marks the window
/// between a stop-on-entry child handshake and the first `run`, during
/// which breakpoint changes stay registry-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecyclePhase {
    #[default]
    Unlaunched,
    Initializing,
    ChildPendingConfig,
    DeferredConfigDone,
    Running,
    Terminated,
}

/// Launch parameters saved verbatim for emulated restart.
#[derive(Debug, Clone)]
pub struct SavedLaunch {
    pub program: String,
    pub args: Vec<String>,
    pub stop_on_entry: bool,
    /// Fully substituted adapter argv (command first).
    pub adapter_argv: Vec<String>,
}

/// One outward-facing notification; draining transfers ownership to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub method: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    pub title: String,
    pub message: Option<String>,
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEvent {
    pub memory_reference: String,
    pub offset: i64,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub struct InvalidatedEvent {
    pub areas: Vec<String>,
    pub stack_frame_id: Option<i64>,
}

/// Mutable per-session state.  Owned exclusively by the proxy; query
/// results handed to callers are fresh allocations.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Next outgoing sequence number; strictly monotonic, starts at 1,
    /// resets to 1 on child-session swap and emulated restart.
    seq: i64,
    pub phase: LifecyclePhase,
    pub initialized: bool,
    /// Default thread for operations, from the last `stopped` event.
    pub thread_id: Option<i64>,
    /// Topmost frame id from the last stop.
    pub top_frame_id: Option<i64>,
    /// Frame ids from the last stack trace, index 0 = topmost.
    pub frame_ids: Vec<i64>,
    pub capabilities: Capabilities,
    /// Exception filters offered by the adapter.
    pub exception_filters_available: Vec<ExceptionFilter>,
    pub breakpoints: BreakpointRegistry,
    pub saved_launch: Option<SavedLaunch>,
    /// Pending outward notifications, drained by the caller.
    pub notifications: VecDeque<Notification>,
    /// Output captured between stops.
    pub output: Vec<OutputChunk>,
    /// Active progress states keyed by progressId.
    pub progress: HashMap<String, ProgressState>,
    pub memory_events: Vec<MemoryEvent>,
    pub invalidated: Vec<InvalidatedEvent>,
    /// Module names reported as new/changed by `module` events.
    pub loaded_modules: Vec<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            seq: 1,
            ..Self::default()
        }
    }

    /// Allocates the next sequence number.
    pub fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    /// Resets connection-scoped state for a child-session swap or an
    /// emulated restart.  The breakpoint registry and saved launch
    /// parameters survive.
    pub fn reset_for_new_connection(&mut self) {
        self.seq = 1;
        self.initialized = false;
        self.thread_id = None;
        self.top_frame_id = None;
        self.frame_ids.clear();
        self.output.clear();
        self.progress.clear();
        self.memory_events.clear();
        self.invalidated.clear();
    }

    /// Caches the frame ids of a fresh stack trace, position 0 = topmost.
    pub fn cache_frames(&mut self, ids: Vec<i64>) {
        self.top_frame_id = ids.first().copied();
        self.frame_ids = ids;
    }

    /// Translates a 0-based frame position to the adapter's frame id:
    /// the cached id at that index, the cached topmost id when out of
    /// range, or nothing when no stop has been observed.
    pub fn resolve_frame_id(&self, index: Option<usize>) -> Option<i64> {
        match index {
            Some(i) => self.frame_ids.get(i).copied().or(self.top_frame_id),
            None => self.top_frame_id,
        }
    }

    pub fn push_notification(&mut self, method: &str, payload: Value) {
        self.notifications.push_back(Notification {
            method: method.to_string(),
            payload,
        });
    }

    /// Hands every pending notification to the caller in arrival order.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seq_starts_at_one_and_increments() {
        let mut session = SessionState::new();
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
        assert_eq!(session.next_seq(), 3);
    }

    #[test]
    fn test_reset_for_new_connection_preserves_registry() {
        let mut session = SessionState::new();
        session.next_seq();
        session.next_seq();
        session.initialized = true;
        session.thread_id = Some(4);
        session.cache_frames(vec![10, 11]);
        let id = session.breakpoints.add_file_breakpoint(
            "/src/a.rs".to_string(),
            7,
            None,
            None,
            None,
        );

        session.reset_for_new_connection();

        assert_eq!(session.next_seq(), 1);
        assert!(!session.initialized);
        assert_eq!(session.thread_id, None);
        assert!(session.frame_ids.is_empty());
        // Registry survives the reset.
        assert_eq!(session.breakpoints.location_of(id).unwrap().1, 7);
    }

    #[test]
    fn test_registry_ids_monotonic_and_unique() {
        let mut reg = BreakpointRegistry::default();
        let a = reg.add_file_breakpoint("/a".to_string(), 1, None, None, None);
        let b = reg.add_file_breakpoint("/a".to_string(), 2, None, None, None);
        let c = reg.add_file_breakpoint("/b".to_string(), 3, None, None, None);
        assert_eq!((a, b, c), (1, 2, 3));
        reg.check_invariants();

        reg.remove(b);
        reg.check_invariants();
        // Removed ids are never reused.
        let d = reg.add_file_breakpoint("/a".to_string(), 9, None, None, None);
        assert_eq!(d, 4);
        reg.check_invariants();
    }

    #[test]
    fn test_registry_remove_returns_file_and_drops_empty_entries() {
        let mut reg = BreakpointRegistry::default();
        let id = reg.add_file_breakpoint("/only".to_string(), 5, None, None, None);
        assert_eq!(reg.remove(id).as_deref(), Some("/only"));
        assert!(reg.file_entries("/only").is_empty());
        assert!(reg.remove(id).is_none());
        reg.check_invariants();
    }

    #[test]
    fn test_registry_acknowledgement_updates_lines_and_ids() {
        let mut reg = BreakpointRegistry::default();
        let id = reg.add_file_breakpoint("/src/app.js".to_string(), 4, None, None, None);
        reg.record_acknowledgement(
            "/src/app.js",
            &[json!({"id": 77, "verified": true, "line": 6})],
        );

        let entries = reg.file_entries("/src/app.js");
        assert_eq!(entries[0].adapter_id, Some(77));
        assert!(entries[0].verified);
        assert_eq!(entries[0].line, 6);
        assert_eq!(reg.location_of(id).unwrap().1, 6);
    }

    #[test]
    fn test_registry_breakpoint_event_resolves_adapter_id() {
        let mut reg = BreakpointRegistry::default();
        reg.add_file_breakpoint("/src/app.js".to_string(), 4, None, None, None);
        reg.record_acknowledgement("/src/app.js", &[json!({"id": 5, "verified": false})]);

        reg.apply_breakpoint_event(5, true, Some(8));
        let entries = reg.file_entries("/src/app.js");
        assert!(entries[0].verified);
        assert_eq!(entries[0].line, 8);
        reg.check_invariants();
    }

    #[test]
    fn test_registry_list_covers_all_kinds() {
        let mut reg = BreakpointRegistry::default();
        reg.add_file_breakpoint("/a".to_string(), 1, Some("x>0".to_string()), None, None);
        reg.add_function_breakpoint("main".to_string(), None);
        reg.set_exception_filters(vec!["uncaught".to_string()]);

        let listed = reg.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].file.as_deref(), Some("/a"));
        assert_eq!(listed[0].condition.as_deref(), Some("x>0"));
        assert_eq!(listed[1].function.as_deref(), Some("main"));
        assert_eq!(reg.exception_filters(), ["uncaught"]);
    }

    #[test]
    fn test_exception_filters_last_set_wins() {
        let mut reg = BreakpointRegistry::default();
        reg.set_exception_filters(vec!["raised".to_string(), "uncaught".to_string()]);
        reg.set_exception_filters(vec!["uncaught".to_string()]);
        assert_eq!(reg.exception_filters(), ["uncaught"]);
    }

    #[test]
    fn test_capabilities_full_replacement() {
        let body = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsFunctionBreakpoints": true,
            "supportsRestartRequest": false,
            "somethingUnknown": true,
        });
        let caps = Capabilities::from_initialize_body(&body);
        assert!(caps.supports_configuration_done_request);
        assert!(caps.supports_function_breakpoints);
        assert!(!caps.supports_restart_request);
        assert!(!caps.supports_read_memory_request);
    }

    #[test]
    fn test_capabilities_field_override() {
        let mut caps = Capabilities::from_initialize_body(&json!({
            "supportsFunctionBreakpoints": true,
        }));
        caps.apply_overrides(&json!({"supportsRestartRequest": true}));
        // The override touches only the named field.
        assert!(caps.supports_restart_request);
        assert!(caps.supports_function_breakpoints);
    }

    #[test]
    fn test_resolve_frame_id() {
        let mut session = SessionState::new();
        assert_eq!(session.resolve_frame_id(Some(0)), None);

        session.cache_frames(vec![100, 101, 102]);
        assert_eq!(session.resolve_frame_id(None), Some(100));
        assert_eq!(session.resolve_frame_id(Some(2)), Some(102));
        // Out of range falls back to the topmost id.
        assert_eq!(session.resolve_frame_id(Some(9)), Some(100));
    }

    #[test]
    fn test_drain_notifications_transfers_in_order() {
        let mut session = SessionState::new();
        session.push_notification("debug/output", json!({"n": 1}));
        session.push_notification("debug/stopped", json!({"n": 2}));

        let drained = session.drain_notifications();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].method, "debug/output");
        assert_eq!(drained[1].method, "debug/stopped");
        assert!(session.drain_notifications().is_empty());
    }
}
