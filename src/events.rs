//! Event classification.
//!
//! Every inbound `event` message passes through [`dispatch_event`] once,
//! at arrival: it applies the event's side effect to session state and
//! enqueues the outward-facing notification.  The correlator then keeps
//! the raw event in its backlog so a later `wait_for_event` can observe
//! it; backlogged events are never re-classified.

use log::debug;
use serde_json::{Value, json};

use crate::session::{InvalidatedEvent, MemoryEvent, ProgressState, SessionState};
use crate::types::OutputChunk;

// Outward notification method names.
pub const NOTIFY_STOPPED: &str = "debug/stopped";
pub const NOTIFY_OUTPUT: &str = "debug/output";
pub const NOTIFY_BREAKPOINT_VERIFIED: &str = "debug/breakpoint_verified";
pub const NOTIFY_MODULE: &str = "debug/module";
pub const NOTIFY_CONTINUED: &str = "debug/continued";
pub const NOTIFY_THREAD: &str = "debug/thread";
pub const NOTIFY_PROCESS: &str = "debug/process";
pub const NOTIFY_CAPABILITIES_CHANGED: &str = "debug/capabilities_changed";
pub const NOTIFY_MEMORY_CHANGED: &str = "debug/memory_changed";
pub const NOTIFY_PROGRESS: &str = "debug/progress";
pub const NOTIFY_EXITED: &str = "debug/exited";
pub const NOTIFY_TERMINATED: &str = "debug/terminated";
pub const NOTIFY_INVALIDATED: &str = "debug/invalidated";
pub const NOTIFY_START_DEBUGGING: &str = "debug/start_debugging";
pub const NOTIFY_RUN_IN_TERMINAL: &str = "debug/run_in_terminal";

/// Applies one event's side effect and enqueues its notification.
pub fn dispatch_event(session: &mut SessionState, msg: &Value) {
    let name = msg.get("event").and_then(Value::as_str).unwrap_or("");
    let body = msg.get("body").cloned().unwrap_or_else(|| json!({}));

    match name {
        "stopped" => {
            if let Some(thread_id) = body.get("threadId").and_then(Value::as_i64) {
                session.thread_id = Some(thread_id);
            }
            session.push_notification(NOTIFY_STOPPED, body);
        }
        "output" => {
            let category = body
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or("console");
            if category == "telemetry" {
                return;
            }
            let text = body
                .get("output")
                .and_then(Value::as_str)
                .unwrap_or_default();
            session.output.push(OutputChunk {
                category: category.to_string(),
                text: text.to_string(),
            });
            session.push_notification(NOTIFY_OUTPUT, body);
        }
        "breakpoint" => {
            if let Some(bp) = body.get("breakpoint") {
                if let Some(adapter_id) = bp.get("id").and_then(Value::as_i64) {
                    let verified = bp.get("verified").and_then(Value::as_bool).unwrap_or(false);
                    let line = bp.get("line").and_then(Value::as_i64);
                    session
                        .breakpoints
                        .apply_breakpoint_event(adapter_id, verified, line);
                }
            }
            session.push_notification(NOTIFY_BREAKPOINT_VERIFIED, body);
        }
        "module" => {
            let reason = body.get("reason").and_then(Value::as_str).unwrap_or("");
            if reason == "new" || reason == "changed" {
                if let Some(name) = body
                    .get("module")
                    .and_then(|m| m.get("name"))
                    .and_then(Value::as_str)
                {
                    session.loaded_modules.push(name.to_string());
                }
            }
            session.push_notification(NOTIFY_MODULE, body);
        }
        "continued" => session.push_notification(NOTIFY_CONTINUED, body),
        "thread" => session.push_notification(NOTIFY_THREAD, body),
        "process" => session.push_notification(NOTIFY_PROCESS, body),
        "capabilities" => {
            if let Some(delta) = body.get("capabilities") {
                session.capabilities.apply_overrides(delta);
            }
            session.push_notification(NOTIFY_CAPABILITIES_CHANGED, body);
        }
        "memory" => {
            session.memory_events.push(MemoryEvent {
                memory_reference: body
                    .get("memoryReference")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                offset: body.get("offset").and_then(Value::as_i64).unwrap_or(0),
                count: body.get("count").and_then(Value::as_i64).unwrap_or(0),
            });
            session.push_notification(NOTIFY_MEMORY_CHANGED, body);
        }
        "progressStart" => {
            if let Some(id) = body.get("progressId").and_then(Value::as_str) {
                session.progress.insert(
                    id.to_string(),
                    ProgressState {
                        title: body
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        message: body
                            .get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        percentage: body.get("percentage").and_then(Value::as_f64),
                    },
                );
            }
            session.push_notification(NOTIFY_PROGRESS, body);
        }
        "progressUpdate" => {
            if let Some(id) = body.get("progressId").and_then(Value::as_str) {
                if let Some(state) = session.progress.get_mut(id) {
                    if let Some(message) = body.get("message").and_then(Value::as_str) {
                        state.message = Some(message.to_string());
                    }
                    if let Some(percentage) = body.get("percentage").and_then(Value::as_f64) {
                        state.percentage = Some(percentage);
                    }
                }
            }
            session.push_notification(NOTIFY_PROGRESS, body);
        }
        "progressEnd" => {
            if let Some(id) = body.get("progressId").and_then(Value::as_str) {
                session.progress.remove(id);
            }
            session.push_notification(NOTIFY_PROGRESS, body);
        }
        "exited" => session.push_notification(NOTIFY_EXITED, body),
        "terminated" => {
            session.initialized = false;
            session.push_notification(NOTIFY_TERMINATED, body);
        }
        "invalidated" => {
            let areas = body
                .get("areas")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            session.invalidated.push(InvalidatedEvent {
                areas,
                stack_frame_id: body.get("stackFrameId").and_then(Value::as_i64),
            });
            session.push_notification(NOTIFY_INVALIDATED, body);
        }
        // Queried on demand instead of streamed to subscribers.
        "loadedSource" => {}
        other => {
            debug!("unclassified adapter event {other:?}");
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
