//! Builders for every outgoing DAP request.
//!
//! Each builder is a pure function from a sequence number and its
//! arguments to the full request object
//! `{ seq, type: "request", command, arguments }`.  The caller owns
//! sequence allocation; nothing here touches session state.

use serde_json::{Map, Value, json};

/// Client capabilities advertised in `initialize`.
///
/// `supportsRunInTerminalRequest` is always false — the proxy has no
/// terminal to lend out.  `supportsStartDebuggingRequest` is configurable
/// because advertising it flips some adapters (vscode-js-debug) into the
/// child-session pattern.
pub fn initialize(seq: i64, adapter_id: &str, supports_start_debugging: bool) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "initialize",
        "arguments": {
            "clientID": "dap-proxy",
            "clientName": "dap-proxy",
            "adapterID": adapter_id,
            "locale": "en-US",
            "linesStartAt1": true,
            "columnsStartAt1": true,
            "pathFormat": "path",
            "supportsVariableType": true,
            "supportsVariablePaging": true,
            "supportsMemoryReferences": true,
            "supportsProgressReporting": true,
            "supportsInvalidatedEvent": true,
            "supportsMemoryEvent": true,
            "supportsRunInTerminalRequest": false,
            "supportsStartDebuggingRequest": supports_start_debugging,
        },
    })
}

/// `launch` with the standard argument set.
///
/// `extras` is merged field-wise into `arguments` (after `{cwd}`
/// substitution, which the caller performs).  `console` is forced to
/// `internalConsole` afterwards so no adapter steals the terminal.
pub fn launch(
    seq: i64,
    program: &str,
    args: &[String],
    stop_on_entry: bool,
    extras: Option<&Value>,
    cwd: Option<&str>,
) -> Value {
    let mut arguments = Map::new();
    arguments.insert("program".to_string(), json!(program));
    arguments.insert("args".to_string(), json!(args));
    arguments.insert("stopOnEntry".to_string(), json!(stop_on_entry));
    if let Some(dir) = cwd {
        arguments.insert("cwd".to_string(), json!(dir));
    }
    if let Some(Value::Object(map)) = extras {
        for (key, value) in map {
            arguments.insert(key.clone(), value.clone());
        }
    }
    arguments.insert("console".to_string(), json!("internalConsole"));

    json!({
        "seq": seq,
        "type": "request",
        "command": "launch",
        "arguments": Value::Object(arguments),
    })
}

/// `launch` carrying a pre-built configuration object verbatim (child
/// sessions replay the captured `startDebugging` configuration).
pub fn launch_with_config(seq: i64, configuration: Value) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "launch",
        "arguments": configuration,
    })
}

pub fn attach(seq: i64, pid: u32, extras: Option<&Value>) -> Value {
    let mut arguments = Map::new();
    arguments.insert("processId".to_string(), json!(pid));
    if let Some(Value::Object(map)) = extras {
        for (key, value) in map {
            arguments.insert(key.clone(), value.clone());
        }
    }
    json!({
        "seq": seq,
        "type": "request",
        "command": "attach",
        "arguments": Value::Object(arguments),
    })
}

pub fn configuration_done(seq: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "configurationDone",
        "arguments": {},
    })
}

pub fn disconnect(seq: i64, restart: bool, terminate_debuggee: bool) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "disconnect",
        "arguments": {
            "restart": restart,
            "terminateDebuggee": terminate_debuggee,
        },
    })
}

pub fn terminate(seq: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "terminate",
        "arguments": { "restart": false },
    })
}

pub fn restart(seq: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "restart",
        "arguments": {},
    })
}

// ---------------------------------------------------------------------------
// Breakpoints
// ---------------------------------------------------------------------------

/// One entry of a `setBreakpoints` request.
#[derive(Debug, Clone)]
pub struct SourceBreakpointArg<'a> {
    pub line: i64,
    pub condition: Option<&'a str>,
    pub hit_condition: Option<&'a str>,
    pub log_message: Option<&'a str>,
}

/// `setBreakpoints` carries the whole set for one source file; the
/// adapter replaces anything it knew about that file.
pub fn set_breakpoints(seq: i64, path: &str, breakpoints: &[SourceBreakpointArg<'_>]) -> Value {
    let entries: Vec<Value> = breakpoints
        .iter()
        .map(|bp| {
            let mut entry = Map::new();
            entry.insert("line".to_string(), json!(bp.line));
            if let Some(cond) = bp.condition {
                entry.insert("condition".to_string(), json!(cond));
            }
            if let Some(hit) = bp.hit_condition {
                entry.insert("hitCondition".to_string(), json!(hit));
            }
            if let Some(log) = bp.log_message {
                entry.insert("logMessage".to_string(), json!(log));
            }
            Value::Object(entry)
        })
        .collect();

    json!({
        "seq": seq,
        "type": "request",
        "command": "setBreakpoints",
        "arguments": {
            "source": { "path": path },
            "breakpoints": entries,
            "lines": breakpoints.iter().map(|bp| bp.line).collect::<Vec<_>>(),
            "sourceModified": false,
        },
    })
}

pub fn set_function_breakpoints(seq: i64, names: &[(String, Option<String>)]) -> Value {
    let entries: Vec<Value> = names
        .iter()
        .map(|(name, condition)| {
            let mut entry = Map::new();
            entry.insert("name".to_string(), json!(name));
            if let Some(cond) = condition {
                entry.insert("condition".to_string(), json!(cond));
            }
            Value::Object(entry)
        })
        .collect();

    json!({
        "seq": seq,
        "type": "request",
        "command": "setFunctionBreakpoints",
        "arguments": { "breakpoints": entries },
    })
}

pub fn set_exception_breakpoints(seq: i64, filters: &[String]) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "setExceptionBreakpoints",
        "arguments": { "filters": filters },
    })
}

pub fn set_instruction_breakpoints(seq: i64, references: &[(String, Option<String>)]) -> Value {
    let entries: Vec<Value> = references
        .iter()
        .map(|(reference, condition)| {
            let mut entry = Map::new();
            entry.insert("instructionReference".to_string(), json!(reference));
            if let Some(cond) = condition {
                entry.insert("condition".to_string(), json!(cond));
            }
            Value::Object(entry)
        })
        .collect();

    json!({
        "seq": seq,
        "type": "request",
        "command": "setInstructionBreakpoints",
        "arguments": { "breakpoints": entries },
    })
}

pub fn set_data_breakpoints(seq: i64, entries: &[(String, Option<String>)]) -> Value {
    let breakpoints: Vec<Value> = entries
        .iter()
        .map(|(data_id, access_type)| {
            let mut entry = Map::new();
            entry.insert("dataId".to_string(), json!(data_id));
            if let Some(access) = access_type {
                entry.insert("accessType".to_string(), json!(access));
            }
            Value::Object(entry)
        })
        .collect();

    json!({
        "seq": seq,
        "type": "request",
        "command": "setDataBreakpoints",
        "arguments": { "breakpoints": breakpoints },
    })
}

pub fn data_breakpoint_info(seq: i64, name: &str, frame_id: Option<i64>) -> Value {
    let mut arguments = Map::new();
    arguments.insert("name".to_string(), json!(name));
    if let Some(frame) = frame_id {
        arguments.insert("frameId".to_string(), json!(frame));
    }
    json!({
        "seq": seq,
        "type": "request",
        "command": "dataBreakpointInfo",
        "arguments": Value::Object(arguments),
    })
}

pub fn breakpoint_locations(seq: i64, path: &str, line: i64, end_line: Option<i64>) -> Value {
    let mut arguments = Map::new();
    arguments.insert("source".to_string(), json!({ "path": path }));
    arguments.insert("line".to_string(), json!(line));
    if let Some(end) = end_line {
        arguments.insert("endLine".to_string(), json!(end));
    }
    json!({
        "seq": seq,
        "type": "request",
        "command": "breakpointLocations",
        "arguments": Value::Object(arguments),
    })
}

// ---------------------------------------------------------------------------
// Execution control
// ---------------------------------------------------------------------------

pub fn continue_(seq: i64, thread_id: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "continue",
        "arguments": { "threadId": thread_id },
    })
}

fn step(seq: i64, command: &str, thread_id: i64, granularity: Option<&str>) -> Value {
    let mut arguments = Map::new();
    arguments.insert("threadId".to_string(), json!(thread_id));
    if let Some(granularity) = granularity {
        arguments.insert("granularity".to_string(), json!(granularity));
    }
    json!({
        "seq": seq,
        "type": "request",
        "command": command,
        "arguments": Value::Object(arguments),
    })
}

pub fn next(seq: i64, thread_id: i64, granularity: Option<&str>) -> Value {
    step(seq, "next", thread_id, granularity)
}

pub fn step_in(
    seq: i64,
    thread_id: i64,
    granularity: Option<&str>,
    target_id: Option<i64>,
) -> Value {
    let mut msg = step(seq, "stepIn", thread_id, granularity);
    if let Some(target) = target_id {
        msg["arguments"]["targetId"] = json!(target);
    }
    msg
}

pub fn step_out(seq: i64, thread_id: i64, granularity: Option<&str>) -> Value {
    step(seq, "stepOut", thread_id, granularity)
}

pub fn step_back(seq: i64, thread_id: i64, granularity: Option<&str>) -> Value {
    step(seq, "stepBack", thread_id, granularity)
}

pub fn reverse_continue(seq: i64, thread_id: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "reverseContinue",
        "arguments": { "threadId": thread_id },
    })
}

pub fn pause(seq: i64, thread_id: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "pause",
        "arguments": { "threadId": thread_id },
    })
}

pub fn goto(seq: i64, thread_id: i64, target_id: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "goto",
        "arguments": { "threadId": thread_id, "targetId": target_id },
    })
}

pub fn goto_targets(seq: i64, path: &str, line: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "gotoTargets",
        "arguments": { "source": { "path": path }, "line": line },
    })
}

pub fn step_in_targets(seq: i64, frame_id: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "stepInTargets",
        "arguments": { "frameId": frame_id },
    })
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

pub fn threads(seq: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "threads",
        "arguments": {},
    })
}

pub fn stack_trace(seq: i64, thread_id: i64, start_frame: i64, levels: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "stackTrace",
        "arguments": {
            "threadId": thread_id,
            "startFrame": start_frame,
            "levels": levels,
        },
    })
}

pub fn scopes(seq: i64, frame_id: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "scopes",
        "arguments": { "frameId": frame_id },
    })
}

pub fn variables(seq: i64, variables_reference: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "variables",
        "arguments": { "variablesReference": variables_reference },
    })
}

pub fn evaluate(seq: i64, expression: &str, frame_id: Option<i64>, context: &str) -> Value {
    let mut arguments = Map::new();
    arguments.insert("expression".to_string(), json!(expression));
    arguments.insert("context".to_string(), json!(context));
    if let Some(frame) = frame_id {
        arguments.insert("frameId".to_string(), json!(frame));
    }
    json!({
        "seq": seq,
        "type": "request",
        "command": "evaluate",
        "arguments": Value::Object(arguments),
    })
}

pub fn set_variable(seq: i64, variables_reference: i64, name: &str, value: &str) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "setVariable",
        "arguments": {
            "variablesReference": variables_reference,
            "name": name,
            "value": value,
        },
    })
}

pub fn set_expression(seq: i64, expression: &str, value: &str, frame_id: Option<i64>) -> Value {
    let mut arguments = Map::new();
    arguments.insert("expression".to_string(), json!(expression));
    arguments.insert("value".to_string(), json!(value));
    if let Some(frame) = frame_id {
        arguments.insert("frameId".to_string(), json!(frame));
    }
    json!({
        "seq": seq,
        "type": "request",
        "command": "setExpression",
        "arguments": Value::Object(arguments),
    })
}

pub fn exception_info(seq: i64, thread_id: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "exceptionInfo",
        "arguments": { "threadId": thread_id },
    })
}

pub fn completions(seq: i64, text: &str, column: i64, frame_id: Option<i64>) -> Value {
    let mut arguments = Map::new();
    arguments.insert("text".to_string(), json!(text));
    arguments.insert("column".to_string(), json!(column));
    if let Some(frame) = frame_id {
        arguments.insert("frameId".to_string(), json!(frame));
    }
    json!({
        "seq": seq,
        "type": "request",
        "command": "completions",
        "arguments": Value::Object(arguments),
    })
}

// ---------------------------------------------------------------------------
// Memory, disassembly, sources, modules
// ---------------------------------------------------------------------------

pub fn read_memory(seq: i64, memory_reference: &str, offset: i64, count: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "readMemory",
        "arguments": {
            "memoryReference": memory_reference,
            "offset": offset,
            "count": count,
        },
    })
}

/// `data` is base64 as DAP requires; the caller encodes.
pub fn write_memory(
    seq: i64,
    memory_reference: &str,
    offset: i64,
    allow_partial: bool,
    data: &str,
) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "writeMemory",
        "arguments": {
            "memoryReference": memory_reference,
            "offset": offset,
            "allowPartial": allow_partial,
            "data": data,
        },
    })
}

pub fn disassemble(
    seq: i64,
    memory_reference: &str,
    instruction_offset: i64,
    instruction_count: i64,
    resolve_symbols: bool,
) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "disassemble",
        "arguments": {
            "memoryReference": memory_reference,
            "offset": 0,
            "instructionOffset": instruction_offset,
            "instructionCount": instruction_count,
            "resolveSymbols": resolve_symbols,
        },
    })
}

pub fn source(seq: i64, path: Option<&str>, source_reference: i64) -> Value {
    let mut src = Map::new();
    if let Some(p) = path {
        src.insert("path".to_string(), json!(p));
    }
    if source_reference != 0 {
        src.insert("sourceReference".to_string(), json!(source_reference));
    }
    json!({
        "seq": seq,
        "type": "request",
        "command": "source",
        "arguments": {
            "source": Value::Object(src),
            "sourceReference": source_reference,
        },
    })
}

pub fn loaded_sources(seq: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "loadedSources",
        "arguments": {},
    })
}

pub fn modules(seq: i64, start_module: i64, module_count: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "modules",
        "arguments": { "startModule": start_module, "moduleCount": module_count },
    })
}

// ---------------------------------------------------------------------------
// Misc control
// ---------------------------------------------------------------------------

pub fn restart_frame(seq: i64, frame_id: i64) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "restartFrame",
        "arguments": { "frameId": frame_id },
    })
}

pub fn cancel(seq: i64, request_seq: Option<i64>, progress_id: Option<&str>) -> Value {
    let mut arguments = Map::new();
    if let Some(rs) = request_seq {
        arguments.insert("requestId".to_string(), json!(rs));
    }
    if let Some(pid) = progress_id {
        arguments.insert("progressId".to_string(), json!(pid));
    }
    json!({
        "seq": seq,
        "type": "request",
        "command": "cancel",
        "arguments": Value::Object(arguments),
    })
}

pub fn terminate_threads(seq: i64, thread_ids: &[i64]) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": "terminateThreads",
        "arguments": { "threadIds": thread_ids },
    })
}

/// Arbitrary pass-through request for commands the driver surface does
/// not model.
pub fn raw(seq: i64, command: &str, arguments: Value) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": command,
        "arguments": arguments,
    })
}

/// Success response to a reverse request, preserving its `seq` as
/// `request_seq`.
pub fn success_response(seq: i64, request_seq: i64, command: &str) -> Value {
    json!({
        "seq": seq,
        "type": "response",
        "request_seq": request_seq,
        "success": true,
        "command": command,
        "body": {},
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shape(msg: &Value, seq: i64, command: &str) {
        assert_eq!(msg["seq"], json!(seq));
        assert_eq!(msg["type"], "request");
        assert_eq!(msg["command"], command);
        assert!(msg["arguments"].is_object());
    }

    #[test]
    fn test_initialize_capabilities() {
        let msg = initialize(1, "debugpy", true);
        assert_shape(&msg, 1, "initialize");
        let args = &msg["arguments"];
        assert_eq!(args["adapterID"], "debugpy");
        assert_eq!(args["linesStartAt1"], true);
        assert_eq!(args["columnsStartAt1"], true);
        assert_eq!(args["pathFormat"], "path");
        assert_eq!(args["supportsRunInTerminalRequest"], false);
        assert_eq!(args["supportsStartDebuggingRequest"], true);
        assert_eq!(args["supportsMemoryEvent"], true);
        assert_eq!(args["supportsProgressReporting"], true);
    }

    #[test]
    fn test_launch_merges_extras_and_forces_console() {
        let extras = json!({"justMyCode": false, "console": "integratedTerminal"});
        let msg = launch(
            2,
            "/work/app.py",
            &["--flag".to_string()],
            true,
            Some(&extras),
            Some("/work"),
        );
        assert_shape(&msg, 2, "launch");
        let args = &msg["arguments"];
        assert_eq!(args["program"], "/work/app.py");
        assert_eq!(args["args"][0], "--flag");
        assert_eq!(args["stopOnEntry"], true);
        assert_eq!(args["cwd"], "/work");
        assert_eq!(args["justMyCode"], false);
        // The extras blob must not be able to re-route output to a terminal.
        assert_eq!(args["console"], "internalConsole");
    }

    #[test]
    fn test_set_breakpoints_carries_whole_file_set() {
        let bps = [
            SourceBreakpointArg {
                line: 4,
                condition: Some("x > 1"),
                hit_condition: None,
                log_message: None,
            },
            SourceBreakpointArg {
                line: 9,
                condition: None,
                hit_condition: Some("3"),
                log_message: Some("hit {x}"),
            },
        ];
        let msg = set_breakpoints(5, "/src/main.rs", &bps);
        assert_shape(&msg, 5, "setBreakpoints");
        let args = &msg["arguments"];
        assert_eq!(args["source"]["path"], "/src/main.rs");
        assert_eq!(args["breakpoints"][0]["line"], 4);
        assert_eq!(args["breakpoints"][0]["condition"], "x > 1");
        assert!(args["breakpoints"][0].get("hitCondition").is_none());
        assert_eq!(args["breakpoints"][1]["hitCondition"], "3");
        assert_eq!(args["breakpoints"][1]["logMessage"], "hit {x}");
        assert_eq!(args["lines"], json!([4, 9]));
    }

    #[test]
    fn test_step_granularity_is_optional() {
        let with = next(3, 7, Some("instruction"));
        assert_eq!(with["arguments"]["granularity"], "instruction");
        let without = next(4, 7, None);
        assert!(without["arguments"].get("granularity").is_none());
    }

    #[test]
    fn test_step_in_target() {
        let msg = step_in(6, 1, None, Some(42));
        assert_shape(&msg, 6, "stepIn");
        assert_eq!(msg["arguments"]["targetId"], 42);
    }

    #[test]
    fn test_success_response_preserves_request_seq() {
        let msg = success_response(12, 900, "startDebugging");
        assert_eq!(msg["type"], "response");
        assert_eq!(msg["seq"], 12);
        assert_eq!(msg["request_seq"], 900);
        assert_eq!(msg["success"], true);
        assert_eq!(msg["command"], "startDebugging");
    }

    #[test]
    fn test_write_memory_shape() {
        let msg = write_memory(8, "0x7fff0000", 16, true, "AAECAw==");
        assert_shape(&msg, 8, "writeMemory");
        assert_eq!(msg["arguments"]["memoryReference"], "0x7fff0000");
        assert_eq!(msg["arguments"]["offset"], 16);
        assert_eq!(msg["arguments"]["allowPartial"], true);
        assert_eq!(msg["arguments"]["data"], "AAECAw==");
    }

    #[test]
    fn test_raw_passthrough() {
        let msg = raw(9, "ct/custom", json!({"a": 1}));
        assert_shape(&msg, 9, "ct/custom");
        assert_eq!(msg["arguments"]["a"], 1);
    }
}
