//! Thin driver operations over the live session.
//!
//! Each operation gates on the matching adapter capability (refusing
//! synchronously, with no wire traffic, when it is absent), builds the
//! DAP request, sends it through the correlator, and parses the response
//! body into caller-owned records.  Missing or wrongly typed numeric
//! fields read as 0; missing strings read as `None`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::errors::DebugError;
use crate::proxy::DapProxy;
use crate::requests;
use crate::types::{
    BreakpointLocation, CompletionItem, DataBreakpointInfoResult, DisassembledInstruction,
    ExceptionDetails, GotoTarget, InspectRequest, InspectResult, MemoryChunk, ModuleInfo,
    ScopeInfo, SourceContent, SourceInfo, StackFrameInfo, StepInTarget, ThreadInfo, VariableInfo,
    bool_or_false, int_or_zero, opt_int, opt_str, str_or_empty,
};

/// Body of a successful response; a `success: false` response surfaces
/// the adapter's message.
fn checked_body(response: Value, operation: &str) -> Result<Value, DebugError> {
    let success = response
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if !success {
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("adapter reported failure");
        return Err(DebugError::InvalidResponse {
            context: format!("{operation}: {message}"),
        });
    }
    Ok(response.get("body").cloned().unwrap_or_else(|| json!({})))
}

pub(crate) fn parse_stack_frames(body: &Value) -> Vec<StackFrameInfo> {
    body.get("stackFrames")
        .and_then(Value::as_array)
        .map(|frames| {
            frames
                .iter()
                .map(|frame| StackFrameInfo {
                    id: int_or_zero(frame, "id"),
                    name: str_or_empty(frame, "name"),
                    source_path: frame
                        .get("source")
                        .and_then(|source| source.get("path"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    line: int_or_zero(frame, "line"),
                    column: int_or_zero(frame, "column"),
                    instruction_pointer_reference: opt_str(frame, "instructionPointerReference"),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_variables(body: &Value) -> Vec<VariableInfo> {
    body.get("variables")
        .and_then(Value::as_array)
        .map(|variables| {
            variables
                .iter()
                .map(|variable| VariableInfo {
                    name: str_or_empty(variable, "name"),
                    value: str_or_empty(variable, "value"),
                    type_name: opt_str(variable, "type"),
                    variables_reference: int_or_zero(variable, "variablesReference"),
                    memory_reference: opt_str(variable, "memoryReference"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Scope-name matching for `inspect`: case-insensitive equality, plus
/// the conventional tokens — `locals` matches any scope starting with
/// "local", `globals` any starting with "global", and `arguments` any
/// scope containing "arg".
fn scope_matches(token: &str, scope_name: &str) -> bool {
    let token = token.to_lowercase();
    let name = scope_name.to_lowercase();
    if token == name {
        return true;
    }
    match token.as_str() {
        "locals" => name.starts_with("local"),
        "globals" => name.starts_with("global"),
        "arguments" => name.contains("arg"),
        _ => false,
    }
}

impl DapProxy {
    // -----------------------------------------------------------------------
    // Threads, stacks, scopes
    // -----------------------------------------------------------------------

    pub async fn threads(&mut self) -> Result<Vec<ThreadInfo>, DebugError> {
        self.ensure_initialized()?;
        let seq = self.session.next_seq();
        let response = self.send_request(requests::threads(seq)).await?;
        let body = checked_body(response, "threads")?;
        Ok(body
            .get("threads")
            .and_then(Value::as_array)
            .map(|threads| {
                threads
                    .iter()
                    .map(|thread| ThreadInfo {
                        id: int_or_zero(thread, "id"),
                        name: str_or_empty(thread, "name"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn stack_trace(
        &mut self,
        thread_id: Option<i64>,
        start_frame: i64,
        levels: i64,
    ) -> Result<Vec<StackFrameInfo>, DebugError> {
        self.ensure_initialized()?;
        let thread_id = thread_id.or(self.session.thread_id).unwrap_or(1);
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::stack_trace(seq, thread_id, start_frame, levels))
            .await?;
        let body = checked_body(response, "stackTrace")?;
        let frames = parse_stack_frames(&body);
        if start_frame == 0 {
            self.session
                .cache_frames(frames.iter().map(|frame| frame.id).collect());
        }
        Ok(frames)
    }

    /// Full stack trace for `thread_id`, refreshing the frame-id cache.
    /// Used by `run` after every stop.
    pub(crate) async fn fetch_and_cache_stack(
        &mut self,
        thread_id: i64,
    ) -> Result<Vec<StackFrameInfo>, DebugError> {
        self.stack_trace(Some(thread_id), 0, 0).await
    }

    pub async fn scopes(&mut self, frame_index: Option<usize>) -> Result<Vec<ScopeInfo>, DebugError> {
        self.ensure_initialized()?;
        let frame_id = self
            .session
            .resolve_frame_id(frame_index)
            .ok_or(DebugError::NotInitialized)?;
        self.fetch_scopes(frame_id).await
    }

    async fn fetch_scopes(&mut self, frame_id: i64) -> Result<Vec<ScopeInfo>, DebugError> {
        let seq = self.session.next_seq();
        let response = self.send_request(requests::scopes(seq, frame_id)).await?;
        let body = checked_body(response, "scopes")?;
        Ok(body
            .get("scopes")
            .and_then(Value::as_array)
            .map(|scopes| {
                scopes
                    .iter()
                    .map(|scope| ScopeInfo {
                        name: str_or_empty(scope, "name"),
                        variables_reference: int_or_zero(scope, "variablesReference"),
                        expensive: bool_or_false(scope, "expensive"),
                        named_variables: opt_int(scope, "namedVariables"),
                        indexed_variables: opt_int(scope, "indexedVariables"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_variables(
        &mut self,
        variables_reference: i64,
    ) -> Result<Vec<VariableInfo>, DebugError> {
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::variables(seq, variables_reference))
            .await?;
        let body = checked_body(response, "variables")?;
        Ok(parse_variables(&body))
    }

    // -----------------------------------------------------------------------
    // Inspect
    // -----------------------------------------------------------------------

    /// Three-way inspection: expand a variable reference, list a named
    /// scope, or evaluate an expression (auto-expanding one level when
    /// the result is structured).
    pub async fn inspect(&mut self, request: InspectRequest) -> Result<InspectResult, DebugError> {
        self.ensure_initialized()?;

        if request.variable_ref > 0 {
            let children = self.fetch_variables(request.variable_ref).await?;
            return Ok(InspectResult {
                value: String::new(),
                type_name: None,
                variables_reference: request.variable_ref,
                children,
            });
        }

        if let Some(scope_token) = &request.scope {
            let frame_id = self
                .session
                .resolve_frame_id(request.frame_index)
                .ok_or(DebugError::NotInitialized)?;
            let scopes = self.fetch_scopes(frame_id).await?;
            let matched = scopes
                .iter()
                .find(|scope| scope_matches(scope_token, &scope.name))
                .ok_or_else(|| DebugError::InvalidResponse {
                    context: format!("no scope matching {scope_token:?}"),
                })?;
            let variables_reference = matched.variables_reference;
            let children = self.fetch_variables(variables_reference).await?;
            return Ok(InspectResult {
                value: String::new(),
                type_name: None,
                variables_reference,
                children,
            });
        }

        let expression =
            request
                .expression
                .as_deref()
                .ok_or_else(|| DebugError::InvalidResponse {
                    context: "inspect needs an expression, a scope, or a variable reference"
                        .to_string(),
                })?;
        let frame_id = self.session.resolve_frame_id(request.frame_index);
        let context = request.context.as_deref().unwrap_or("repl");

        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::evaluate(seq, expression, frame_id, context))
            .await?;
        let body = checked_body(response, "evaluate")?;

        let variables_reference = int_or_zero(&body, "variablesReference");
        let children = if variables_reference > 0 {
            // One level of expansion; anything deeper is a follow-up
            // inspect with the child's reference.
            self.fetch_variables(variables_reference)
                .await
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        Ok(InspectResult {
            value: str_or_empty(&body, "result"),
            type_name: opt_str(&body, "type"),
            variables_reference,
            children,
        })
    }

    // -----------------------------------------------------------------------
    // Memory and disassembly
    // -----------------------------------------------------------------------

    pub async fn read_memory(
        &mut self,
        memory_reference: &str,
        offset: i64,
        count: i64,
    ) -> Result<MemoryChunk, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_read_memory_request,
            "readMemory",
        )?;

        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::read_memory(seq, memory_reference, offset, count))
            .await?;

        // An unreadable address is not a missing feature.
        if !response
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true)
        {
            return Err(DebugError::InvalidAddress {
                reference: memory_reference.to_string(),
            });
        }

        let body = response.get("body").cloned().unwrap_or_else(|| json!({}));
        let data = match body.get("data").and_then(Value::as_str) {
            Some(encoded) => BASE64
                .decode(encoded)
                .map_err(|e| DebugError::InvalidResponse {
                    context: format!("readMemory data is not valid base64: {e}"),
                })?,
            None => Vec::new(),
        };

        Ok(MemoryChunk {
            address: opt_str(&body, "address").unwrap_or_else(|| memory_reference.to_string()),
            data,
            unreadable_bytes: int_or_zero(&body, "unreadableBytes"),
        })
    }

    /// Writes `data` at `memory_reference + offset`; returns the byte
    /// count the adapter reports written.
    pub async fn write_memory(
        &mut self,
        memory_reference: &str,
        offset: i64,
        allow_partial: bool,
        data: &[u8],
    ) -> Result<i64, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_write_memory_request,
            "writeMemory",
        )?;

        let encoded = BASE64.encode(data);
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::write_memory(
                seq,
                memory_reference,
                offset,
                allow_partial,
                &encoded,
            ))
            .await?;

        if !response
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true)
        {
            return Err(DebugError::InvalidAddress {
                reference: memory_reference.to_string(),
            });
        }

        let body = response.get("body").cloned().unwrap_or_else(|| json!({}));
        Ok(opt_int(&body, "bytesWritten").unwrap_or(data.len() as i64))
    }

    pub async fn disassemble(
        &mut self,
        memory_reference: &str,
        instruction_offset: i64,
        instruction_count: i64,
        resolve_symbols: bool,
    ) -> Result<Vec<DisassembledInstruction>, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_disassemble_request,
            "disassemble",
        )?;

        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::disassemble(
                seq,
                memory_reference,
                instruction_offset,
                instruction_count,
                resolve_symbols,
            ))
            .await?;
        let body = checked_body(response, "disassemble")?;

        Ok(body
            .get("instructions")
            .and_then(Value::as_array)
            .map(|instructions| {
                instructions
                    .iter()
                    .map(|instruction| DisassembledInstruction {
                        address: str_or_empty(instruction, "address"),
                        instruction: str_or_empty(instruction, "instruction"),
                        instruction_bytes: opt_str(instruction, "instructionBytes"),
                        symbol: opt_str(instruction, "symbol"),
                        line: opt_int(instruction, "line"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Sources and modules
    // -----------------------------------------------------------------------

    pub async fn source(
        &mut self,
        path: Option<&str>,
        source_reference: i64,
    ) -> Result<SourceContent, DebugError> {
        self.ensure_initialized()?;
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::source(seq, path, source_reference))
            .await?;
        let body = checked_body(response, "source")?;
        Ok(SourceContent {
            content: str_or_empty(&body, "content"),
            mime_type: opt_str(&body, "mimeType"),
        })
    }

    pub async fn loaded_sources(&mut self) -> Result<Vec<SourceInfo>, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_loaded_sources_request,
            "loadedSources",
        )?;

        let seq = self.session.next_seq();
        let response = self.send_request(requests::loaded_sources(seq)).await?;
        let body = checked_body(response, "loadedSources")?;
        Ok(body
            .get("sources")
            .and_then(Value::as_array)
            .map(|sources| {
                sources
                    .iter()
                    .map(|source| SourceInfo {
                        name: opt_str(source, "name"),
                        path: opt_str(source, "path"),
                        source_reference: int_or_zero(source, "sourceReference"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn modules(&mut self) -> Result<Vec<ModuleInfo>, DebugError> {
        self.ensure_initialized()?;
        self.require(self.session.capabilities.supports_modules_request, "modules")?;

        let seq = self.session.next_seq();
        let response = self.send_request(requests::modules(seq, 0, 0)).await?;
        let body = checked_body(response, "modules")?;
        Ok(body
            .get("modules")
            .and_then(Value::as_array)
            .map(|modules| {
                modules
                    .iter()
                    .map(|module| ModuleInfo {
                        // Module ids may be numbers or strings on the wire.
                        id: module
                            .get("id")
                            .map(|id| match id {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .unwrap_or_default(),
                        name: str_or_empty(module, "name"),
                        path: opt_str(module, "path"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Completions, targets, locations
    // -----------------------------------------------------------------------

    pub async fn completions(
        &mut self,
        text: &str,
        column: i64,
        frame_index: Option<usize>,
    ) -> Result<Vec<CompletionItem>, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_completions_request,
            "completions",
        )?;

        let frame_id = self.session.resolve_frame_id(frame_index);
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::completions(seq, text, column, frame_id))
            .await?;
        let body = checked_body(response, "completions")?;
        Ok(body
            .get("targets")
            .and_then(Value::as_array)
            .map(|targets| {
                targets
                    .iter()
                    .map(|target| CompletionItem {
                        label: str_or_empty(target, "label"),
                        text: opt_str(target, "text"),
                        item_type: opt_str(target, "type"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn step_in_targets(
        &mut self,
        frame_index: Option<usize>,
    ) -> Result<Vec<StepInTarget>, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_step_in_targets_request,
            "stepInTargets",
        )?;

        let frame_id = self
            .session
            .resolve_frame_id(frame_index)
            .ok_or(DebugError::NotInitialized)?;
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::step_in_targets(seq, frame_id))
            .await?;
        let body = checked_body(response, "stepInTargets")?;
        Ok(body
            .get("targets")
            .and_then(Value::as_array)
            .map(|targets| {
                targets
                    .iter()
                    .map(|target| StepInTarget {
                        id: int_or_zero(target, "id"),
                        label: str_or_empty(target, "label"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn breakpoint_locations(
        &mut self,
        file: &str,
        line: i64,
        end_line: Option<i64>,
    ) -> Result<Vec<BreakpointLocation>, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session
                .capabilities
                .supports_breakpoint_locations_request,
            "breakpointLocations",
        )?;

        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::breakpoint_locations(seq, file, line, end_line))
            .await?;
        let body = checked_body(response, "breakpointLocations")?;
        Ok(body
            .get("breakpoints")
            .and_then(Value::as_array)
            .map(|locations| {
                locations
                    .iter()
                    .map(|location| BreakpointLocation {
                        line: int_or_zero(location, "line"),
                        column: opt_int(location, "column"),
                        end_line: opt_int(location, "endLine"),
                        end_column: opt_int(location, "endColumn"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn goto_targets(
        &mut self,
        file: &str,
        line: i64,
    ) -> Result<Vec<GotoTarget>, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_goto_targets_request,
            "gotoTargets",
        )?;

        let seq = self.session.next_seq();
        let response = self.send_request(requests::goto_targets(seq, file, line)).await?;
        let body = checked_body(response, "gotoTargets")?;
        Ok(body
            .get("targets")
            .and_then(Value::as_array)
            .map(|targets| {
                targets
                    .iter()
                    .map(|target| GotoTarget {
                        id: int_or_zero(target, "id"),
                        label: str_or_empty(target, "label"),
                        line: int_or_zero(target, "line"),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Jumps execution to `file:line` via the first matching goto target.
    pub async fn goto(&mut self, file: &str, line: i64) -> Result<(), DebugError> {
        let targets = self.goto_targets(file, line).await?;
        let target = targets.first().ok_or_else(|| DebugError::InvalidResponse {
            context: format!("no goto target at {file}:{line}"),
        })?;
        let thread_id = self.session.thread_id.unwrap_or(1);
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::goto(seq, thread_id, target.id))
            .await?;
        checked_body(response, "goto").map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    pub async fn set_variable(
        &mut self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> Result<VariableInfo, DebugError> {
        self.ensure_initialized()?;
        self.require(self.session.capabilities.supports_set_variable, "setVariable")?;

        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::set_variable(seq, variables_reference, name, value))
            .await?;
        let body = checked_body(response, "setVariable")?;
        Ok(VariableInfo {
            name: name.to_string(),
            value: str_or_empty(&body, "value"),
            type_name: opt_str(&body, "type"),
            variables_reference: int_or_zero(&body, "variablesReference"),
            memory_reference: opt_str(&body, "memoryReference"),
        })
    }

    pub async fn set_expression(
        &mut self,
        expression: &str,
        value: &str,
        frame_index: Option<usize>,
    ) -> Result<VariableInfo, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_set_expression,
            "setExpression",
        )?;

        let frame_id = self.session.resolve_frame_id(frame_index);
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::set_expression(seq, expression, value, frame_id))
            .await?;
        let body = checked_body(response, "setExpression")?;
        Ok(VariableInfo {
            name: expression.to_string(),
            value: str_or_empty(&body, "value"),
            type_name: opt_str(&body, "type"),
            variables_reference: int_or_zero(&body, "variablesReference"),
            memory_reference: opt_str(&body, "memoryReference"),
        })
    }

    pub async fn restart_frame(&mut self, frame_index: Option<usize>) -> Result<(), DebugError> {
        self.ensure_initialized()?;
        self.require(self.session.capabilities.supports_restart_frame, "restartFrame")?;

        let frame_id = self
            .session
            .resolve_frame_id(frame_index)
            .ok_or(DebugError::NotInitialized)?;
        let seq = self.session.next_seq();
        let response = self.send_request(requests::restart_frame(seq, frame_id)).await?;
        checked_body(response, "restartFrame").map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Exceptions and data breakpoints
    // -----------------------------------------------------------------------

    pub async fn exception_info(
        &mut self,
        thread_id: Option<i64>,
    ) -> Result<ExceptionDetails, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_exception_info_request,
            "exceptionInfo",
        )?;

        let thread_id = thread_id.or(self.session.thread_id).unwrap_or(1);
        let seq = self.session.next_seq();
        let response = self.send_request(requests::exception_info(seq, thread_id)).await?;
        let body = checked_body(response, "exceptionInfo")?;
        let details = body.get("details").cloned().unwrap_or_else(|| json!({}));
        Ok(ExceptionDetails {
            exception_id: str_or_empty(&body, "exceptionId"),
            description: opt_str(&body, "description"),
            break_mode: opt_str(&body, "breakMode"),
            type_name: opt_str(&details, "typeName"),
            stack_trace: opt_str(&details, "stackTrace"),
        })
    }

    pub async fn data_breakpoint_info(
        &mut self,
        name: &str,
        frame_index: Option<usize>,
    ) -> Result<DataBreakpointInfoResult, DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_data_breakpoints,
            "data breakpoints",
        )?;

        let frame_id = self.session.resolve_frame_id(frame_index);
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::data_breakpoint_info(seq, name, frame_id))
            .await?;
        let body = checked_body(response, "dataBreakpointInfo")?;
        Ok(DataBreakpointInfoResult {
            data_id: body
                .get("dataId")
                .and_then(Value::as_str)
                .map(str::to_string),
            description: str_or_empty(&body, "description"),
            access_types: body
                .get("accessTypes")
                .and_then(Value::as_array)
                .map(|types| {
                    types
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            can_persist: bool_or_false(&body, "canPersist"),
        })
    }

    /// Replaces the adapter's data breakpoint set; entries are
    /// `(dataId, accessType)`.
    pub async fn set_data_breakpoints(
        &mut self,
        entries: &[(String, Option<String>)],
    ) -> Result<(), DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_data_breakpoints,
            "data breakpoints",
        )?;

        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::set_data_breakpoints(seq, entries))
            .await?;
        checked_body(response, "setDataBreakpoints").map(|_| ())
    }

    /// Replaces the adapter's instruction breakpoint set; entries are
    /// `(instructionReference, condition)`.
    pub async fn set_instruction_breakpoints(
        &mut self,
        entries: &[(String, Option<String>)],
    ) -> Result<(), DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_instruction_breakpoints,
            "instruction breakpoints",
        )?;

        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::set_instruction_breakpoints(seq, entries))
            .await?;
        checked_body(response, "setInstructionBreakpoints").map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Misc control
    // -----------------------------------------------------------------------

    /// Fire-and-forget cancellation hint; never aborts the pending local
    /// call.
    pub async fn cancel(
        &mut self,
        request_seq: Option<i64>,
        progress_id: Option<&str>,
    ) -> Result<(), DebugError> {
        self.ensure_initialized()?;
        self.require(self.session.capabilities.supports_cancel_request, "cancel")?;

        let seq = self.session.next_seq();
        self.send_raw(&requests::cancel(seq, request_seq, progress_id))
            .await
    }

    pub async fn terminate_threads(&mut self, thread_ids: &[i64]) -> Result<(), DebugError> {
        self.ensure_initialized()?;
        self.require(
            self.session.capabilities.supports_terminate_threads_request,
            "terminateThreads",
        )?;

        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::terminate_threads(seq, thread_ids))
            .await?;
        checked_body(response, "terminateThreads").map(|_| ())
    }

    /// Arbitrary request pass-through; returns the raw response body.
    pub async fn raw_request(
        &mut self,
        command: &str,
        arguments: Value,
    ) -> Result<Value, DebugError> {
        self.ensure_initialized()?;
        let seq = self.session.next_seq();
        let response = self.send_request(requests::raw(seq, command, arguments)).await?;
        checked_body(response, command)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_matching_rules() {
        assert!(scope_matches("Locals", "locals"));
        assert!(scope_matches("locals", "Local Variables"));
        assert!(scope_matches("globals", "Globals"));
        assert!(scope_matches("globals", "Global Scope"));
        assert!(scope_matches("arguments", "Arguments"));
        assert!(scope_matches("arguments", "Function Args"));
        assert!(scope_matches("Registers", "registers"));

        assert!(!scope_matches("locals", "Globals"));
        assert!(!scope_matches("arguments", "Locals"));
        assert!(!scope_matches("registers", "Locals"));
    }

    #[test]
    fn test_parse_stack_frames_defaults() {
        let body = serde_json::json!({
            "stackFrames": [
                {"id": 11, "name": "main", "line": 4, "column": 1,
                 "source": {"path": "/work/app.py"}},
                {"name": "no-id-frame"},
            ]
        });
        let frames = parse_stack_frames(&body);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id, 11);
        assert_eq!(frames[0].source_path.as_deref(), Some("/work/app.py"));
        assert_eq!(frames[1].id, 0);
        assert_eq!(frames[1].line, 0);
        assert!(frames[1].source_path.is_none());
    }

    #[test]
    fn test_checked_body_surfaces_adapter_failure() {
        let response = serde_json::json!({
            "type": "response", "success": false, "message": "no such frame",
        });
        let err = checked_body(response, "scopes").unwrap_err();
        match err {
            DebugError::InvalidResponse { context } => {
                assert!(context.contains("scopes"));
                assert!(context.contains("no such frame"));
            }
            other => panic!("expected InvalidResponse, got {other}"),
        }
    }

    #[test]
    fn test_checked_body_defaults_success_and_body() {
        let response = serde_json::json!({"type": "response"});
        let body = checked_body(response, "threads").unwrap();
        assert!(body.is_object());
    }

    #[test]
    fn test_parse_variables() {
        let body = serde_json::json!({
            "variables": [
                {"name": "x", "value": "42", "type": "int", "variablesReference": 0},
                {"name": "obj", "value": "Object", "variablesReference": 12,
                 "memoryReference": "0x1000"},
            ]
        });
        let variables = parse_variables(&body);
        assert_eq!(variables[0].name, "x");
        assert_eq!(variables[0].type_name.as_deref(), Some("int"));
        assert_eq!(variables[1].variables_reference, 12);
        assert_eq!(variables[1].memory_reference.as_deref(), Some("0x1000"));
    }
}
