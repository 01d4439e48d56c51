//! Mock DAP adapter for integration tests.
//!
//! Speaks real framed DAP over stdio or TCP with scripted behaviors:
//! responds to the standard handshake, verifies breakpoints, stops on
//! `continue` at the first registered breakpoint (or exits when there is
//! none), and — in child-session mode — issues a `startDebugging`
//! reverse request after the parent's `configurationDone` and accepts a
//! second connection for the child, the way vscode-js-debug does.
//!
//! Every handled request can be journaled (`--journal PATH`, one line
//! per request) so tests can assert on the exact wire order.

use std::io::Write as _;
use std::path::PathBuf;

use clap::Parser;
use log::info;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use dap_proxy::dap_parser::{DecodeOutcome, decode_message, encode_message};

#[derive(Parser, Debug)]
#[command(version, about = "Scripted DAP adapter for tests")]
struct Cli {
    /// Wire transport: "stdio" or "tcp".
    #[arg(long, default_value = "stdio")]
    transport: String,

    /// Prefix of the port announcement printed on stdout in TCP mode.
    #[arg(long, default_value = "Debug server listening at ")]
    announce_prefix: String,

    /// Issue a startDebugging reverse request after the parent's
    /// configurationDone and accept a second (child) connection.
    #[arg(long)]
    child_session: bool,

    /// Swallow the first threads request and answer it late (stale)
    /// when the next one arrives.
    #[arg(long)]
    stall_threads: bool,

    /// Append one line per handled request to this file.
    #[arg(long)]
    journal: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Adapter state
// ---------------------------------------------------------------------------

struct MockBreakpoint {
    file: String,
    line: i64,
    id: i64,
}

struct AdapterState {
    role: &'static str,
    seq: i64,
    stop_on_entry: bool,
    pending_launch: Option<(i64, &'static str)>,
    program: String,
    breakpoints: Vec<MockBreakpoint>,
    next_breakpoint_id: i64,
    stalled_threads_seq: Option<i64>,
    stall_threads: bool,
    issue_start_debugging: bool,
    /// Where the debuggee is "stopped", for stackTrace answers.
    stopped_at: Option<(String, i64)>,
    journal: Option<PathBuf>,
}

impl AdapterState {
    fn new(role: &'static str, cli: &Cli, issue_start_debugging: bool) -> Self {
        Self {
            role,
            seq: 1,
            stop_on_entry: false,
            pending_launch: None,
            program: String::new(),
            breakpoints: Vec::new(),
            next_breakpoint_id: 1,
            stalled_threads_seq: None,
            stall_threads: cli.stall_threads,
            issue_start_debugging,
            stopped_at: None,
            journal: cli.journal.clone(),
        }
    }

    fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn journal(&self, entry: &str) {
        let Some(path) = &self.journal else {
            return;
        };
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{} {entry}", self.role);
        }
    }

    fn response(&mut self, request_seq: i64, command: &str, success: bool, body: Value) -> Value {
        json!({
            "seq": self.next_seq(),
            "type": "response",
            "request_seq": request_seq,
            "success": success,
            "command": command,
            "body": body,
        })
    }

    fn event(&mut self, name: &str, body: Value) -> Value {
        json!({
            "seq": self.next_seq(),
            "type": "event",
            "event": name,
            "body": body,
        })
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<Value>> {
    loop {
        match decode_message(buf) {
            Ok(DecodeOutcome::Message { body, consumed }) => {
                buf.drain(..consumed);
                return Ok(Some(body));
            }
            Ok(_) => {}
            Err(err) => {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()));
            }
        }
        let mut chunk = [0u8; 8 * 1024];
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..read]);
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Value) -> std::io::Result<()> {
    writer.write_all(&encode_message(msg)).await?;
    writer.flush().await
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

/// Serves one DAP connection until disconnect or EOF.
async fn serve<R, W>(mut reader: R, mut writer: W, mut state: AdapterState) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    while let Some(msg) = read_frame(&mut reader, &mut buf).await? {
        if msg.get("type").and_then(Value::as_str) != Some("request") {
            // Responses to reverse requests need no action.
            continue;
        }
        if !handle_request(&mut state, &msg, &mut writer).await? {
            break;
        }
    }
    Ok(())
}

async fn handle_request<W: AsyncWrite + Unpin>(
    state: &mut AdapterState,
    msg: &Value,
    writer: &mut W,
) -> std::io::Result<bool> {
    let command = msg.get("command").and_then(Value::as_str).unwrap_or("");
    let request_seq = msg.get("seq").and_then(Value::as_i64).unwrap_or(0);
    let args = msg.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match command {
        "initialize" => {
            state.journal("initialize");
            let body = json!({
                "supportsConfigurationDoneRequest": true,
                "supportsFunctionBreakpoints": true,
                "supportsConditionalBreakpoints": true,
                "supportsHitConditionalBreakpoints": true,
                "supportsLogPoints": true,
                "supportsTerminateRequest": true,
                "supportsSteppingGranularity": true,
                "supportsRestartRequest": false,
                "exceptionBreakpointFilters": [
                    {"filter": "uncaught", "label": "Uncaught Exceptions", "default": true},
                    {"filter": "raised", "label": "Raised Exceptions", "default": false},
                ],
            });
            let response = state.response(request_seq, command, true, body);
            write_frame(writer, &response).await?;
        }
        "launch" => {
            state.stop_on_entry = args
                .get("stopOnEntry")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            state.program = args
                .get("program")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            state.journal(&format!("launch stopOnEntry={}", state.stop_on_entry));
            // The launch response is held back until configurationDone,
            // as DAP permits.
            state.pending_launch = Some((request_seq, "launch"));
            let initialized = state.event("initialized", json!({}));
            write_frame(writer, &initialized).await?;
        }
        "attach" => {
            state.journal("attach");
            state.pending_launch = Some((request_seq, "attach"));
            let initialized = state.event("initialized", json!({}));
            write_frame(writer, &initialized).await?;
        }
        "setBreakpoints" => {
            let file = args
                .get("source")
                .and_then(|source| source.get("path"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            state.breakpoints.retain(|bp| bp.file != file);

            let mut acknowledged = Vec::new();
            if let Some(entries) = args.get("breakpoints").and_then(Value::as_array) {
                for entry in entries {
                    let line = entry.get("line").and_then(Value::as_i64).unwrap_or(0);
                    let id = state.next_breakpoint_id;
                    state.next_breakpoint_id += 1;
                    state.breakpoints.push(MockBreakpoint {
                        file: file.clone(),
                        line,
                        id,
                    });
                    acknowledged.push(json!({"id": id, "verified": true, "line": line}));
                }
            }
            state.journal(&format!("setBreakpoints {file} n={}", acknowledged.len()));
            let response = state.response(
                request_seq,
                command,
                true,
                json!({"breakpoints": acknowledged}),
            );
            write_frame(writer, &response).await?;
        }
        "setFunctionBreakpoints" => {
            let count = args
                .get("breakpoints")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            state.journal(&format!("setFunctionBreakpoints n={count}"));
            let acknowledged: Vec<Value> =
                (0..count).map(|_| json!({"verified": true})).collect();
            let response = state.response(
                request_seq,
                command,
                true,
                json!({"breakpoints": acknowledged}),
            );
            write_frame(writer, &response).await?;
        }
        "setExceptionBreakpoints" => {
            let filters = args
                .get("filters")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            state.journal(&format!("setExceptionBreakpoints n={filters}"));
            let response = state.response(request_seq, command, true, json!({}));
            write_frame(writer, &response).await?;
        }
        "configurationDone" => {
            state.journal("configurationDone");
            let response = state.response(request_seq, command, true, json!({}));
            write_frame(writer, &response).await?;

            if let Some((launch_seq, launch_command)) = state.pending_launch.take() {
                let launch_response = state.response(launch_seq, launch_command, true, json!({}));
                write_frame(writer, &launch_response).await?;
            }

            if state.issue_start_debugging {
                let seq = state.next_seq();
                state.journal("> startDebugging");
                let reverse = json!({
                    "seq": seq,
                    "type": "request",
                    "command": "startDebugging",
                    "arguments": {
                        "request": "attach",
                        "configuration": {
                            "type": "pwa-node",
                            "__pendingTargetId": "target-1",
                        },
                    },
                });
                write_frame(writer, &reverse).await?;
            } else if state.stop_on_entry {
                state.stopped_at = Some((state.program.clone(), 1));
                let stopped = state.event(
                    "stopped",
                    json!({"reason": "entry", "threadId": 1, "allThreadsStopped": true}),
                );
                write_frame(writer, &stopped).await?;
            } else if let Some(first) = state.breakpoints.first() {
                // A child session starts running at configurationDone and
                // immediately lands on the first breakpoint.
                if state.role == "child" {
                    let (file, line, id) = (first.file.clone(), first.line, first.id);
                    state.stopped_at = Some((file, line));
                    let stopped = state.event(
                        "stopped",
                        json!({"reason": "breakpoint", "threadId": 1,
                               "hitBreakpointIds": [id], "allThreadsStopped": true}),
                    );
                    write_frame(writer, &stopped).await?;
                }
            }
        }
        "continue" => {
            state.journal("continue");
            let response = state.response(request_seq, command, true, json!({"allThreadsContinued": true}));
            write_frame(writer, &response).await?;

            if let Some(first) = state.breakpoints.first() {
                let (file, line, id) = (first.file.clone(), first.line, first.id);
                state.stopped_at = Some((file, line));
                let tick_one = state.event(
                    "output",
                    json!({"category": "stdout", "output": "tick 1\n"}),
                );
                write_frame(writer, &tick_one).await?;
                let tick_two = state.event(
                    "output",
                    json!({"category": "stdout", "output": "tick 2\n"}),
                );
                write_frame(writer, &tick_two).await?;
                let stopped = state.event(
                    "stopped",
                    json!({"reason": "breakpoint", "threadId": 1,
                           "hitBreakpointIds": [id], "allThreadsStopped": true}),
                );
                write_frame(writer, &stopped).await?;
            } else {
                let farewell = state.event(
                    "output",
                    json!({"category": "stdout", "output": "done\n"}),
                );
                write_frame(writer, &farewell).await?;
                let exited = state.event("exited", json!({"exitCode": 0}));
                write_frame(writer, &exited).await?;
                let terminated = state.event("terminated", json!({}));
                write_frame(writer, &terminated).await?;
            }
        }
        "next" | "stepIn" | "stepOut" | "stepBack" | "reverseContinue" => {
            state.journal(command);
            let response = state.response(request_seq, command, true, json!({}));
            write_frame(writer, &response).await?;
            if let Some((_, line)) = state.stopped_at.as_mut() {
                *line += 1;
            }
            let stopped = state.event(
                "stopped",
                json!({"reason": "step", "threadId": 1, "allThreadsStopped": true}),
            );
            write_frame(writer, &stopped).await?;
        }
        "pause" => {
            state.journal("pause");
            let response = state.response(request_seq, command, true, json!({}));
            write_frame(writer, &response).await?;
            let stopped = state.event(
                "stopped",
                json!({"reason": "pause", "threadId": 1, "allThreadsStopped": true}),
            );
            write_frame(writer, &stopped).await?;
        }
        "threads" => {
            if state.stall_threads && state.stalled_threads_seq.is_none() {
                // Swallow this one; answer it (stale) on the next threads
                // request.
                state.journal("threads (stalled)");
                state.stalled_threads_seq = Some(request_seq);
                return Ok(true);
            }
            state.journal("threads");
            if let Some(stale_seq) = state.stalled_threads_seq.take() {
                let stale = state.response(stale_seq, command, true, json!({"stale": true}));
                write_frame(writer, &stale).await?;
            }
            let response = state.response(
                request_seq,
                command,
                true,
                json!({"threads": [{"id": 1, "name": "main"}]}),
            );
            write_frame(writer, &response).await?;
        }
        "stackTrace" => {
            state.journal("stackTrace");
            let (file, line) = state
                .stopped_at
                .clone()
                .unwrap_or_else(|| (state.program.clone(), 1));
            let body = json!({
                "stackFrames": [
                    {"id": 1001, "name": "main", "line": line, "column": 1,
                     "source": {"path": file}},
                    {"id": 1002, "name": "__start", "line": 1, "column": 1,
                     "source": {"path": file}},
                ],
                "totalFrames": 2,
            });
            let response = state.response(request_seq, command, true, body);
            write_frame(writer, &response).await?;
        }
        "scopes" => {
            state.journal("scopes");
            let body = json!({
                "scopes": [
                    {"name": "Locals", "variablesReference": 100, "expensive": false},
                    {"name": "Globals", "variablesReference": 200, "expensive": false},
                ],
            });
            let response = state.response(request_seq, command, true, body);
            write_frame(writer, &response).await?;
        }
        "variables" => {
            state.journal("variables");
            let reference = args
                .get("variablesReference")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let variables = match reference {
                100 => json!([
                    {"name": "x", "value": "42", "type": "int", "variablesReference": 0},
                    {"name": "obj", "value": "Object", "type": "object",
                     "variablesReference": 101},
                ]),
                101 => json!([
                    {"name": "field", "value": "7", "type": "int", "variablesReference": 0},
                ]),
                200 => json!([
                    {"name": "g", "value": "global", "type": "str", "variablesReference": 0},
                ]),
                _ => json!([]),
            };
            let response =
                state.response(request_seq, command, true, json!({"variables": variables}));
            write_frame(writer, &response).await?;
        }
        "evaluate" => {
            state.journal("evaluate");
            let expression = args.get("expression").and_then(Value::as_str).unwrap_or("");
            let body = if expression == "obj" {
                json!({"result": "Object", "type": "object", "variablesReference": 101})
            } else {
                json!({"result": "42", "type": "int", "variablesReference": 0})
            };
            let response = state.response(request_seq, command, true, body);
            write_frame(writer, &response).await?;
        }
        "restart" => {
            state.journal("restart");
            let response = state.response(request_seq, command, false, json!({}));
            write_frame(writer, &response).await?;
        }
        "terminate" => {
            state.journal("terminate");
            let response = state.response(request_seq, command, true, json!({}));
            write_frame(writer, &response).await?;
            let terminated = state.event("terminated", json!({}));
            write_frame(writer, &terminated).await?;
        }
        "disconnect" => {
            state.journal("disconnect");
            let response = state.response(request_seq, command, true, json!({}));
            write_frame(writer, &response).await?;
            return Ok(false);
        }
        other => {
            state.journal(other);
            let response = state.response(request_seq, other, true, json!({}));
            write_frame(writer, &response).await?;
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    flexi_logger::init();
    let cli = Cli::parse();

    match cli.transport.as_str() {
        "stdio" => {
            let state = AdapterState::new("adapter", &cli, false);
            serve(tokio::io::stdin(), tokio::io::stdout(), state).await
        }
        "tcp" => {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let port = listener.local_addr()?.port();
            // The proxy parses the port from the last colon-separated
            // token of this line.
            println!("{}127.0.0.1:{port}", cli.announce_prefix);
            std::io::stdout().flush()?;

            let (first, _) = listener.accept().await?;
            let (first_read, first_write) = first.into_split();

            if cli.child_session {
                info!("parent connected; waiting for child");
                let parent_state = AdapterState::new("parent", &cli, true);
                let parent_task =
                    tokio::spawn(serve(first_read, first_write, parent_state));

                let (second, _) = listener.accept().await?;
                let (second_read, second_write) = second.into_split();
                let child_state = AdapterState::new("child", &cli, false);
                serve(second_read, second_write, child_state).await?;

                parent_task.abort();
                Ok(())
            } else {
                let state = AdapterState::new("adapter", &cli, false);
                serve(first_read, first_write, state).await
            }
        }
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unknown transport {other:?}"),
        )),
    }
}
