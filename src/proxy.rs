//! The DAP proxy: transport ownership, request/response correlation, and
//! the session lifecycle driver.
//!
//! One [`DapProxy`] owns one adapter session end to end: it spawns the
//! adapter detached, runs the `initialize` / `launch` /
//! `configurationDone` handshake, correlates every request with its
//! response while classifying interleaved events and answering reverse
//! requests, re-arms the breakpoint registry into fresh configuration
//! phases, and swaps the live transport underneath the session when a
//! child-session adapter issues `startDebugging`.
//!
//! # Correlation
//!
//! The sequence counter is strictly monotonic per session (resetting to 1
//! on child-session swap and emulated restart).  `send_request` returns
//! only the response whose `request_seq` matches the stamped sequence;
//! earlier responses are stale leftovers of timed-out calls and are
//! dropped.  Events seen while waiting are classified immediately and
//! kept in an arrival-order backlog so a later `wait_for_event` still
//! observes them; reverse requests are answered inline before the next
//! response is returned.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};

use crate::config::{
    AdapterConfig, CHILD_CONFIG_WAIT_MS, RestartMethod, TransportKind, substitute_adapter_args,
    substitute_cwd,
};
use crate::dap_parser::{self, DecodeOutcome};
use crate::errors::DebugError;
use crate::events::{self, dispatch_event};
use crate::install::{self, AdapterInstaller};
use crate::requests::{self, SourceBreakpointArg};
use crate::session::{
    Capabilities, FileBreakpoint, LifecyclePhase, Notification, SavedLaunch, SessionState,
};
use crate::spawn::DetachedProcess;
use crate::transport::Transport;
use crate::types::{
    BreakpointInfo, RunAction, RunOptions, StopReason, StopState, int_or_zero, opt_int, opt_str,
};

pub struct DapProxy {
    pub(crate) config: AdapterConfig,
    installer: Option<Box<dyn AdapterInstaller>>,
    pub(crate) transport: Transport,
    pub(crate) session: SessionState,
    /// Unconsumed transport bytes; survives timeouts untouched.
    read_buf: Vec<u8>,
    /// Events classified at arrival but not yet claimed by a
    /// `wait_for_event` call, in arrival order.
    event_backlog: VecDeque<Value>,
    /// Configuration captured from a `startDebugging` reverse request,
    /// released once the child session is connected.
    pending_child_config: Option<Value>,
    /// Adapter server port, for child-session reconnects and emulated
    /// restart of TCP adapters.
    child_port: Option<u16>,
}

impl DapProxy {
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config,
            installer: None,
            transport: Transport::None,
            session: SessionState::new(),
            read_buf: Vec::new(),
            event_backlog: VecDeque::new(),
            pending_child_config: None,
            child_port: None,
        }
    }

    /// Injects the external adapter-installation subsystem; required for
    /// any non-`system` install descriptor.
    pub fn with_installer(config: AdapterConfig, installer: Box<dyn AdapterInstaller>) -> Self {
        let mut proxy = Self::new(config);
        proxy.installer = Some(installer);
        proxy
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.session.capabilities
    }

    pub fn get_pid(&self) -> Option<u32> {
        self.transport.pid()
    }

    pub fn is_initialized(&self) -> bool {
        self.session.initialized
    }

    /// Hands all pending notifications to the caller, transferring
    /// ownership of their payloads.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.session.drain_notifications()
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    pub(crate) fn ensure_initialized(&self) -> Result<(), DebugError> {
        if self.session.initialized {
            Ok(())
        } else {
            Err(DebugError::NotInitialized)
        }
    }

    pub(crate) fn require(&self, flag: bool, operation: &'static str) -> Result<(), DebugError> {
        if flag {
            Ok(())
        } else {
            Err(DebugError::NotSupported { operation })
        }
    }

    // -----------------------------------------------------------------------
    // Correlator
    // -----------------------------------------------------------------------

    /// Writes a framed message without waiting for anything.  Used for
    /// `launch`/`attach` (whose responses arrive after
    /// `configurationDone`) and for background `pause`.
    pub(crate) async fn send_raw(&mut self, msg: &Value) -> Result<(), DebugError> {
        self.transport
            .write_all(&dap_parser::encode_message(msg))
            .await
    }

    /// Sends a request and consumes inbound traffic until its response
    /// arrives.  Events are classified and backlogged; reverse requests
    /// are answered inline; stale responses are dropped.
    pub(crate) async fn send_request(&mut self, msg: Value) -> Result<Value, DebugError> {
        let expected = msg.get("seq").and_then(Value::as_i64).unwrap_or(0);
        let command = msg
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("request")
            .to_string();
        let label = format!("response to {command}");

        self.send_raw(&msg).await?;

        let deadline = Instant::now() + self.request_timeout();
        loop {
            let inbound = self.read_one_message(deadline, &label).await?;
            match inbound.get("type").and_then(Value::as_str).unwrap_or("") {
                "response" => match inbound.get("request_seq").and_then(Value::as_i64) {
                    Some(request_seq) if request_seq != expected => {
                        debug!(
                            "dropping stale response (request_seq {request_seq}, expected {expected})"
                        );
                    }
                    _ => return Ok(inbound),
                },
                "event" => {
                    dispatch_event(&mut self.session, &inbound);
                    self.event_backlog.push_back(inbound);
                }
                "request" => self.handle_reverse_request(&inbound).await?,
                other => warn!("ignoring adapter message of type {other:?}"),
            }
        }
    }

    /// Returns the named event: from the backlog if one already arrived,
    /// otherwise by reading until it does.  Non-matching events are
    /// classified and backlogged in arrival order.
    pub(crate) async fn wait_for_event(&mut self, name: &str) -> Result<Value, DebugError> {
        if let Some(pos) = self
            .event_backlog
            .iter()
            .position(|ev| ev.get("event").and_then(Value::as_str) == Some(name))
        {
            // Already classified when it arrived; just hand it over.
            return Ok(self.event_backlog.remove(pos).unwrap_or_default());
        }

        let label = format!("{name} event");
        let deadline = Instant::now() + self.request_timeout();
        loop {
            let inbound = self.read_one_message(deadline, &label).await?;
            match inbound.get("type").and_then(Value::as_str).unwrap_or("") {
                "event" => {
                    dispatch_event(&mut self.session, &inbound);
                    if inbound.get("event").and_then(Value::as_str) == Some(name) {
                        return Ok(inbound);
                    }
                    self.event_backlog.push_back(inbound);
                }
                "response" => {
                    debug!("dropping response received while waiting for {name} event");
                }
                "request" => self.handle_reverse_request(&inbound).await?,
                other => warn!("ignoring adapter message of type {other:?}"),
            }
        }
    }

    /// Reads one complete framed message, blocking at most until
    /// `deadline`.  The read buffer is left intact on timeout so a later
    /// call resumes exactly where this one stopped.
    async fn read_one_message(
        &mut self,
        deadline: Instant,
        waiting_for: &str,
    ) -> Result<Value, DebugError> {
        loop {
            match dap_parser::decode_message(&self.read_buf)? {
                DecodeOutcome::Message { body, consumed } => {
                    self.read_buf.drain(..consumed);
                    return Ok(body);
                }
                DecodeOutcome::MissingHeader | DecodeOutcome::TruncatedBody => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DebugError::Timeout {
                    waiting_for: waiting_for.to_string(),
                });
            }

            let mut chunk = [0u8; 8 * 1024];
            let read = match timeout(remaining, self.transport.read_some(&mut chunk)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(DebugError::Timeout {
                        waiting_for: waiting_for.to_string(),
                    });
                }
            };
            if read == 0 {
                return Err(DebugError::ConnectionClosed);
            }
            self.read_buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Answers a reverse request from the adapter.  Both recognized
    /// commands get an immediate success response preserving the
    /// adapter's `seq`; anything else is logged and ignored.
    async fn handle_reverse_request(&mut self, msg: &Value) -> Result<(), DebugError> {
        let command = msg.get("command").and_then(Value::as_str).unwrap_or("");
        let request_seq = msg.get("seq").and_then(Value::as_i64).unwrap_or(0);
        let arguments = msg.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match command {
            "startDebugging" => {
                if let Some(configuration) = arguments.get("configuration") {
                    self.pending_child_config = Some(configuration.clone());
                }
                self.session
                    .push_notification(events::NOTIFY_START_DEBUGGING, arguments);
                let seq = self.session.next_seq();
                self.send_raw(&requests::success_response(seq, request_seq, command))
                    .await
            }
            "runInTerminal" => {
                self.session
                    .push_notification(events::NOTIFY_RUN_IN_TERMINAL, arguments);
                let seq = self.session.next_seq();
                self.send_raw(&requests::success_response(seq, request_seq, command))
                    .await
            }
            other => {
                warn!("ignoring unrecognized reverse request {other:?}");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Launch / attach
    // -----------------------------------------------------------------------

    /// Launches `program` under a freshly spawned adapter and drives the
    /// session through `configurationDone` (and, for child-session
    /// adapters, through the child swap).
    pub async fn launch(
        &mut self,
        program: &str,
        args: &[String],
        stop_on_entry: bool,
    ) -> Result<(), DebugError> {
        install::run_dependency_checks(&self.config.dependency_checks).await?;
        let install_dir =
            install::resolve_install_dir(&self.config.install, self.installer.as_deref())?;
        let adapter_argv = self.resolved_adapter_argv(&install_dir.to_string_lossy())?;

        self.session.saved_launch = Some(SavedLaunch {
            program: program.to_string(),
            args: args.to_vec(),
            stop_on_entry,
            adapter_argv: adapter_argv.clone(),
        });

        self.session.phase = LifecyclePhase::Initializing;
        self.connect_adapter(&adapter_argv).await?;
        self.handshake_and_configure().await
    }

    /// Attaches to an already running process via a freshly spawned
    /// adapter.
    pub async fn attach(&mut self, pid: u32) -> Result<(), DebugError> {
        install::run_dependency_checks(&self.config.dependency_checks).await?;
        let install_dir =
            install::resolve_install_dir(&self.config.install, self.installer.as_deref())?;
        let adapter_argv = self.resolved_adapter_argv(&install_dir.to_string_lossy())?;

        self.session.phase = LifecyclePhase::Initializing;
        self.connect_adapter(&adapter_argv).await?;
        self.initialize_handshake().await?;

        let cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| ".".to_string());
        let extras = self
            .config
            .launch_extras
            .as_ref()
            .map(|extras| substitute_cwd(extras, &cwd));
        let seq = self.session.next_seq();
        self.send_raw(&requests::attach(seq, pid, extras.as_ref()))
            .await?;

        self.wait_for_event("initialized").await?;
        self.finish_configuration().await
    }

    /// Builds the fully substituted adapter argv (command first).
    fn resolved_adapter_argv(&self, install_dir: &str) -> Result<Vec<String>, DebugError> {
        let entry_point = self
            .config
            .install
            .entry_point()
            .map(|entry| Path::new(install_dir).join(entry).to_string_lossy().into_owned());

        let uses_entry = std::iter::once(&self.config.command)
            .chain(self.config.adapter_args.iter())
            .any(|arg| arg.contains("{entry_point}"));
        if uses_entry && entry_point.is_none() {
            return Err(DebugError::InstallFailed {
                message: "adapter argv references {entry_point} but the install descriptor names no entry point"
                    .to_string(),
            });
        }

        let mut argv = vec![self.config.command.clone()];
        argv.extend(self.config.adapter_args.iter().cloned());
        Ok(substitute_adapter_args(
            &argv,
            install_dir,
            entry_point.as_deref(),
        ))
    }

    /// Spawns the adapter and establishes the configured transport,
    /// including port detection for TCP adapters.
    async fn connect_adapter(&mut self, argv: &[String]) -> Result<(), DebugError> {
        let mut process = DetachedProcess::spawn(&argv[0], &argv[1..])?;

        match self.config.transport {
            TransportKind::Stdio => {
                self.transport = Transport::Stdio(process);
            }
            TransportKind::Tcp => {
                let port = match self.detect_port(&mut process).await {
                    Ok(port) => port,
                    Err(err) => {
                        process.drain_stderr().await;
                        return Err(err);
                    }
                };
                let addr = format!("127.0.0.1:{port}");
                let stream =
                    TcpStream::connect(&addr)
                        .await
                        .map_err(|source| DebugError::ConnectionFailed {
                            addr: addr.clone(),
                            source,
                        })?;
                self.child_port = Some(port);
                self.transport = Transport::Tcp {
                    stream,
                    parent: None,
                    child: Some(process),
                };
            }
        }
        Ok(())
    }

    /// Reads the adapter's stdout until the configured announcement
    /// prefix appears and parses the port from the last colon-separated
    /// token of the line's remainder.
    async fn detect_port(&self, process: &mut DetachedProcess) -> Result<u16, DebugError> {
        use tokio::io::AsyncReadExt;

        let Some(prefix) = self.config.port_stdout_prefix.clone() else {
            return Err(DebugError::PortParseFailed {
                line: "TCP adapter configured without a port announcement prefix".to_string(),
            });
        };
        let stdout = process.stdout.as_mut().ok_or(DebugError::ConnectionClosed)?;

        let deadline = Instant::now() + Duration::from_millis(self.config.port_detection_timeout_ms);
        let mut collected = String::new();
        loop {
            while let Some(newline) = collected.find('\n') {
                let line = collected[..newline].trim_end_matches('\r').to_string();
                collected.drain(..=newline);
                if let Some(pos) = line.find(&prefix) {
                    let remainder = &line[pos + prefix.len()..];
                    let token = remainder
                        .trim()
                        .rsplit(':')
                        .next()
                        .unwrap_or("")
                        .trim()
                        .trim_end_matches('/');
                    return token
                        .parse::<u16>()
                        .map_err(|_| DebugError::PortParseFailed { line: line.clone() });
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DebugError::Timeout {
                    waiting_for: "adapter port announcement".to_string(),
                });
            }
            let mut chunk = [0u8; 1024];
            let read = match timeout(remaining, stdout.read(&mut chunk)).await {
                Ok(Ok(read)) => read,
                Ok(Err(source)) => return Err(DebugError::ReadFailed { source }),
                Err(_) => {
                    return Err(DebugError::Timeout {
                        waiting_for: "adapter port announcement".to_string(),
                    });
                }
            };
            if read == 0 {
                return Err(DebugError::ConnectionClosed);
            }
            collected.push_str(&String::from_utf8_lossy(&chunk[..read]));
        }
    }

    /// `initialize` handshake: parses the capability record and the
    /// offered exception filters out of the response.
    async fn initialize_handshake(&mut self) -> Result<(), DebugError> {
        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::initialize(
                seq,
                &self.config.adapter_id,
                self.config.supports_start_debugging,
            ))
            .await?;

        let body = response.get("body").cloned().unwrap_or_else(|| json!({}));
        self.session.capabilities = Capabilities::from_initialize_body(&body);
        self.session.exception_filters_available = body
            .get("exceptionBreakpointFilters")
            .and_then(Value::as_array)
            .map(|filters| {
                filters
                    .iter()
                    .filter_map(|filter| serde_json::from_value(filter.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(())
    }

    /// The shared tail of launch: initialize, raw `launch`, wait for
    /// `initialized`, re-arm, `configurationDone`, then child-session
    /// handling when enabled.
    async fn handshake_and_configure(&mut self) -> Result<(), DebugError> {
        self.initialize_handshake().await?;

        let launch_msg = self.build_launch_message()?;
        self.send_raw(&launch_msg).await?;
        self.wait_for_event("initialized").await?;
        self.finish_configuration().await
    }

    /// Re-arm (parent sessions only), `configurationDone`, then the
    /// child-session window.
    async fn finish_configuration(&mut self) -> Result<(), DebugError> {
        // Child-session adapters resolve breakpoints on the child; the
        // parent never runs user code.
        if !self.config.child_sessions && !self.session.breakpoints.is_empty() {
            self.rearm_breakpoints().await;
        }

        let seq = self.session.next_seq();
        let _ = self.send_request(requests::configuration_done(seq)).await?;
        self.session.initialized = true;
        self.session.phase = LifecyclePhase::Running;

        if self.config.child_sessions {
            self.session.phase = LifecyclePhase::ChildPendingConfig;
            self.wait_for_child_config().await;
            if self.pending_child_config.is_some() {
                self.connect_child_session().await?;
            } else {
                self.session.phase = LifecyclePhase::Running;
            }
        }
        Ok(())
    }

    /// Builds the `launch` request from the saved parameters.  Child
    /// session adapters always launch the parent with
    /// `stopOnEntry=false`; stop-on-entry is realized on the child.
    fn build_launch_message(&mut self) -> Result<Value, DebugError> {
        let saved = self
            .session
            .saved_launch
            .clone()
            .ok_or(DebugError::NotInitialized)?;
        let program_dir = program_directory(&saved.program);

        let extras = self
            .config
            .launch_extras
            .as_ref()
            .map(|extras| substitute_cwd(extras, &program_dir));

        let stop_on_entry = !self.config.child_sessions && saved.stop_on_entry;
        let cwd = match self.config.transport {
            TransportKind::Stdio => None,
            TransportKind::Tcp => Some(program_dir),
        };

        let seq = self.session.next_seq();
        Ok(requests::launch(
            seq,
            &saved.program,
            &saved.args,
            stop_on_entry,
            extras.as_ref(),
            cwd.as_deref(),
        ))
    }

    // -----------------------------------------------------------------------
    // Child sessions
    // -----------------------------------------------------------------------

    /// Processes inbound traffic for up to 15 s until a `startDebugging`
    /// reverse request has been captured.  Elapsing without one simply
    /// means the adapter does not use child sessions.
    async fn wait_for_child_config(&mut self) {
        let deadline = Instant::now() + Duration::from_millis(CHILD_CONFIG_WAIT_MS);
        while self.pending_child_config.is_none() {
            let inbound = match self.read_one_message(deadline, "startDebugging").await {
                Ok(inbound) => inbound,
                Err(DebugError::Timeout { .. }) => return,
                Err(err) => {
                    debug!("child-session window ended early: {err}");
                    return;
                }
            };
            match inbound.get("type").and_then(Value::as_str).unwrap_or("") {
                "request" => {
                    if let Err(err) = self.handle_reverse_request(&inbound).await {
                        warn!("reverse request during child-session window failed: {err}");
                        return;
                    }
                }
                "event" => {
                    dispatch_event(&mut self.session, &inbound);
                    self.event_backlog.push_back(inbound);
                }
                _ => {}
            }
        }
    }

    /// Connects a second stream to the adapter's port and re-runs the
    /// handshake on it as the child session, re-arming every breakpoint
    /// into the child's configuration phase.
    async fn connect_child_session(&mut self) -> Result<(), DebugError> {
        let Some(mut configuration) = self.pending_child_config.take() else {
            return Ok(());
        };
        let port = self.child_port.ok_or_else(|| DebugError::InvalidResponse {
            context: "startDebugging received but the adapter port is unknown".to_string(),
        })?;

        let addr = format!("127.0.0.1:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| DebugError::ConnectionFailed {
                addr: addr.clone(),
                source,
            })?;
        self.transport.swap_stream(stream);

        self.session.reset_for_new_connection();
        self.read_buf.clear();
        self.event_backlog.clear();

        self.initialize_handshake().await?;
        self.enrich_child_config(&mut configuration);

        let seq = self.session.next_seq();
        self.send_raw(&requests::launch_with_config(seq, configuration))
            .await?;
        self.wait_for_event("initialized").await?;
        self.session.initialized = true;

        // This is where source-mapped breakpoints resolve against the
        // injected outFiles globs.
        self.rearm_breakpoints().await;

        let stop_on_entry = self
            .session
            .saved_launch
            .as_ref()
            .map(|saved| saved.stop_on_entry)
            .unwrap_or(false);
        if stop_on_entry {
            self.session.phase = LifecyclePhase::DeferredConfigDone;
        } else {
            let seq = self.session.next_seq();
            let _ = self.send_request(requests::configuration_done(seq)).await?;
            self.session.phase = LifecyclePhase::Running;
        }

        // Handshake noise only; subscribers see nothing until the session
        // is usable.
        self.session.notifications.clear();
        Ok(())
    }

    /// Forces `stopOnEntry` off (child adapters' persistent entry
    /// breakpoints misbehave) and, when the extras blob enables source
    /// maps, injects the workspace/outFiles fields the child needs to
    /// resolve them.
    fn enrich_child_config(&self, configuration: &mut Value) {
        let program_dir = self
            .session
            .saved_launch
            .as_ref()
            .map(|saved| program_directory(&saved.program))
            .unwrap_or_else(|| ".".to_string());

        let source_maps_enabled = self
            .config
            .launch_extras
            .as_ref()
            .and_then(|extras| extras.get("sourceMaps"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if let Value::Object(map) = configuration {
            if source_maps_enabled {
                map.insert("sourceMaps".to_string(), json!(true));
                map.insert("__workspaceFolder".to_string(), json!(program_dir));
                map.insert("cwd".to_string(), json!(program_dir));
                map.insert(
                    "outFiles".to_string(),
                    json!([format!("{program_dir}/**/*.js"), "!**/node_modules/**"]),
                );
                map.insert(
                    "resolveSourceMapLocations".to_string(),
                    json!(["**", "!**/node_modules/**"]),
                );
            }
            map.insert("stopOnEntry".to_string(), json!(false));
        }
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Drives one execution-control action and waits for the next stop.
    ///
    /// The first `run` after a deferred child configuration replays the
    /// breakpoint registry once more and sends `configurationDone`, which
    /// itself starts the program.
    pub async fn run(&mut self, action: RunAction, options: RunOptions) -> Result<StopState, DebugError> {
        self.ensure_initialized()?;

        if self.session.phase == LifecyclePhase::DeferredConfigDone {
            // Final reconciliation of anything registered during the
            // deferred window, then let configurationDone start things.
            self.rearm_breakpoints().await;
            let seq = self.session.next_seq();
            let _ = self.send_request(requests::configuration_done(seq)).await?;
            self.session.phase = LifecyclePhase::Running;
        } else {
            let thread_id = options
                .thread_id
                .or(self.session.thread_id)
                .unwrap_or(1);
            let granularity = if self.session.capabilities.supports_stepping_granularity {
                options.granularity.as_deref()
            } else {
                None
            };

            let seq = self.session.next_seq();
            let msg = match action {
                RunAction::Continue => requests::continue_(seq, thread_id),
                RunAction::StepOver => requests::next(seq, thread_id, granularity),
                RunAction::StepInto => {
                    requests::step_in(seq, thread_id, granularity, options.target_id)
                }
                RunAction::StepOut => requests::step_out(seq, thread_id, granularity),
                RunAction::Pause => requests::pause(seq, thread_id),
                RunAction::ReverseContinue => {
                    self.require(
                        self.session.capabilities.supports_step_back,
                        "reverse execution",
                    )?;
                    requests::reverse_continue(seq, thread_id)
                }
                RunAction::StepBack => {
                    self.require(
                        self.session.capabilities.supports_step_back,
                        "reverse execution",
                    )?;
                    requests::step_back(seq, thread_id, granularity)
                }
            };
            // The response carries nothing we need; the stop arrives as
            // an event.
            let _ = self.send_request(msg).await?;
        }

        let stopped = match self.wait_for_event("stopped").await {
            Ok(stopped) => stopped,
            Err(first_error) => {
                // The program may have run to completion instead.
                match self.wait_for_event("exited").await {
                    Ok(exited) => {
                        let exit_code = exited
                            .get("body")
                            .map(|body| int_or_zero(body, "exitCode"))
                            .unwrap_or(0);
                        return Ok(StopState {
                            reason: StopReason::Exited,
                            description: None,
                            thread_id: None,
                            hit_breakpoint_ids: Vec::new(),
                            exit_code: Some(exit_code),
                            frames: Vec::new(),
                            output: std::mem::take(&mut self.session.output),
                        });
                    }
                    Err(_) => return Err(first_error),
                }
            }
        };

        let body = stopped.get("body").cloned().unwrap_or_else(|| json!({}));
        let reason = StopReason::from_adapter(
            body.get("reason").and_then(Value::as_str).unwrap_or(""),
        );
        let description = opt_str(&body, "description");
        let thread_id = opt_int(&body, "threadId").or(self.session.thread_id);

        // Adapters report their own breakpoint ids; translate back to the
        // registry's local ids where possible.
        let hit_breakpoint_ids = body
            .get("hitBreakpointIds")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_i64)
                    .map(|adapter_id| {
                        self.session
                            .breakpoints
                            .local_id_for_adapter_id(adapter_id)
                            .map(i64::from)
                            .unwrap_or(adapter_id)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let frames = self
            .fetch_and_cache_stack(thread_id.unwrap_or(1))
            .await?;

        Ok(StopState {
            reason,
            description,
            thread_id,
            hit_breakpoint_ids,
            exit_code: None,
            frames,
            output: std::mem::take(&mut self.session.output),
        })
    }

    /// Fire-and-forget pause; safe to call while another task owns the
    /// read half.  The resulting `stopped` event is consumed by the next
    /// `run` or `wait_for_event` cycle.
    pub async fn send_pause(&mut self) -> Result<(), DebugError> {
        let thread_id = self.session.thread_id.unwrap_or(1);
        let seq = self.session.next_seq();
        self.send_raw(&requests::pause(seq, thread_id)).await
    }

    // -----------------------------------------------------------------------
    // Restart
    // -----------------------------------------------------------------------

    /// Restarts the debuggee: natively when the adapter supports it and
    /// the config asks for it, otherwise by tearing the adapter down and
    /// replaying the saved launch.
    pub async fn restart(&mut self) -> Result<(), DebugError> {
        self.ensure_initialized()?;

        if self.session.capabilities.supports_restart_request
            && self.config.restart_method == RestartMethod::Native
        {
            let seq = self.session.next_seq();
            let _ = self.send_request(requests::restart(seq)).await?;
            // Some adapters restart without re-entering the configuration
            // phase; tolerate a missing initialized event.
            if self.wait_for_event("initialized").await.is_err() {
                debug!("native restart produced no initialized event");
            }
            self.rearm_breakpoints().await;
            let seq = self.session.next_seq();
            let _ = self.send_request(requests::configuration_done(seq)).await?;
            self.session.phase = LifecyclePhase::Running;
            return Ok(());
        }

        // Emulated restart: disconnect (best-effort), kill, respawn,
        // replay the saved launch.
        let saved = self
            .session
            .saved_launch
            .clone()
            .ok_or(DebugError::NotInitialized)?;

        let seq = self.session.next_seq();
        if let Err(err) = self.send_request(requests::disconnect(seq, true, true)).await {
            debug!("disconnect before emulated restart failed: {err}");
        }

        self.transport.kill();
        self.read_buf.clear();
        self.event_backlog.clear();
        self.pending_child_config = None;
        self.child_port = None;
        self.session.reset_for_new_connection();

        self.session.phase = LifecyclePhase::Initializing;
        self.connect_adapter(&saved.adapter_argv).await?;
        self.handshake_and_configure().await
    }

    // -----------------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------------

    /// Registers a file-line breakpoint and, outside the deferred-config
    /// window, pushes the file's whole set to the adapter.
    pub async fn set_breakpoint(
        &mut self,
        file: &str,
        line: i64,
        condition: Option<&str>,
        hit_condition: Option<&str>,
        log_message: Option<&str>,
    ) -> Result<BreakpointInfo, DebugError> {
        // The adapter resolves symlinks internally; registering the
        // resolved path keeps our per-file sets aligned with its.
        let resolved = std::fs::canonicalize(file)
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|_| file.to_string());

        let id = self.session.breakpoints.add_file_breakpoint(
            resolved.clone(),
            line,
            condition.map(str::to_string),
            hit_condition.map(str::to_string),
            log_message.map(str::to_string),
        );

        if self.session.initialized && self.session.phase != LifecyclePhase::DeferredConfigDone {
            self.send_breakpoints_for_file(&resolved).await?;
        }

        let entry = self
            .session
            .breakpoints
            .file_entries(&resolved)
            .iter()
            .find(|bp| bp.id == id)
            .cloned()
            .unwrap_or(FileBreakpoint {
                id,
                line,
                condition: None,
                hit_condition: None,
                log_message: None,
                verified: false,
                adapter_id: None,
            });

        Ok(BreakpointInfo {
            id,
            file: Some(resolved),
            line: Some(entry.line),
            function: None,
            condition: entry.condition,
            hit_condition: entry.hit_condition,
            log_message: entry.log_message,
            verified: entry.verified,
        })
    }

    /// Removes a breakpoint by local id and re-sends the remaining set
    /// for its file (which may be empty, clearing it at the adapter).
    pub async fn remove_breakpoint(&mut self, id: u32) -> Result<(), DebugError> {
        let file = self
            .session
            .breakpoints
            .remove(id)
            .ok_or_else(|| DebugError::InvalidResponse {
                context: format!("no breakpoint with id {id}"),
            })?;

        if self.session.initialized && self.session.phase != LifecyclePhase::DeferredConfigDone {
            self.send_breakpoints_for_file(&file).await?;
        }
        Ok(())
    }

    pub fn list_breakpoints(&self) -> Vec<BreakpointInfo> {
        self.session.breakpoints.list()
    }

    pub async fn set_function_breakpoint(
        &mut self,
        name: &str,
        condition: Option<&str>,
    ) -> Result<u32, DebugError> {
        self.require(
            self.session.capabilities.supports_function_breakpoints,
            "function breakpoints",
        )?;

        let id = self
            .session
            .breakpoints
            .add_function_breakpoint(name.to_string(), condition.map(str::to_string));

        if self.session.initialized && self.session.phase != LifecyclePhase::DeferredConfigDone {
            self.send_function_breakpoints().await?;
        }
        Ok(id)
    }

    /// Stores the active exception filter set (last-set-wins) and pushes
    /// it to the adapter.  Base-protocol DAP: no capability gate.
    pub async fn set_exception_breakpoints(
        &mut self,
        filters: &[String],
    ) -> Result<(), DebugError> {
        self.session
            .breakpoints
            .set_exception_filters(filters.to_vec());

        if self.session.initialized && self.session.phase != LifecyclePhase::DeferredConfigDone {
            let seq = self.session.next_seq();
            let _ = self
                .send_request(requests::set_exception_breakpoints(seq, filters))
                .await?;
        }
        Ok(())
    }

    /// Sends one file's complete breakpoint set and records the
    /// adapter's acknowledgement (ids, verified flags, moved lines).
    async fn send_breakpoints_for_file(&mut self, file: &str) -> Result<(), DebugError> {
        let entries: Vec<FileBreakpoint> = self.session.breakpoints.file_entries(file).to_vec();
        let args: Vec<SourceBreakpointArg<'_>> = entries
            .iter()
            .map(|bp| SourceBreakpointArg {
                line: bp.line,
                condition: bp.condition.as_deref(),
                hit_condition: bp.hit_condition.as_deref(),
                log_message: bp.log_message.as_deref(),
            })
            .collect();

        let seq = self.session.next_seq();
        let response = self
            .send_request(requests::set_breakpoints(seq, file, &args))
            .await?;

        if let Some(acknowledged) = response
            .get("body")
            .and_then(|body| body.get("breakpoints"))
            .and_then(Value::as_array)
        {
            self.session
                .breakpoints
                .record_acknowledgement(file, acknowledged);
        }
        Ok(())
    }

    async fn send_function_breakpoints(&mut self) -> Result<(), DebugError> {
        let functions: Vec<(String, Option<String>)> = self
            .session
            .breakpoints
            .function_breakpoints()
            .iter()
            .map(|fb| (fb.name.clone(), fb.condition.clone()))
            .collect();
        let seq = self.session.next_seq();
        let _ = self
            .send_request(requests::set_function_breakpoints(seq, &functions))
            .await?;
        Ok(())
    }

    /// Replays the whole registry into a fresh configuration phase:
    /// one `setBreakpoints` per file, then function breakpoints, then
    /// the saved exception filters.  Best-effort by design — failures
    /// are logged and swallowed.
    pub(crate) async fn rearm_breakpoints(&mut self) {
        let files: Vec<String> = self
            .session
            .breakpoints
            .files()
            .map(|(file, _)| file.clone())
            .collect();
        for file in files {
            if let Err(err) = self.send_breakpoints_for_file(&file).await {
                warn!("re-arm of breakpoints in {file} failed: {err}");
            }
        }

        if !self.session.breakpoints.function_breakpoints().is_empty() {
            if let Err(err) = self.send_function_breakpoints().await {
                warn!("re-arm of function breakpoints failed: {err}");
            }
        }

        let filters = self.session.breakpoints.exception_filters().to_vec();
        let seq = self.session.next_seq();
        if let Err(err) = self
            .send_request(requests::set_exception_breakpoints(seq, &filters))
            .await
        {
            warn!("re-arm of exception filters failed: {err}");
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Asks the adapter to end the debuggee.  The session stays up until
    /// the adapter reports `terminated`.
    pub async fn terminate(&mut self) -> Result<(), DebugError> {
        self.ensure_initialized()?;
        let seq = self.session.next_seq();
        let msg = if self.session.capabilities.supports_terminate_request {
            requests::terminate(seq)
        } else {
            requests::disconnect(seq, false, true)
        };
        if let Err(err) = self.send_request(msg).await {
            debug!("terminate request failed: {err}");
        }
        Ok(())
    }

    /// Disconnects without ending the debuggee, then tears down.
    pub async fn detach(&mut self) -> Result<(), DebugError> {
        if !self.transport.is_none() {
            let seq = self.session.next_seq();
            let _ = self.send_raw(&requests::disconnect(seq, false, false)).await;
        }
        self.teardown();
        Ok(())
    }

    /// Full teardown: best-effort `disconnect`, a short response drain,
    /// then group kill and state reset.  Safe to call repeatedly.
    pub async fn stop(&mut self) -> Result<(), DebugError> {
        if !self.transport.is_none() {
            let seq = self.session.next_seq();
            if self
                .send_raw(&requests::disconnect(seq, false, true))
                .await
                .is_ok()
            {
                // Give the adapter a moment to acknowledge; everything it
                // says on the way out is discarded.
                let deadline = Instant::now() + Duration::from_millis(500);
                while self.read_one_message(deadline, "disconnect drain").await.is_ok() {}
            }
        }
        self.teardown();
        Ok(())
    }

    /// Alias for the driver vtable; identical to [`DapProxy::stop`].
    pub async fn deinit(&mut self) -> Result<(), DebugError> {
        self.stop().await
    }

    fn teardown(&mut self) {
        self.transport.kill();
        self.read_buf.clear();
        self.event_backlog.clear();
        self.pending_child_config = None;
        self.child_port = None;
        self.session.initialized = false;
        self.session.phase = LifecyclePhase::Terminated;
        self.session.notifications.clear();
        self.session.output.clear();
        self.session.progress.clear();
        self.session.memory_events.clear();
        self.session.invalidated.clear();
    }
}

/// Directory containing `program`, or `.` when it has none.
fn program_directory(program: &str) -> String {
    Path::new(program)
        .parent()
        .map(|dir| dir.to_string_lossy().into_owned())
        .filter(|dir| !dir.is_empty())
        .unwrap_or_else(|| ".".to_string())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallSpec;
    use crate::dap_parser::encode_message;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Builds a proxy wired to an already-connected TCP stream, as if a
    /// session were mid-flight.
    fn proxy_on_stream(stream: TcpStream, timeout_ms: u64) -> DapProxy {
        let mut config = AdapterConfig::stdio("mock", "unused", &[]);
        config.request_timeout_ms = timeout_ms;
        let mut proxy = DapProxy::new(config);
        proxy.transport = Transport::Tcp {
            stream,
            parent: None,
            child: None,
        };
        proxy.session.initialized = true;
        proxy.session.phase = LifecyclePhase::Running;
        proxy
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Value {
        loop {
            if let DecodeOutcome::Message { body, consumed } =
                dap_parser::decode_message(buf).unwrap()
            {
                buf.drain(..consumed);
                return body;
            }
            let mut chunk = [0u8; 4096];
            let read = stream.read(&mut chunk).await.unwrap();
            assert!(read > 0, "peer closed while a frame was expected");
            buf.extend_from_slice(&chunk[..read]);
        }
    }

    async fn write_frame(stream: &mut TcpStream, msg: &Value) {
        stream.write_all(&encode_message(msg)).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_request_returns_matching_response() {
        let (client, mut server) = connected_pair().await;
        let mut proxy = proxy_on_stream(client, 2_000);

        let peer = tokio::spawn(async move {
            let mut buf = Vec::new();
            let request = read_frame(&mut server, &mut buf).await;
            assert_eq!(request["command"], "threads");
            let seq = request["seq"].as_i64().unwrap();
            write_frame(
                &mut server,
                &json!({"seq": 1, "type": "response", "request_seq": seq,
                        "success": true, "command": "threads",
                        "body": {"threads": [{"id": 1, "name": "main"}]}}),
            )
            .await;
        });

        let seq = proxy.session.next_seq();
        let response = proxy.send_request(requests::threads(seq)).await.unwrap();
        assert_eq!(response["body"]["threads"][0]["id"], 1);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_responses_are_dropped() {
        let (client, mut server) = connected_pair().await;
        let mut proxy = proxy_on_stream(client, 2_000);

        let peer = tokio::spawn(async move {
            let mut buf = Vec::new();
            let request = read_frame(&mut server, &mut buf).await;
            let seq = request["seq"].as_i64().unwrap();
            // A leftover response from an abandoned earlier request
            // arrives first; only the matching one may be returned.
            write_frame(
                &mut server,
                &json!({"seq": 90, "type": "response", "request_seq": seq - 1,
                        "success": true, "command": "threads",
                        "body": {"stale": true}}),
            )
            .await;
            write_frame(
                &mut server,
                &json!({"seq": 91, "type": "response", "request_seq": seq,
                        "success": true, "command": "threads",
                        "body": {"stale": false}}),
            )
            .await;
        });

        let seq = proxy.session.next_seq();
        let response = proxy.send_request(requests::threads(seq)).await.unwrap();
        assert_eq!(response["body"]["stale"], false);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_leaves_session_usable() {
        let (client, mut server) = connected_pair().await;
        let mut proxy = proxy_on_stream(client, 50);

        // No reply: the first request must time out quickly.
        let seq_one = proxy.session.next_seq();
        let started = std::time::Instant::now();
        let err = proxy.send_request(requests::threads(seq_one)).await.unwrap_err();
        assert!(matches!(err, DebugError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(500));

        // The adapter wakes up: it answers the first request late, then
        // the second one properly.  The late response must be filtered.
        let peer = tokio::spawn(async move {
            let mut buf = Vec::new();
            let first = read_frame(&mut server, &mut buf).await;
            let stale_seq = first["seq"].as_i64().unwrap();
            let second = read_frame(&mut server, &mut buf).await;
            let live_seq = second["seq"].as_i64().unwrap();
            write_frame(
                &mut server,
                &json!({"seq": 7, "type": "response", "request_seq": stale_seq,
                        "success": true, "command": "threads", "body": {"late": true}}),
            )
            .await;
            write_frame(
                &mut server,
                &json!({"seq": 8, "type": "response", "request_seq": live_seq,
                        "success": true, "command": "threads", "body": {"late": false}}),
            )
            .await;
        });

        let seq_two = proxy.session.next_seq();
        assert_eq!(seq_two, seq_one + 1);
        let response = proxy.send_request(requests::threads(seq_two)).await.unwrap();
        assert_eq!(response["body"]["late"], false);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_events_during_request_are_classified_and_backlogged() {
        let (client, mut server) = connected_pair().await;
        let mut proxy = proxy_on_stream(client, 2_000);

        let peer = tokio::spawn(async move {
            let mut buf = Vec::new();
            let request = read_frame(&mut server, &mut buf).await;
            let seq = request["seq"].as_i64().unwrap();
            write_frame(
                &mut server,
                &json!({"seq": 2, "type": "event", "event": "output",
                        "body": {"category": "stdout", "output": "mid-request\n"}}),
            )
            .await;
            write_frame(
                &mut server,
                &json!({"seq": 3, "type": "event", "event": "stopped",
                        "body": {"reason": "breakpoint", "threadId": 4}}),
            )
            .await;
            write_frame(
                &mut server,
                &json!({"seq": 4, "type": "response", "request_seq": seq,
                        "success": true, "command": "continue", "body": {}}),
            )
            .await;
        });

        let seq = proxy.session.next_seq();
        proxy
            .send_request(requests::continue_(seq, 1))
            .await
            .unwrap();
        peer.await.unwrap();

        // Side effects happened at arrival.
        assert_eq!(proxy.session.thread_id, Some(4));
        let methods: Vec<_> = proxy
            .drain_notifications()
            .into_iter()
            .map(|n| n.method)
            .collect();
        assert_eq!(methods, ["debug/output", "debug/stopped"]);

        // The stopped event is still observable afterwards.
        let stopped = proxy.wait_for_event("stopped").await.unwrap();
        assert_eq!(stopped["body"]["reason"], "breakpoint");
    }

    #[tokio::test]
    async fn test_wait_for_event_buffers_non_matching() {
        let (client, mut server) = connected_pair().await;
        let mut proxy = proxy_on_stream(client, 2_000);

        let peer = tokio::spawn(async move {
            write_frame(
                &mut server,
                &json!({"seq": 1, "type": "event", "event": "thread",
                        "body": {"reason": "started", "threadId": 2}}),
            )
            .await;
            write_frame(
                &mut server,
                &json!({"seq": 2, "type": "event", "event": "initialized", "body": {}}),
            )
            .await;
            // Hold the connection open so the proxy never sees EOF.
            let _server = server;
            std::future::pending::<()>().await;
        });

        let initialized = proxy.wait_for_event("initialized").await.unwrap();
        assert_eq!(initialized["event"], "initialized");

        // The earlier thread event was buffered, not lost.
        let thread = proxy.wait_for_event("thread").await.unwrap();
        assert_eq!(thread["body"]["threadId"], 2);

        drop(proxy);
        peer.abort();
    }

    #[tokio::test]
    async fn test_reverse_request_answered_and_captured() {
        let (client, mut server) = connected_pair().await;
        let mut proxy = proxy_on_stream(client, 2_000);

        let peer = tokio::spawn(async move {
            let mut buf = Vec::new();
            let request = read_frame(&mut server, &mut buf).await;
            let seq = request["seq"].as_i64().unwrap();

            // Reverse request before the response.
            write_frame(
                &mut server,
                &json!({"seq": 500, "type": "request", "command": "startDebugging",
                        "arguments": {"request": "attach",
                                      "configuration": {"type": "pwa-node",
                                                        "__pendingTargetId": "t1"}}}),
            )
            .await;

            // The proxy must answer it before we release the response.
            let reverse_response = read_frame(&mut server, &mut buf).await;
            assert_eq!(reverse_response["type"], "response");
            assert_eq!(reverse_response["request_seq"], 500);
            assert_eq!(reverse_response["success"], true);
            assert_eq!(reverse_response["command"], "startDebugging");

            write_frame(
                &mut server,
                &json!({"seq": 501, "type": "response", "request_seq": seq,
                        "success": true, "command": "threads", "body": {}}),
            )
            .await;
        });

        let seq = proxy.session.next_seq();
        proxy.send_request(requests::threads(seq)).await.unwrap();
        peer.await.unwrap();

        assert_eq!(
            proxy.pending_child_config.as_ref().unwrap()["__pendingTargetId"],
            "t1"
        );
        let notifications = proxy.drain_notifications();
        assert_eq!(notifications[0].method, "debug/start_debugging");
    }

    #[tokio::test]
    async fn test_connection_closed_surfaces() {
        let (client, server) = connected_pair().await;
        let mut proxy = proxy_on_stream(client, 2_000);
        drop(server);

        let seq = proxy.session.next_seq();
        let err = proxy.send_request(requests::threads(seq)).await.unwrap_err();
        assert!(matches!(
            err,
            DebugError::ConnectionClosed | DebugError::WriteFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_run_requires_initialized_session() {
        let config = AdapterConfig::stdio("mock", "unused", &[]);
        let mut proxy = DapProxy::new(config);
        let err = proxy
            .run(RunAction::Continue, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::NotInitialized));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let config = AdapterConfig::stdio("mock", "unused", &[]);
        let mut proxy = DapProxy::new(config);
        proxy.stop().await.unwrap();
        proxy.stop().await.unwrap();
        proxy.deinit().await.unwrap();
        assert!(proxy.transport.is_none());
        assert_eq!(proxy.session.phase, LifecyclePhase::Terminated);
    }

    #[test]
    fn test_program_directory() {
        assert_eq!(program_directory("/work/app.js"), "/work");
        assert_eq!(program_directory("app.js"), ".");
    }

    #[test]
    fn test_resolved_adapter_argv_requires_entry_point_when_referenced() {
        let mut config = AdapterConfig::stdio("js", "node", &["{entry_point}", "--stdio"]);
        config.install = InstallSpec::System;
        let proxy = DapProxy::new(config);
        let err = proxy.resolved_adapter_argv("/opt").unwrap_err();
        assert!(matches!(err, DebugError::InstallFailed { .. }));
    }

    #[test]
    fn test_resolved_adapter_argv_substitutes() {
        let mut config = AdapterConfig::stdio("js", "node", &["{entry_point}", "{adapter_path}"]);
        config.install = InstallSpec::GithubRelease {
            repo: "r".to_string(),
            version: "v".to_string(),
            asset_pattern: "a".to_string(),
            extract_format: "tar.gz".to_string(),
            install_dir: "js-debug".to_string(),
            entry_point: "src/dapDebugServer.js".to_string(),
        };
        let proxy = DapProxy::new(config);
        let argv = proxy.resolved_adapter_argv("/opt/js-debug").unwrap();
        assert_eq!(
            argv,
            ["node", "/opt/js-debug/src/dapDebugServer.js", "/opt/js-debug"]
        );
    }
}
