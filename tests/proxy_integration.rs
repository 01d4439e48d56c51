//! End-to-end tests against the scripted `mock-adapter` binary.
//!
//! Each test builds an [`AdapterConfig`] pointing at the compiled mock
//! adapter (stdio or TCP), drives a real launch through the proxy, and
//! asserts on the driver-visible results — stop reasons, breakpoint ids,
//! notification order — or, for the child-session scenario, on the exact
//! request order the adapter journaled.

use serde_json::json;

use dap_proxy::{
    AdapterConfig, DapProxy, DebugError, InspectRequest, RunAction, RunOptions, StopReason,
    TransportKind,
};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn mock_adapter_bin() -> &'static str {
    env!("CARGO_BIN_EXE_mock-adapter")
}

fn stdio_config() -> AdapterConfig {
    AdapterConfig::stdio("mock", mock_adapter_bin(), &["--transport", "stdio"])
}

fn tcp_config(extra_args: &[&str]) -> AdapterConfig {
    let mut args = vec!["--transport", "tcp"];
    args.extend_from_slice(extra_args);
    let mut config = AdapterConfig::stdio("mock", mock_adapter_bin(), &args);
    config.transport = TransportKind::Tcp;
    config.port_stdout_prefix = Some("Debug server listening at ".to_string());
    config
}

// ---------------------------------------------------------------------------
// Scenario: launch + breakpoint hit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_launch_set_breakpoint_and_continue() {
    let mut proxy = DapProxy::new(stdio_config());
    proxy.launch("/work/app.py", &[], false).await.unwrap();
    assert!(proxy.is_initialized());
    assert!(proxy.capabilities().supports_configuration_done_request);
    assert!(proxy.get_pid().is_some());

    let bp = proxy
        .set_breakpoint("/work/app.py", 4, None, None, None)
        .await
        .unwrap();
    assert_eq!(bp.id, 1);
    assert!(bp.verified);

    let stop = proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(stop.reason, StopReason::Breakpoint);
    assert!(stop.hit_breakpoint_ids.contains(&1));
    assert_eq!(stop.thread_id, Some(1));
    assert_eq!(stop.frames[0].line, 4);
    assert_eq!(stop.frames[0].source_path.as_deref(), Some("/work/app.py"));
    // Output captured between stops rides along with the stop state.
    assert_eq!(stop.output.len(), 2);
    assert_eq!(stop.output[0].text, "tick 1\n");

    proxy.stop().await.unwrap();
}

#[tokio::test]
async fn test_notification_drain_order() {
    let mut proxy = DapProxy::new(stdio_config());
    proxy.launch("/work/app.py", &[], false).await.unwrap();
    proxy
        .set_breakpoint("/work/app.py", 4, None, None, None)
        .await
        .unwrap();
    proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();

    let methods: Vec<String> = proxy
        .drain_notifications()
        .into_iter()
        .map(|n| n.method)
        .collect();
    assert_eq!(methods, ["debug/output", "debug/output", "debug/stopped"]);
    // Drained means drained.
    assert!(proxy.drain_notifications().is_empty());

    proxy.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: restart without native support
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_emulated_restart_rearms_breakpoints() {
    let mut proxy = DapProxy::new(stdio_config());
    proxy.launch("/work/app.py", &[], false).await.unwrap();
    proxy
        .set_breakpoint("/work/app.py", 4, None, None, None)
        .await
        .unwrap();

    let first = proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(first.reason, StopReason::Breakpoint);

    // The mock advertises supportsRestartRequest=false, so this goes
    // through disconnect/kill/respawn with the registry replayed.
    proxy.restart().await.unwrap();

    let second = proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(second.reason, StopReason::Breakpoint);
    assert!(second.hit_breakpoint_ids.contains(&1));
    assert_eq!(second.frames[0].line, 4);

    proxy.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: timeout survival + stale-response filter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_timeout_survival_and_stale_filter() {
    let mut config = stdio_config();
    config.adapter_args.push("--stall-threads".to_string());
    // Short enough to observe the timeout quickly, long enough that the
    // launch handshake is not racing the adapter's cold start.
    config.request_timeout_ms = 300;

    let mut proxy = DapProxy::new(config);
    proxy.launch("/work/app.py", &[], false).await.unwrap();

    // The adapter swallows the first threads request entirely.
    let started = std::time::Instant::now();
    let err = proxy.threads().await.unwrap_err();
    assert!(matches!(err, DebugError::Timeout { .. }));
    assert!(started.elapsed() < std::time::Duration::from_millis(1500));

    // On the retry the adapter first flushes the late answer to the
    // abandoned request; the stale-seq filter must drop it.
    let threads = proxy.threads().await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].id, 1);
    assert_eq!(threads[0].name, "main");

    proxy.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: program runs to completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_translates_exit() {
    let mut config = stdio_config();
    // Without breakpoints the mock exits instead of stopping; keep the
    // stopped-event wait short so the exited fallback kicks in quickly.
    config.request_timeout_ms = 300;

    let mut proxy = DapProxy::new(config);
    proxy.launch("/work/app.py", &[], false).await.unwrap();

    let stop = proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(stop.reason, StopReason::Exited);
    assert_eq!(stop.exit_code, Some(0));
    assert!(stop.frames.is_empty());
    assert_eq!(stop.output.len(), 1);

    // The terminated event cleared the session.
    assert!(!proxy.is_initialized());

    proxy.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: TCP adapter with port detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_tcp_launch_with_port_detection() {
    let mut proxy = DapProxy::new(tcp_config(&[]));
    proxy.launch("/work/app.js", &[], false).await.unwrap();

    proxy
        .set_breakpoint("/work/app.js", 9, None, None, None)
        .await
        .unwrap();
    let stop = proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(stop.reason, StopReason::Breakpoint);
    assert_eq!(stop.frames[0].line, 9);

    proxy.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: child-session swap with deferred configurationDone
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_child_session_deferred_configuration_done() {
    let journal_dir = tempfile::tempdir().unwrap();
    let journal = journal_dir.path().join("wire.journal");
    let journal_arg = journal.to_string_lossy().into_owned();

    let mut config = tcp_config(&["--child-session", "--journal", &journal_arg]);
    config.child_sessions = true;
    config.supports_start_debugging = true;
    config.launch_extras = Some(json!({"sourceMaps": true}));

    let mut proxy = DapProxy::new(config);

    // Registered before launch: must reach the adapter only through the
    // child's configuration phase.
    proxy
        .set_breakpoint("/work/app.js", 4, None, None, None)
        .await
        .unwrap();

    proxy.launch("/work/app.js", &[], true).await.unwrap();

    let after_launch = std::fs::read_to_string(&journal).unwrap();
    let lines: Vec<&str> = after_launch.lines().collect();

    // Parent handshake first, stopOnEntry forced off on the parent.
    let parent_launch = lines
        .iter()
        .position(|l| *l == "parent launch stopOnEntry=false")
        .expect("parent launch missing");
    let parent_config_done = lines
        .iter()
        .position(|l| *l == "parent configurationDone")
        .expect("parent configurationDone missing");
    let start_debugging = lines
        .iter()
        .position(|l| *l == "parent > startDebugging")
        .expect("startDebugging missing");
    assert!(parent_launch < parent_config_done);
    assert!(parent_config_done < start_debugging);

    // Child handshake after the swap, stopOnEntry forced off again, and
    // the registry re-armed into the child's configuration phase.
    let child_launch = lines
        .iter()
        .position(|l| *l == "child launch stopOnEntry=false")
        .expect("child launch missing");
    let child_breakpoints = lines
        .iter()
        .position(|l| l.starts_with("child setBreakpoints /work/app.js n=1"))
        .expect("child setBreakpoints missing");
    assert!(start_debugging < child_launch);
    assert!(child_launch < child_breakpoints);

    // Deferred: stop-on-entry sessions hold configurationDone back until
    // the first run.
    assert!(!after_launch.contains("child configurationDone"));

    // First run: one more re-arm, then configurationDone starts the
    // program, which lands on the breakpoint.
    let stop = proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(stop.reason, StopReason::Breakpoint);
    assert_eq!(stop.frames[0].line, 4);

    let after_run = std::fs::read_to_string(&journal).unwrap();
    let lines: Vec<&str> = after_run.lines().collect();
    let final_rearm = lines
        .iter()
        .rposition(|l| l.starts_with("child setBreakpoints /work/app.js n=1"))
        .expect("final re-arm missing");
    let child_config_done = lines
        .iter()
        .position(|l| *l == "child configurationDone")
        .expect("child configurationDone missing");
    assert!(final_rearm > child_breakpoints, "expected a second re-arm");
    assert!(final_rearm < child_config_done);

    proxy.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Inspection operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_inspect_paths() {
    let mut proxy = DapProxy::new(stdio_config());
    proxy.launch("/work/app.py", &[], false).await.unwrap();
    proxy
        .set_breakpoint("/work/app.py", 4, None, None, None)
        .await
        .unwrap();
    proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();

    // Expression evaluation.
    let result = proxy
        .inspect(InspectRequest {
            expression: Some("x".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.value, "42");
    assert_eq!(result.type_name.as_deref(), Some("int"));
    assert!(result.children.is_empty());

    // Structured results auto-expand one level.
    let result = proxy
        .inspect(InspectRequest {
            expression: Some("obj".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.variables_reference, 101);
    assert_eq!(result.children.len(), 1);
    assert_eq!(result.children[0].name, "field");

    // Scope listing via the conventional token.
    let result = proxy
        .inspect(InspectRequest {
            scope: Some("locals".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let names: Vec<&str> = result.children.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, ["x", "obj"]);

    // Direct variable expansion.
    let result = proxy
        .inspect(InspectRequest {
            variable_ref: 101,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.children[0].value, "7");

    proxy.stop().await.unwrap();
}

#[tokio::test]
async fn test_scopes_threads_and_stack() {
    let mut proxy = DapProxy::new(stdio_config());
    proxy.launch("/work/app.py", &[], false).await.unwrap();
    proxy
        .set_breakpoint("/work/app.py", 4, None, None, None)
        .await
        .unwrap();
    proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();

    let threads = proxy.threads().await.unwrap();
    assert_eq!(threads[0].name, "main");

    let scopes = proxy.scopes(None).await.unwrap();
    assert_eq!(scopes.len(), 2);
    assert_eq!(scopes[0].name, "Locals");
    assert_eq!(scopes[0].variables_reference, 100);

    let frames = proxy.stack_trace(None, 0, 0).await.unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].name, "main");
    assert_eq!(frames[1].name, "__start");

    let stepped = proxy
        .run(RunAction::StepOver, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(stepped.reason, StopReason::Step);
    assert_eq!(stepped.frames[0].line, 5);

    proxy.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Capability gating and misc surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_capability_gates_refuse_without_wire_traffic() {
    let mut proxy = DapProxy::new(stdio_config());
    proxy.launch("/work/app.py", &[], false).await.unwrap();

    // The mock does not advertise memory, modules, or reverse execution.
    assert!(matches!(
        proxy.read_memory("0x1000", 0, 16).await.unwrap_err(),
        DebugError::NotSupported { .. }
    ));
    assert!(matches!(
        proxy.modules().await.unwrap_err(),
        DebugError::NotSupported { .. }
    ));
    assert!(matches!(
        proxy
            .run(RunAction::StepBack, RunOptions::default())
            .await
            .unwrap_err(),
        DebugError::NotSupported { .. }
    ));

    // Function breakpoints and exception filters are advertised.
    let id = proxy.set_function_breakpoint("main", None).await.unwrap();
    proxy
        .set_exception_breakpoints(&["uncaught".to_string()])
        .await
        .unwrap();

    let listed = proxy.list_breakpoints();
    assert!(listed.iter().any(|bp| bp.id == id && bp.function.as_deref() == Some("main")));

    proxy.stop().await.unwrap();
}

#[tokio::test]
async fn test_operations_before_launch_are_refused() {
    let mut proxy = DapProxy::new(stdio_config());
    assert!(matches!(
        proxy.threads().await.unwrap_err(),
        DebugError::NotInitialized
    ));
    assert!(matches!(
        proxy
            .run(RunAction::Continue, RunOptions::default())
            .await
            .unwrap_err(),
        DebugError::NotInitialized
    ));
}

#[tokio::test]
async fn test_raw_request_passthrough() {
    let mut proxy = DapProxy::new(stdio_config());
    proxy.launch("/work/app.py", &[], false).await.unwrap();

    let body = proxy
        .raw_request("vendor/customProbe", json!({"probe": true}))
        .await
        .unwrap();
    assert!(body.is_object());

    proxy.stop().await.unwrap();
}

#[tokio::test]
async fn test_remove_breakpoint_resends_remaining_set() {
    let mut proxy = DapProxy::new(stdio_config());
    proxy.launch("/work/app.py", &[], false).await.unwrap();

    let first = proxy
        .set_breakpoint("/work/app.py", 4, None, None, None)
        .await
        .unwrap();
    let second = proxy
        .set_breakpoint("/work/app.py", 9, None, None, None)
        .await
        .unwrap();
    assert_ne!(first.id, second.id);

    proxy.remove_breakpoint(first.id).await.unwrap();
    let listed = proxy.list_breakpoints();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, second.id);

    // The remaining breakpoint is what the adapter stops on now.
    let stop = proxy
        .run(RunAction::Continue, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(stop.frames[0].line, 9);

    proxy.stop().await.unwrap();
}

#[tokio::test]
async fn test_dependency_check_failure_blocks_launch() {
    let mut config = stdio_config();
    config.dependency_checks = vec![dap_proxy::DependencyCheck {
        command: "false".to_string(),
        args: vec![],
        error_message: "interpreter missing".to_string(),
    }];

    let mut proxy = DapProxy::new(config);
    let err = proxy.launch("/work/app.py", &[], false).await.unwrap_err();
    assert!(matches!(
        err,
        DebugError::DependencyCheckFailed { message } if message == "interpreter missing"
    ));
    assert!(!proxy.is_initialized());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut proxy = DapProxy::new(stdio_config());
    proxy.launch("/work/app.py", &[], false).await.unwrap();
    proxy.stop().await.unwrap();
    proxy.stop().await.unwrap();
    proxy.deinit().await.unwrap();
    assert!(!proxy.is_initialized());
    assert_eq!(proxy.get_pid(), None);
}
