//! Adapter configuration.
//!
//! An [`AdapterConfig`] describes everything the proxy needs to run one
//! debug adapter: the command and argv template, the transport kind, how
//! to detect a TCP adapter's port, launch-argument extras, restart
//! strategy, and the install/dependency descriptors the external
//! installer subsystem consumes.
//!
//! The record arrives from the embedding tool as data (usually JSON), so
//! every type here is serde-derived.  Two placeholders are recognized in
//! `adapter_args`:
//!
//! - `{adapter_path}` — the resolved install directory.
//! - `{entry_point}` — the install descriptor's entry file, rebased under
//!   the resolved install directory.
//!
//! The launch extras blob additionally supports `{cwd}` substitution,
//! applied before the blob is merged into `launch.arguments`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default bound on every response/event wait, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default bound on TCP port-announcement detection, in milliseconds.
pub const DEFAULT_PORT_DETECTION_TIMEOUT_MS: u64 = 10_000;

/// How long a child-session adapter gets to issue `startDebugging` after
/// the parent's `configurationDone`, in milliseconds.  Elapsing without a
/// reverse request is not an error.
pub const CHILD_CONFIG_WAIT_MS: u64 = 15_000;

// ---------------------------------------------------------------------------
// AdapterConfig
// ---------------------------------------------------------------------------

/// Everything needed to spawn and drive one debug adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Adapter identifier, forwarded as `adapterID` in `initialize`.
    pub adapter_id: String,

    /// Adapter command: absolute, or resolved through `PATH` by the OS.
    pub command: String,

    /// Argv template; may contain `{adapter_path}` and `{entry_point}`.
    #[serde(default)]
    pub adapter_args: Vec<String>,

    pub transport: TransportKind,

    /// Stdout prefix announcing the listen port of a TCP adapter, e.g.
    /// `"Debug server listening at "`.  The port is parsed from the last
    /// colon-separated token of the line's remainder.
    #[serde(default)]
    pub port_stdout_prefix: Option<String>,

    #[serde(default = "default_port_detection_timeout_ms")]
    pub port_detection_timeout_ms: u64,

    /// Raw JSON merged field-wise into `launch.arguments`.
    #[serde(default)]
    pub launch_extras: Option<Value>,

    /// Advertise `supportsStartDebuggingRequest` to the adapter.
    #[serde(default)]
    pub supports_start_debugging: bool,

    /// Whether this adapter spawns child sessions via `startDebugging`
    /// (the vscode-js-debug pattern).
    #[serde(default)]
    pub child_sessions: bool,

    #[serde(default)]
    pub restart_method: RestartMethod,

    #[serde(default)]
    pub install: InstallSpec,

    /// Commands run before launch; the first failure aborts with its
    /// configured message.
    #[serde(default)]
    pub dependency_checks: Vec<DependencyCheck>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_port_detection_timeout_ms() -> u64 {
    DEFAULT_PORT_DETECTION_TIMEOUT_MS
}

impl AdapterConfig {
    /// Minimal config for a stdio adapter invoked as `command args...`.
    pub fn stdio(adapter_id: &str, command: &str, args: &[&str]) -> Self {
        Self {
            adapter_id: adapter_id.to_string(),
            command: command.to_string(),
            adapter_args: args.iter().map(|a| a.to_string()).collect(),
            transport: TransportKind::Stdio,
            port_stdout_prefix: None,
            port_detection_timeout_ms: DEFAULT_PORT_DETECTION_TIMEOUT_MS,
            launch_extras: None,
            supports_start_debugging: false,
            child_sessions: false,
            restart_method: RestartMethod::default(),
            install: InstallSpec::default(),
            dependency_checks: Vec::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport / restart selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// The adapter speaks DAP on its own stdin/stdout.
    Stdio,
    /// The adapter announces a listen port on stdout and speaks DAP over
    /// a TCP connection to `127.0.0.1:port`.
    Tcp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMethod {
    /// Use the adapter's `restart` request when it advertises
    /// `supportsRestartRequest`.
    Native,
    /// Disconnect, kill, respawn and replay the saved launch.
    #[default]
    Emulated,
}

// ---------------------------------------------------------------------------
// Install and dependency descriptors
// ---------------------------------------------------------------------------

/// Where the adapter's code comes from.  Opaque to the proxy beyond the
/// install directory the installer returns and the entry point used for
/// `{entry_point}` substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum InstallSpec {
    /// The adapter command is already on the system; no install step.
    #[default]
    System,
    /// A release tarball fetched by the external installer.
    GithubRelease {
        repo: String,
        version: String,
        asset_pattern: String,
        extract_format: String,
        install_dir: String,
        entry_point: String,
    },
    /// An embedded source file compiled by the external installer.
    CompileEmbedded {
        source_name: String,
        install_dir: String,
        entry_point: String,
    },
}

impl InstallSpec {
    /// The entry path to rebase under the resolved install directory, if
    /// this descriptor names one.
    pub fn entry_point(&self) -> Option<&str> {
        match self {
            Self::System => None,
            Self::GithubRelease { entry_point, .. }
            | Self::CompileEmbedded { entry_point, .. } => Some(entry_point),
        }
    }
}

/// One pre-launch dependency check: run `command args...` with all output
/// silenced; a non-zero exit (or spawn failure) surfaces `error_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub error_message: String,
}

// ---------------------------------------------------------------------------
// Placeholder substitution
// ---------------------------------------------------------------------------

/// Substitutes `{adapter_path}` and `{entry_point}` throughout an argv
/// template.  `entry_point` is the already-rebased full path.
pub fn substitute_adapter_args(
    args: &[String],
    adapter_path: &str,
    entry_point: Option<&str>,
) -> Vec<String> {
    args.iter()
        .map(|arg| {
            let mut out = arg.replace("{adapter_path}", adapter_path);
            if let Some(entry) = entry_point {
                out = out.replace("{entry_point}", entry);
            }
            out
        })
        .collect()
}

/// Performs `{cwd}` substitution inside every string of an extras blob.
pub fn substitute_cwd(extras: &Value, cwd: &str) -> Value {
    match extras {
        Value::String(s) => Value::String(s.replace("{cwd}", cwd)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_cwd(v, cwd)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_cwd(v, cwd)))
                .collect(),
        ),
        other => other.clone(),
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
    fn test_substitute_adapter_args() {
        let args = vec![
            "{entry_point}".to_string(),
            "--server={adapter_path}".to_string(),
            "--verbose".to_string(),
        ];
        let out = substitute_adapter_args(&args, "/opt/adapter", Some("/opt/adapter/out/cli.js"));
        assert_eq!(
            out,
            vec!["/opt/adapter/out/cli.js", "--server=/opt/adapter", "--verbose"]
        );
    }

    #[test]
    fn test_substitute_adapter_args_without_entry() {
        let args = vec!["{entry_point}".to_string()];
        let out = substitute_adapter_args(&args, "/opt/adapter", None);
        // Without an entry point the placeholder is left alone; the caller
        // decides whether that is an error.
        assert_eq!(out, vec!["{entry_point}"]);
    }

    #[test]
    fn test_substitute_cwd_recurses() {
        let extras = json!({
            "cwd": "{cwd}",
            "outFiles": ["{cwd}/**/*.js"],
            "nested": { "path": "{cwd}/dist" },
            "port": 8123,
        });
        let out = substitute_cwd(&extras, "/home/me/project");
        assert_eq!(out["cwd"], "/home/me/project");
        assert_eq!(out["outFiles"][0], "/home/me/project/**/*.js");
        assert_eq!(out["nested"]["path"], "/home/me/project/dist");
        assert_eq!(out["port"], 8123);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let cfg: AdapterConfig = serde_json::from_value(json!({
            "adapter_id": "debugpy",
            "command": "python3",
            "adapter_args": ["-m", "debugpy.adapter"],
            "transport": "stdio",
        }))
        .unwrap();
        assert_eq!(cfg.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(cfg.restart_method, RestartMethod::Emulated);
        assert_eq!(cfg.install, InstallSpec::System);
        assert!(!cfg.child_sessions);
        assert!(cfg.dependency_checks.is_empty());
    }

    #[test]
    fn test_install_spec_entry_point() {
        assert_eq!(InstallSpec::System.entry_point(), None);

        let spec: InstallSpec = serde_json::from_value(json!({
            "kind": "github_release",
            "repo": "microsoft/vscode-js-debug",
            "version": "v1.97.1",
            "asset_pattern": "js-debug-dap-*.tar.gz",
            "extract_format": "tar.gz",
            "install_dir": "js-debug",
            "entry_point": "js-debug/src/dapDebugServer.js",
        }))
        .unwrap();
        assert_eq!(spec.entry_point(), Some("js-debug/src/dapDebugServer.js"));
    }
}
