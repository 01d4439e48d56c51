//! Adapter install seam and pre-launch dependency checks.
//!
//! Installation itself (release downloads, compiling embedded sources)
//! belongs to the embedding tool; the proxy only needs the resulting
//! install directory for `{adapter_path}` / `{entry_point}` substitution.
//! [`AdapterInstaller`] is the seam through which that subsystem is
//! injected.  The `system` descriptor needs no installer at all.

use std::path::PathBuf;
use std::process::Stdio;

use log::debug;
use tokio::process::Command;

use crate::config::{DependencyCheck, InstallSpec};
use crate::errors::DebugError;

/// Injected adapter-installation subsystem.  Implementations may block;
/// install runs once per launch, before any transport exists.
pub trait AdapterInstaller: Send {
    /// Ensures the adapter described by `spec` is present and returns its
    /// install directory.
    fn install(&self, spec: &InstallSpec) -> Result<PathBuf, DebugError>;
}

/// Resolves the install directory for a descriptor: `system` adapters
/// need none; anything else requires an injected installer.
pub fn resolve_install_dir(
    spec: &InstallSpec,
    installer: Option<&dyn AdapterInstaller>,
) -> Result<PathBuf, DebugError> {
    match spec {
        InstallSpec::System => Ok(PathBuf::new()),
        other => match installer {
            Some(installer) => installer.install(other),
            None => Err(DebugError::InstallFailed {
                message: "adapter requires installation but no installer was provided".to_string(),
            }),
        },
    }
}

/// Runs each dependency check with all output silenced.  The first
/// command that fails to spawn or exits non-zero aborts with that
/// check's configured message.
pub async fn run_dependency_checks(checks: &[DependencyCheck]) -> Result<(), DebugError> {
    for check in checks {
        debug!("dependency check: {} {:?}", check.command, check.args);
        let status = Command::new(&check.command)
            .args(&check.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        let passed = matches!(&status, Ok(s) if s.success());
        if !passed {
            return Err(DebugError::DependencyCheckFailed {
                message: check.error_message.clone(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn check(command: &str, args: &[&str], message: &str) -> DependencyCheck {
        DependencyCheck {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            error_message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_checks_pass() {
        let checks = vec![check("true", &[], "unused"), check("sh", &["-c", "exit 0"], "unused")];
        run_dependency_checks(&checks).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_failure_wins() {
        let checks = vec![
            check("true", &[], "first ok"),
            check("false", &[], "python3 is required but was not found"),
            check("false", &[], "second failure, never reached"),
        ];
        let err = run_dependency_checks(&checks).await.unwrap_err();
        match err {
            DebugError::DependencyCheckFailed { message } => {
                assert_eq!(message, "python3 is required but was not found");
            }
            other => panic!("expected DependencyCheckFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_unspawnable_command_fails_with_its_message() {
        let checks = vec![check("/no/such/binary", &[], "missing toolchain")];
        let err = run_dependency_checks(&checks).await.unwrap_err();
        assert!(matches!(err, DebugError::DependencyCheckFailed { message } if message == "missing toolchain"));
    }

    #[test]
    fn test_system_spec_needs_no_installer() {
        let dir = resolve_install_dir(&InstallSpec::System, None).unwrap();
        assert_eq!(dir, PathBuf::new());
    }

    #[test]
    fn test_non_system_spec_without_installer_fails() {
        let spec = InstallSpec::CompileEmbedded {
            source_name: "adapter.c".to_string(),
            install_dir: "native".to_string(),
            entry_point: "native/adapter".to_string(),
        };
        let err = resolve_install_dir(&spec, None).unwrap_err();
        assert!(matches!(err, DebugError::InstallFailed { .. }));
    }

    #[test]
    fn test_installer_is_consulted() {
        struct Fixed;
        impl AdapterInstaller for Fixed {
            fn install(&self, _spec: &InstallSpec) -> Result<PathBuf, DebugError> {
                Ok(PathBuf::from("/opt/adapters/js-debug"))
            }
        }
        let spec = InstallSpec::GithubRelease {
            repo: "microsoft/vscode-js-debug".to_string(),
            version: "v1.97.1".to_string(),
            asset_pattern: "js-debug-dap-*.tar.gz".to_string(),
            extract_format: "tar.gz".to_string(),
            install_dir: "js-debug".to_string(),
            entry_point: "js-debug/src/dapDebugServer.js".to_string(),
        };
        let dir = resolve_install_dir(&spec, Some(&Fixed)).unwrap();
        assert_eq!(dir, PathBuf::from("/opt/adapters/js-debug"));
    }
}
