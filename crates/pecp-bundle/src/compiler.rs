//! # Compiler Invoker
//!
//! Turns policy sources plus a manifest into a single binary artifact by
//! running an external compiler (an `opa`-compatible CLI) in a private build
//! directory.
//!
//! ## Invocation
//!
//! ```text
//! <program> build -t <target> -o <output> [-e <pkg/path/entry>]... <build-dir>
//! ```
//!
//! Each call gets its own [`tempfile::TempDir`], removed on drop whether the
//! build succeeds, fails, or times out. Concurrent builds are capped by a
//! semaphore.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use pecp_core::{codes, resolve_within, safe_policy_filename, PlaneError, Policy};
use regex::Regex;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::archive::MANIFEST_ENTRY;

static PACKAGE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*package\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)")
        .expect("package regex is valid")
});

static ENTRYPOINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("entrypoint regex is valid"));

/// Entrypoint used when none is supplied or the supplied one is unusable.
pub const DEFAULT_ENTRYPOINT: &str = pecp_core::DEFAULT_ENTRYPOINT;

// -- Command execution --------------------------------------------------------

/// A fully described subprocess call.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Executable path or name resolved through `PATH`.
    pub program: PathBuf,
    /// Arguments, not including the program.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Wall-clock limit. The child is killed when it expires.
    pub timeout: Duration,
}

/// Result of running a [`CommandSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exit status 0. `output` is stdout followed by stderr.
    Success {
        /// Combined output.
        output: String,
    },
    /// Non-zero exit, or terminated by a signal (`exit_code` is `None`).
    Failure {
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Combined output.
        output: String,
    },
    /// The deadline passed and the child was killed.
    TimedOut {
        /// Deadline that was exceeded.
        after: Duration,
    },
}

/// Runs subprocesses. Swappable so the compiler pipeline can be tested
/// without a real compiler binary.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion or timeout.
    ///
    /// `Err` is reserved for failing to start the process at all.
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutcome>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutcome> {
        let child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Ok(CommandOutcome::TimedOut { after: spec.timeout }),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(CommandOutcome::Success { output: combined })
        } else {
            Ok(CommandOutcome::Failure {
                exit_code: output.status.code(),
                output: combined,
            })
        }
    }
}

// -- Entrypoints --------------------------------------------------------------

/// Check an entrypoint name: ASCII letters, digits and underscore only.
pub fn validate_entrypoint(name: &str) -> Result<(), PlaneError> {
    if ENTRYPOINT.is_match(name) {
        Ok(())
    } else {
        Err(PlaneError::functional(
            codes::INVALID_ENTRYPOINT,
            format!("Invalid entrypoint {name:?}: only letters, digits and '_' are allowed"),
        ))
    }
}

/// Entrypoint to compile with.
///
/// `None` or blank means [`DEFAULT_ENTRYPOINT`]. An invalid name is logged and
/// replaced by the default so the build can proceed; reject invalid names
/// up front with [`validate_entrypoint`] where the caller can still fix them.
pub fn effective_entrypoint(requested: Option<&str>) -> &str {
    match requested.map(str::trim) {
        None | Some("") => DEFAULT_ENTRYPOINT,
        Some(name) => match validate_entrypoint(name) {
            Ok(()) => name,
            Err(_) => {
                tracing::warn!(
                    entrypoint = name,
                    fallback = DEFAULT_ENTRYPOINT,
                    "invalid entrypoint, using default"
                );
                DEFAULT_ENTRYPOINT
            }
        },
    }
}

/// Package path declared by a policy, slash-separated (`a.b.c` → `a/b/c`).
pub fn package_path(source: &str) -> Option<String> {
    PACKAGE_DECL
        .captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace('.', "/"))
}

/// Compiler targets for `policies`, de-duplicated and sorted.
pub fn derive_entrypoints(policies: &[Policy], entrypoint: &str) -> BTreeSet<String> {
    policies
        .iter()
        .filter_map(|p| package_path(&p.content))
        .map(|pkg| format!("{pkg}/{entrypoint}"))
        .collect()
}

/// Assign each policy a distinct, sanitized basename.
///
/// `fallback` produces the stem for policies without a declared filename.
/// Two policies that sanitize to the same basename are disambiguated by
/// appending the policy id to the later one, plus a counter if that name is
/// taken as well. The returned names are pairwise distinct.
pub fn policy_filenames(
    policies: &[Policy],
    fallback: impl Fn(&Policy) -> String,
) -> Result<Vec<String>, PlaneError> {
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(policies.len());
    for policy in policies {
        let mut name = safe_policy_filename(policy.filename.as_deref(), &fallback(policy))?;
        if seen.contains(&name) {
            let stem = name
                .strip_suffix(&format!(".{}", pecp_core::POLICY_EXTENSION))
                .unwrap_or(&name)
                .to_string();
            name = format!("{stem}_{}.{}", policy.id, pecp_core::POLICY_EXTENSION);
            let mut n = 2;
            while seen.contains(&name) {
                name = format!("{stem}_{}_{n}.{}", policy.id, pecp_core::POLICY_EXTENSION);
                n += 1;
            }
        }
        seen.insert(name.clone());
        names.push(name);
    }
    Ok(names)
}

// -- Invoker ------------------------------------------------------------------

/// Compiler settings.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Compiler executable.
    pub program: PathBuf,
    /// Build target format passed with `-t`.
    pub target: String,
    /// Output file name inside the build directory.
    pub output_file: String,
    /// Wall-clock limit per invocation.
    pub timeout: Duration,
    /// Maximum concurrent invocations.
    pub max_concurrent: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("opa"),
            target: "wasm".to_string(),
            output_file: "bundle.tar.gz".to_string(),
            timeout: Duration::from_secs(60),
            max_concurrent: 4,
        }
    }
}

/// Runs the external compiler over a policy set.
#[derive(Clone)]
pub struct CompilerInvoker {
    config: CompilerConfig,
    runner: Arc<dyn CommandRunner>,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for CompilerInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerInvoker")
            .field("config", &self.config)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl CompilerInvoker {
    /// Invoker that spawns real processes.
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    /// Invoker with a custom command runner.
    pub fn with_runner(config: CompilerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            runner,
            permits,
        }
    }

    /// Current settings.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile `policies` with `manifest` as `data.json`, returning the bytes
    /// of the compiler's output file.
    ///
    /// # Errors
    ///
    /// - Security error when a policy filename tries to leave the build
    ///   directory. Nothing is written outside it.
    /// - Technical error on non-zero exit (`TECH_004`, with the captured
    ///   output as detail), timeout (`TECH_005`), or I/O failure.
    pub async fn compile<M: Serialize + ?Sized>(
        &self,
        policies: &[Policy],
        manifest: &M,
        entrypoint: Option<&str>,
    ) -> Result<Vec<u8>, PlaneError> {
        // Sanitize before touching the filesystem.
        let filenames = policy_filenames(policies, |p| format!("policy_{}", p.id))?;
        let manifest_bytes = serde_json::to_vec(manifest)?;

        let _permit = self.permits.acquire().await.map_err(|_| {
            PlaneError::technical(codes::COMPILER_FAILURE, "compiler pool is shut down")
        })?;

        let build_dir = tempfile::Builder::new()
            .prefix("pecp-build-")
            .tempdir()
            .map_err(|e| {
                PlaneError::technical_with(
                    codes::COMPILER_FAILURE,
                    "failed to create build directory",
                    e.to_string(),
                )
            })?;
        let dir = build_dir.path();

        write_file(&resolve_within(dir, MANIFEST_ENTRY)?, &manifest_bytes).await?;
        for (policy, filename) in policies.iter().zip(&filenames) {
            let path = resolve_within(dir, filename)?;
            write_file(&path, policy.content.as_bytes()).await?;
        }

        let entry = effective_entrypoint(entrypoint);
        let targets = derive_entrypoints(policies, entry);
        if targets.is_empty() {
            tracing::warn!(
                policies = policies.len(),
                "no package declarations found; invoking compiler without entrypoints"
            );
        }

        let spec = self.command_for(dir, &targets);
        tracing::debug!(program = %spec.program.display(), args = ?spec.args, "invoking compiler");

        let outcome = self.runner.run(&spec).await.map_err(|e| {
            metrics::counter!("pecp_compiler_invocations_total", "outcome" => "spawn_error")
                .increment(1);
            PlaneError::technical_with(
                codes::COMPILER_FAILURE,
                format!("failed to start compiler {}", spec.program.display()),
                e.to_string(),
            )
        })?;

        match outcome {
            CommandOutcome::Success { .. } => {
                metrics::counter!("pecp_compiler_invocations_total", "outcome" => "success")
                    .increment(1);
            }
            CommandOutcome::Failure { exit_code, output } => {
                metrics::counter!("pecp_compiler_invocations_total", "outcome" => "failure")
                    .increment(1);
                tracing::error!(?exit_code, output = %output, "compiler failed");
                let status = exit_code.map_or_else(|| "a signal".to_string(), |c| c.to_string());
                return Err(PlaneError::technical_with(
                    codes::COMPILER_FAILURE,
                    format!("compiler exited with {status}"),
                    output,
                ));
            }
            CommandOutcome::TimedOut { after } => {
                metrics::counter!("pecp_compiler_invocations_total", "outcome" => "timeout")
                    .increment(1);
                tracing::error!(timeout_secs = after.as_secs(), "compiler timed out");
                return Err(PlaneError::technical(
                    codes::COMPILER_TIMEOUT,
                    format!("compiler did not finish within {}s", after.as_secs()),
                ));
            }
        }

        let output_path = resolve_within(dir, &self.config.output_file)?;
        let artifact = tokio::fs::read(&output_path).await.map_err(|e| {
            PlaneError::technical_with(
                codes::COMPILER_FAILURE,
                "compiler reported success but produced no output",
                e.to_string(),
            )
        })?;
        if artifact.is_empty() {
            return Err(PlaneError::technical(
                codes::COMPILER_FAILURE,
                "compiler produced an empty artifact",
            ));
        }
        Ok(artifact)
    }

    fn command_for(&self, dir: &Path, targets: &BTreeSet<String>) -> CommandSpec {
        let mut args = vec![
            "build".to_string(),
            "-t".to_string(),
            self.config.target.clone(),
            "-o".to_string(),
            self.config.output_file.clone(),
        ];
        for target in targets {
            args.push("-e".to_string());
            args.push(target.clone());
        }
        args.push(dir.display().to_string());

        CommandSpec {
            program: self.config.program.clone(),
            args,
            cwd: dir.to_path_buf(),
            timeout: self.config.timeout,
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PlaneError> {
    tokio::fs::write(path, bytes).await.map_err(|e| {
        PlaneError::technical_with(
            codes::COMPILER_FAILURE,
            format!("failed to write {}", path.display()),
            e.to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn policy(id: i64, filename: Option<&str>, content: &str) -> Policy {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": format!("p{id}"),
            "filename": filename,
            "content": content,
            "status": "ACTIVE",
            "updatedAt": "2024-01-01T00:00:00Z",
        }))
        .unwrap()
    }

    /// Records each call with a listing of the build directory, and writes
    /// a fixed artifact when configured to succeed.
    struct Recorder {
        outcome: CommandOutcome,
        calls: Mutex<Vec<(CommandSpec, Vec<String>)>>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutcome> {
            let mut files: Vec<String> = std::fs::read_dir(&spec.cwd)?
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            files.sort();
            if matches!(self.outcome, CommandOutcome::Success { .. }) {
                std::fs::write(spec.cwd.join("bundle.tar.gz"), b"\x1f\x8bartifact")?;
            }
            self.calls.lock().unwrap().push((spec.clone(), files));
            Ok(self.outcome.clone())
        }
    }

    fn invoker(outcome: CommandOutcome) -> (CompilerInvoker, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            outcome,
            calls: Mutex::new(Vec::new()),
        });
        let invoker = CompilerInvoker::with_runner(CompilerConfig::default(), recorder.clone());
        (invoker, recorder)
    }

    #[test]
    fn entrypoint_validation() {
        assert!(validate_entrypoint("allow").is_ok());
        assert!(validate_entrypoint("is_admin_2").is_ok());
        assert!(validate_entrypoint("has space").is_err());
        assert!(validate_entrypoint("a/b").is_err());
        assert!(validate_entrypoint("").is_err());
        assert_eq!(
            validate_entrypoint("x.y").unwrap_err().code(),
            codes::INVALID_ENTRYPOINT
        );
    }

    #[test]
    fn effective_entrypoint_defaults_to_allow() {
        assert_eq!(effective_entrypoint(None), "allow");
        assert_eq!(effective_entrypoint(Some("  ")), "allow");
        assert_eq!(effective_entrypoint(Some("deny")), "deny");
        assert_eq!(effective_entrypoint(Some("bad name")), "allow");
    }

    #[test]
    fn package_path_uses_first_declaration() {
        let src = "# comment\npackage authz.finance.loans\n\ndefault allow = false\npackage other";
        assert_eq!(package_path(src).as_deref(), Some("authz/finance/loans"));
        assert_eq!(package_path("default allow = true"), None);
        assert_eq!(package_path("  package  documents\n").as_deref(), Some("documents"));
    }

    #[test]
    fn entrypoints_are_sorted_and_unique() {
        let policies = vec![
            policy(2, None, "package zeta"),
            policy(1, None, "package alpha"),
            policy(3, None, "package alpha"),
            policy(4, None, "no package here"),
        ];
        let targets: Vec<_> = derive_entrypoints(&policies, "allow").into_iter().collect();
        assert_eq!(targets, vec!["alpha/allow", "zeta/allow"]);
    }

    #[test]
    fn colliding_filenames_are_disambiguated() {
        let policies = vec![
            policy(1, Some("a/main.rego"), ""),
            policy(2, Some("b/main.rego"), ""),
        ];
        let names = policy_filenames(&policies, |p| format!("policy_{}", p.id)).unwrap();
        assert_eq!(names, vec!["main.rego", "main_2.rego"]);
    }

    #[test]
    fn renamed_file_never_shadows_an_existing_name() {
        let policies = vec![
            policy(1, Some("main_5.rego"), ""),
            policy(2, Some("main.rego"), ""),
            policy(5, Some("x/main.rego"), ""),
            policy(5, Some("y/main.rego"), ""),
        ];
        let names = policy_filenames(&policies, |p| format!("policy_{}", p.id)).unwrap();
        assert_eq!(
            names,
            vec!["main_5.rego", "main.rego", "main_5_2.rego", "main_5_3.rego"]
        );
        let distinct: HashSet<_> = names.iter().collect();
        assert_eq!(distinct.len(), names.len());
    }

    #[tokio::test]
    async fn compile_writes_sources_and_returns_artifact() {
        let (invoker, recorder) = invoker(CommandOutcome::Success {
            output: String::new(),
        });
        let policies = vec![
            policy(1, Some("finance.rego"), "package finance\nallow { true }"),
            policy(2, None, "package hr"),
        ];
        let artifact = invoker
            .compile(&policies, &serde_json::json!({}), Some("allow"))
            .await
            .unwrap();
        assert_eq!(artifact, b"\x1f\x8bartifact");

        let calls = recorder.calls.lock().unwrap();
        let (spec, files) = &calls[0];
        assert_eq!(files, &vec!["data.json", "finance.rego", "policy_2.rego"]);
        assert_eq!(
            spec.args[..5],
            ["build", "-t", "wasm", "-o", "bundle.tar.gz"].map(String::from)
        );
        assert!(spec.args.windows(2).any(|w| w == ["-e", "finance/allow"]));
        assert!(spec.args.windows(2).any(|w| w == ["-e", "hr/allow"]));
        assert!(!spec.cwd.exists(), "build directory must be removed");
    }

    #[tokio::test]
    async fn compile_without_packages_still_invokes() {
        let (invoker, recorder) = invoker(CommandOutcome::Success {
            output: String::new(),
        });
        let policies = vec![policy(1, None, "default allow = true")];
        invoker
            .compile(&policies, &serde_json::json!({}), None)
            .await
            .unwrap();
        let calls = recorder.calls.lock().unwrap();
        assert!(!calls[0].0.args.contains(&"-e".to_string()));
    }

    #[tokio::test]
    async fn path_traversal_is_rejected_before_running() {
        let (invoker, recorder) = invoker(CommandOutcome::Success {
            output: String::new(),
        });
        let policies = vec![policy(1, Some("../etc/passwd"), "package x")];
        let err = invoker
            .compile(&policies, &serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(err.is_security());
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_technical_with_output() {
        let (invoker, recorder) = invoker(CommandOutcome::Failure {
            exit_code: Some(1),
            output: "1 error occurred: rego_parse_error".into(),
        });
        let err = invoker
            .compile(&[policy(1, None, "package x")], &serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), pecp_core::ErrorCategory::Technical);
        assert_eq!(err.code(), codes::COMPILER_FAILURE);
        assert!(err.detail().unwrap().contains("rego_parse_error"));
        let calls = recorder.calls.lock().unwrap();
        assert!(!calls[0].0.cwd.exists());
    }

    #[tokio::test]
    async fn timeout_is_technical() {
        let (invoker, _) = invoker(CommandOutcome::TimedOut {
            after: Duration::from_secs(60),
        });
        let err = invoker
            .compile(&[policy(1, None, "package x")], &serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::COMPILER_TIMEOUT);
    }

    #[tokio::test]
    async fn concurrent_builds_use_disjoint_directories() {
        let (invoker, recorder) = invoker(CommandOutcome::Success {
            output: String::new(),
        });
        let policies = vec![policy(1, None, "package x")];
        let empty = serde_json::json!({});
        let (a, b) = tokio::join!(
            invoker.compile(&policies, &empty, None),
            invoker.compile(&policies, &empty, None),
        );
        a.unwrap();
        b.unwrap();
        let calls = recorder.calls.lock().unwrap();
        assert_ne!(calls[0].0.cwd, calls[1].0.cwd);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_reports_exit_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let spec = |script: &str, timeout: Duration| CommandSpec {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            cwd: dir.path().to_path_buf(),
            timeout,
        };

        let ok = ProcessRunner
            .run(&spec("echo out; echo err 1>&2", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(
            ok,
            CommandOutcome::Success {
                output: "out\nerr\n".into()
            }
        );

        let failed = ProcessRunner
            .run(&spec("exit 3", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(matches!(failed, CommandOutcome::Failure { exit_code: Some(3), .. }));

        let slow = ProcessRunner
            .run(&spec("sleep 5", Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(matches!(slow, CommandOutcome::TimedOut { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let invoker = CompilerInvoker::new(CompilerConfig {
            program: PathBuf::from("/nonexistent/compiler-binary"),
            ..CompilerConfig::default()
        });
        let err = invoker
            .compile(&[policy(1, None, "package x")], &serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::COMPILER_FAILURE);
    }
}
