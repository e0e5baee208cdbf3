#![warn(missing_docs)]

//! jsrun: run untrusted JavaScript in a sandbox and print a JSON verdict.
//!
//! `jsrun script.js` runs a file; `jsrun` alone reads `{"code": "..."}` from
//! stdin. The response JSON goes to stdout, logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jsrun_config::JsrunConfig;
use jsrun_sandbox::audit::{NoopAuditLogger, TracingAuditLogger};
use jsrun_sandbox::{ExecutionOutcome, RunRequest, RunResponse, SandboxConfig, SandboxExecutor};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

/// Build SandboxConfig from config overrides.
fn build_sandbox_config(overrides: &jsrun_config::SandboxOverrides) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    if let Some(timeout) = overrides.timeout_ms {
        config.timeout = Duration::from_millis(timeout);
    }
    if let Some(mib) = overrides.memory_limit_mib {
        config.max_heap_size = mib.saturating_mul(1024 * 1024);
    }
    if let Some(kb) = overrides.max_code_size_kb {
        config.max_code_size = kb.saturating_mul(1024);
    }
    if let Some(concurrent) = overrides.max_concurrent {
        config.max_concurrent = concurrent;
    }
    config
}

/// Locate the config file.
///
/// Search order:
/// 1. `JSRUN_CONFIG` environment variable
/// 2. `./jsrun.toml` in the current directory
/// 3. None (built-in defaults)
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("JSRUN_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let cwd = PathBuf::from("jsrun.toml");
    if cwd.exists() {
        return Some(cwd);
    }

    None
}

fn load_config() -> Result<JsrunConfig> {
    match find_config_file() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            JsrunConfig::from_file_with_env(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => {
            tracing::debug!("no config file found, using defaults");
            Ok(JsrunConfig::default())
        }
    }
}

fn build_executor(config: &JsrunConfig) -> SandboxExecutor {
    let sandbox_config = build_sandbox_config(&config.sandbox);
    if config.audit.enabled {
        SandboxExecutor::with_audit_logger(sandbox_config, Arc::new(TracingAuditLogger))
    } else {
        SandboxExecutor::with_audit_logger(sandbox_config, Arc::new(NoopAuditLogger))
    }
}

/// The source to run: the file's contents, or the `code` of a JSON request on stdin.
async fn read_source(file: Option<&Path>) -> Result<String> {
    if let Some(path) = file {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read request from stdin")?;
    let request: RunRequest =
        serde_json::from_str(&input).context("stdin is not a valid {\"code\": ...} request")?;
    Ok(request.code)
}

/// 0 for success, 1 for guest failures, 2 for host failures.
fn exit_code(outcome: &ExecutionOutcome) -> u8 {
    match outcome {
        ExecutionOutcome::Success { .. } => 0,
        ExecutionOutcome::SyntaxFailure { .. } | ExecutionOutcome::RuntimeFailure { .. } => 1,
        ExecutionOutcome::InternalFailure { .. } => 2,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Handle --version / -V before anything else
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("jsrun {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }
    if args.len() > 1 {
        anyhow::bail!("usage: jsrun [FILE]");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;
    let executor = build_executor(&config);

    let code = read_source(args.first().map(Path::new)).await?;
    let outcome = executor.execute(&code).await;
    let code = exit_code(&outcome);

    let response = RunResponse::from(outcome);
    println!("{}", serde_json::to_string(&response)?);
    Ok(ExitCode::from(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_sandbox_config_defaults() {
        let config = build_sandbox_config(&jsrun_config::SandboxOverrides::default());
        let defaults = SandboxConfig::default();
        assert_eq!(config.timeout, defaults.timeout);
        assert_eq!(config.max_heap_size, defaults.max_heap_size);
        assert_eq!(config.max_code_size, defaults.max_code_size);
        assert_eq!(config.max_concurrent, defaults.max_concurrent);
    }

    #[test]
    fn build_sandbox_config_applies_overrides() {
        let config = JsrunConfig::from_toml(
            "[sandbox]\ntimeout_ms = 250\nmemory_limit_mib = 32\nmax_code_size_kb = 4\nmax_concurrent = 2\n",
        )
        .unwrap();
        let sandbox = build_sandbox_config(&config.sandbox);
        assert_eq!(sandbox.timeout, Duration::from_millis(250));
        assert_eq!(sandbox.max_heap_size, 32 * 1024 * 1024);
        assert_eq!(sandbox.max_code_size, 4096);
        assert_eq!(sandbox.max_concurrent, 2);
    }

    #[test]
    fn exit_codes_follow_outcome_class() {
        assert_eq!(
            exit_code(&ExecutionOutcome::Success {
                output: String::new()
            }),
            0
        );
        assert_eq!(
            exit_code(&ExecutionOutcome::SyntaxFailure {
                message: "Syntax Error: x".into(),
                line: None
            }),
            1
        );
        assert_eq!(
            exit_code(&ExecutionOutcome::RuntimeFailure {
                message: "boom".into(),
                line: Some(1)
            }),
            1
        );
        assert_eq!(
            exit_code(&ExecutionOutcome::InternalFailure {
                message: "memory limit of 8 MiB exceeded".into()
            }),
            2
        );
    }

    #[tokio::test]
    async fn read_source_from_file() {
        let dir = std::env::temp_dir().join("jsrun-cli-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("script.js");
        std::fs::write(&path, "console.log(1);").unwrap();

        assert_eq!(read_source(Some(&path)).await.unwrap(), "console.log(1);");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn read_source_missing_file_is_an_error() {
        let err = read_source(Some(Path::new("/definitely/not/here.js")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read"), "{err}");
    }

    #[test]
    fn ver_cargo_pkg_version_is_set() {
        assert!(!env!("CARGO_PKG_VERSION").is_empty());
    }
}
