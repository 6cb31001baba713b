//! CLI command implementations

use anyhow::{Context, Result};
use crate::LimitsPreset;
use kiln_sandbox::{
    EngineStatus, ExecutionRequest, ExecutionResult, SandboxConfig, SandboxService,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Load configuration (file, then `KILN_*` environment, then the limits
/// preset) and build the engine
pub fn build_service(
    config_path: Option<&Path>,
    preset: Option<LimitsPreset>,
) -> Result<SandboxService> {
    let mut config = match config_path {
        Some(path) => SandboxConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SandboxConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid KILN_* environment override")?;
    if let Some(preset) = preset {
        config.limits = preset.limits();
    }

    debug!(?config, "Configuration loaded");
    SandboxService::new(config).context("Failed to start sandbox engine")
}

/// Read a source file, or stdin for "-"
async fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        tokio::io::stdin()
            .read_to_string(&mut source)
            .await
            .context("Failed to read source from stdin")?;
        return Ok(source);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

pub async fn execute_run(
    sandbox: &SandboxService,
    file: &Path,
    lang: Option<String>,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<ExitCode> {
    let source = read_source(file).await?;

    let mut request = ExecutionRequest::new(source);
    request.language = lang;
    request.timeout = timeout_secs.map(Duration::from_secs);

    let result = sandbox.submit(request).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(exit_code(result.ok))
}

pub async fn execute_check(
    sandbox: &SandboxService,
    file: &Path,
    lang: Option<String>,
) -> Result<ExitCode> {
    let source = read_source(file).await?;
    match sandbox.validate(&source, lang.as_deref()) {
        Ok(profile) => {
            println!("allowed ({})", profile.id);
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            println!("refused: {}", failure);
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn execute_detect(sandbox: &SandboxService, file: &Path) -> Result<ExitCode> {
    let source = read_source(file).await?;
    println!("{}", sandbox.detect(&source).id);
    Ok(ExitCode::SUCCESS)
}

pub fn execute_languages(sandbox: &SandboxService, json: bool) -> Result<ExitCode> {
    let languages = sandbox.languages();
    if json {
        println!("{}", serde_json::to_string_pretty(&languages)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:<12} {:<7} {:>8} {:>9}", "LANGUAGE", "EXT", "RUN", "COMPILE");
    for info in languages {
        let compile = info
            .compile_timeout_ms
            .map(|ms| format!("{}s", ms / 1000))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<7} {:>7}s {:>9}",
            info.id,
            info.extension,
            info.run_timeout_ms / 1000,
            compile
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn execute_batch(
    sandbox: &SandboxService,
    files: &[PathBuf],
    json: bool,
) -> Result<ExitCode> {
    let mut requests = Vec::with_capacity(files.len());
    for file in files {
        requests.push((file, ExecutionRequest::new(read_source(file).await?)));
    }

    let results = futures::future::join_all(
        requests
            .into_iter()
            .map(|(file, request)| async move { (file, sandbox.submit(request).await) }),
    )
    .await;

    let all_ok = results.iter().all(|(_, result)| result.ok);
    let status = sandbox.status().await;

    if json {
        let report = serde_json::json!({
            "results": results
                .iter()
                .map(|(file, result)| serde_json::json!({ "file": file, "result": result }))
                .collect::<Vec<_>>(),
            "status": status,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (file, result) in &results {
            println!("==> {} <==", file.display());
            print_result(result);
            println!();
        }
        print_status(&status);
    }
    Ok(exit_code(all_ok))
}

fn print_result(result: &ExecutionResult) {
    let failure_text = result.failure.as_ref().map(ToString::to_string);
    if !result.output.is_empty() && failure_text.as_deref() != Some(result.output.as_str()) {
        println!("{}", result.output);
    }
    if let Some(failure) = &result.failure {
        eprintln!(
            "✗ {} [{} in {}ms]",
            failure,
            result.language.as_deref().unwrap_or("?"),
            result.duration_ms
        );
    }
}

fn print_status(status: &EngineStatus) {
    println!("in flight: {}/{}", status.in_flight, status.capacity);
    println!(
        "history: {}/{} entries",
        status.history_len, status.history_capacity
    );
    for entry in &status.recent_history {
        println!(
            "  {} {:<10} {:<18} {:>6}ms",
            entry.timestamp.format("%H:%M:%S"),
            entry.language.as_deref().unwrap_or("-"),
            entry.outcome.to_string(),
            entry.duration_ms
        );
    }
}
