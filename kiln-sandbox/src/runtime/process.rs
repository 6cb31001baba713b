//! OS process runner

use super::{ProcessOutput, ProcessSpec, Runner, RunnerError, TRUNCATION_MARKER};
use crate::config::ProcessConfig;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::Instant;

/// How long to keep draining pipes after the group was killed
const KILL_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 4096;

/// Runs programs as child processes with a cleared environment
pub struct ProcessRunner {
    path: String,
    home: String,
    lang: String,
}

impl ProcessRunner {
    pub fn new(config: &ProcessConfig) -> Self {
        Self {
            path: config.path.clone(),
            home: config.home.clone(),
            lang: config.lang.clone(),
        }
    }

    /// Resolve a bare program name against the restricted search path
    fn resolve(&self, program: &str) -> Result<PathBuf, RunnerError> {
        if program.contains('/') {
            return Ok(PathBuf::from(program));
        }
        std::env::split_paths(&self.path)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
            .ok_or_else(|| RunnerError::NotFound(program.to_string()))
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(&ProcessConfig::default())
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, RunnerError> {
        let program = self.resolve(&spec.program)?;
        let started = Instant::now();

        let mut command = Command::new(&program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .env("PATH", &self.path)
            .env("HOME", &self.home)
            .env("LANG", &self.lang)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            command.process_group(0);
            if let Some(niceness) = spec.niceness {
                // SAFETY: setpriority is async-signal-safe and touches no
                // memory of the parent.
                unsafe {
                    command.pre_exec(move || {
                        // Best effort: a failed renice still runs the program
                        libc::setpriority(libc::PRIO_PROCESS, 0, niceness as libc::c_int);
                        Ok(())
                    });
                }
            }
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();

        tracing::debug!(
            program = %program.display(),
            pid,
            timeout_ms = spec.timeout.as_millis() as u64,
            "Process spawned"
        );

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_buf = [0u8; READ_CHUNK];
        let mut err_buf = [0u8; READ_CHUNK];
        let mut collector = OutputCollector::new(spec.output_cap);

        let deadline = tokio::time::sleep(spec.timeout);
        tokio::pin!(deadline);

        let mut status = None;
        let mut killed = false;

        loop {
            if status.is_some() && stdout.is_none() && stderr.is_none() {
                break;
            }

            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                    Ok(0) | Err(_) => stdout = None,
                    Ok(n) => collector.push(&out_buf[..n]),
                },
                read = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                    Ok(0) | Err(_) => stderr = None,
                    Ok(n) => collector.push(&err_buf[..n]),
                },
                exited = child.wait(), if status.is_none() => {
                    status = Some(exited.map_err(RunnerError::Wait)?);
                }
                _ = &mut deadline => {
                    if killed {
                        // Something outside the group still holds the pipes
                        tracing::warn!(pid, "Abandoning output after kill grace period");
                        break;
                    }
                    killed = true;
                    tracing::debug!(pid, "Deadline reached, killing process group");
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    let _ = child.start_kill();
                    deadline.as_mut().reset(Instant::now() + KILL_GRACE);
                }
            }
        }

        let status = match status {
            Some(status) => status,
            None => {
                let _ = child.start_kill();
                child.wait().await.map_err(RunnerError::Wait)?
            }
        };

        let (output, truncated) = collector.finish();
        Ok(ProcessOutput {
            output,
            truncated,
            exit_code: status.code(),
            killed,
            duration: started.elapsed(),
        })
    }

    fn name(&self) -> &str {
        "process"
    }
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // SAFETY: plain syscall; the child leads its own group, so the negated
    // pid addresses exactly that group.
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Single buffer for both streams, bounded by the cap. Bytes past the cap
/// are read and discarded.
struct OutputCollector {
    buf: Vec<u8>,
    cap: usize,
    overflowed: bool,
}

impl OutputCollector {
    fn new(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap.min(64 * 1024)),
            cap,
            overflowed: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.buf.len());
        if chunk.len() > room {
            self.overflowed = true;
        }
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    /// Decode and apply the cap to the decoded text. Invalid bytes widen to
    /// U+FFFD, so in-cap raw output can still decode past the cap.
    fn finish(self) -> (String, bool) {
        let bytes = if self.overflowed {
            without_partial_char(&self.buf)
        } else {
            &self.buf
        };
        let text = String::from_utf8_lossy(bytes);
        if !self.overflowed && text.len() <= self.cap {
            return (text.trim_end().to_string(), false);
        }

        let mut end = text.len().min(self.cap);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        (format!("{}{}", text[..end].trim_end(), TRUNCATION_MARKER), true)
    }
}

/// Drop an incomplete UTF-8 sequence left at the end by the cut
fn without_partial_char(bytes: &[u8]) -> &[u8] {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back {
            &bytes[..len - back]
        } else {
            bytes
        };
    }
    bytes
}
