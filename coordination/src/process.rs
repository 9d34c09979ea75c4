//! Subprocess execution raced against a timeout and a cancellation token.
//!
//! Every external invocation in the pipeline (generation tool, build/lint/test
//! gates, git and gh) goes through [`run_captured`]. On Unix each child leads
//! its own process group; on timeout or cancellation the whole group gets
//! SIGKILL, so descendants such as test binaries do not outlive the call.

use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// Exit code, `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CapturedOutput {
    /// stdout followed by stderr, the way a terminal user would read them.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Short human-readable exit status ("exit code 1", "killed by signal").
    pub fn status_label(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "killed by signal".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to execute `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("`{program}` cancelled")]
    Cancelled { program: String },
}

/// Run `cmd` to completion, capturing stdout and stderr.
///
/// Returns `Ok` for any exit status; callers decide what non-zero means.
pub async fn run_captured(
    cmd: &mut Command,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<CapturedOutput, ProcessError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;
    let group = child.id();
    let wait = child.wait_with_output();

    let finished = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProcessError::Cancelled { program: program.clone() }),
        finished = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, wait).await.ok(),
                None => Some(wait.await),
            }
        } => finished.ok_or_else(|| ProcessError::TimedOut {
            program: program.clone(),
            timeout: timeout.unwrap_or_default(),
        }),
    };

    let output = match finished {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(ProcessError::Spawn { program, source }),
        Err(interrupted) => {
            if let Some(group) = group {
                kill_process_group(group);
            }
            return Err(interrupted);
        }
    };

    Ok(CapturedOutput {
        exit_code: output.status.code(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration: start.elapsed(),
    })
}

/// SIGKILL every process in the group led by `leader`.
#[cfg(unix)]
fn kill_process_group(leader: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(leader) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid = leader, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_leader: u32) {}

/// Truncate `s` to at most `max_bytes`, on a char boundary, noting the cut.
pub fn truncate_output(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut cut = max_bytes;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...\n[truncated at {} bytes]", &s[..cut], s.len())
}
