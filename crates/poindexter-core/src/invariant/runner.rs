use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use poindexter_db::models::Invariant;

/// The result of executing a single invariant check.
#[derive(Debug, Clone)]
pub struct InvariantResult {
    /// Whether the invariant passed (exit code matched expected).
    pub passed: bool,
    /// The actual exit code returned by the process, or `None` if the
    /// process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,
}

/// Run an invariant's command in the given working directory and return
/// the result.
///
/// The command is spawned as a child process with `stdout` and `stderr`
/// captured.  The exit code is compared against
/// [`Invariant::expected_exit_code`] to determine pass/fail.
pub async fn run_invariant(invariant: &Invariant, working_dir: &Path) -> Result<InvariantResult> {
    let start = Instant::now();
    let timeout = Duration::from_secs(invariant.timeout_secs.max(1) as u64);

    let mut child = Command::new(&invariant.command)
        .args(&invariant.args)
        .current_dir(working_dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .with_context(|| {
            format!(
                "failed to execute invariant {:?} (command: {} {})",
                invariant.name,
                invariant.command,
                invariant.args.join(" "),
            )
        })?;

    // Take stdout/stderr handles so we can read them concurrently with
    // waiting for the process. This avoids deadlocks if the child fills the
    // pipe buffer.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    // Wait for exit + read output concurrently, with a timeout.
    match tokio::time::timeout(timeout, async {
        let (wait_result, stdout, stderr) = tokio::join!(child.wait(), read_stdout, read_stderr);
        (wait_result, stdout, stderr)
    })
    .await
    {
        Ok((Ok(status), stdout, stderr)) => {
            let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
            let exit_code = status.code();
            let passed = exit_code == Some(invariant.expected_exit_code);

            Ok(InvariantResult {
                passed,
                exit_code,
                stdout,
                stderr,
                duration_ms,
            })
        }
        Ok((Err(e), _, _)) => Err(e).with_context(|| {
            format!(
                "failed to wait on invariant {:?} (command: {} {})",
                invariant.name,
                invariant.command,
                invariant.args.join(" "),
            )
        }),
        Err(_) => {
            // Timeout: kill the child process.
            let _ = child.kill().await;
            let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

            Ok(InvariantResult {
                passed: false,
                exit_code: None,
                stdout: String::new(),
                stderr: format!(
                    "invariant {:?} timed out after {}s",
                    invariant.name, invariant.timeout_secs
                ),
                duration_ms,
            })
        }
    }
}
