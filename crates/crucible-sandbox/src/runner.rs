//! Shared child-process driving: stdin delivery, bounded capture, and
//! wall-clock enforcement via SIGKILL.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::SandboxError;

#[derive(Debug)]
pub(crate) struct RawRun {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// None when the child was signal-terminated.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// Spawn `cmd`, deliver `stdin_data`, and wait at most `wall`.
///
/// The input is written in full before the wait begins; output is
/// collected only after the child exits. On timeout the child is killed
/// and reaped before the error returns, so no process outlives the call.
pub(crate) async fn drive(
    cmd: &mut Command,
    stdin_data: &[u8],
    wall: Duration,
) -> Result<RawRun, SandboxError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| SandboxError::StartupFailed {
        reason: e.to_string(),
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(stdin_data).await?;
        stdin.shutdown().await?;
        drop(stdin);
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let reader = tokio::spawn(async move {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stdout).await;
        }
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stderr).await;
        }
        (stdout, stderr)
    });

    let status = match tokio::time::timeout(wall, child.wait()).await {
        Ok(waited) => waited?,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            reader.abort();
            return Err(SandboxError::Timeout {
                limit_ms: u64::try_from(wall.as_millis()).unwrap_or(u64::MAX),
            });
        }
    };

    let (stdout, stderr) = reader.await.map_err(|e| SandboxError::Crashed {
        reason: format!("output reader failed: {e}"),
    })?;

    Ok(RawRun {
        stdout,
        stderr,
        exit_code: status.code(),
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("echo hello; exit 3");
        let run = drive(&mut cmd, b"", Duration::from_secs(5)).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&run.stdout), "hello\n");
        assert_eq!(run.exit_code, Some(3));
    }

    #[tokio::test]
    async fn delivers_stdin_before_execution() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("cat");
        let run = drive(&mut cmd, b"payload", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&run.stdout), "payload");
        assert_eq!(run.exit_code, Some(0));
    }

    #[tokio::test]
    async fn kills_on_wall_timeout() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("sleep 30");
        let start = Instant::now();
        let err = drive(&mut cmd, b"", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { limit_ms: 200 }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_binary_is_startup_failure() {
        let mut cmd = Command::new("/nonexistent/interpreter");
        let err = drive(&mut cmd, b"", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SandboxError::StartupFailed { .. }));
    }

    #[tokio::test]
    async fn captures_stderr_separately() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("echo out; echo err >&2");
        let run = drive(&mut cmd, b"", Duration::from_secs(5)).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&run.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&run.stderr), "err\n");
    }
}
