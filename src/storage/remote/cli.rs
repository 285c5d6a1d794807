//! Helpers for driving vendor CLIs as child processes

use crate::error::{CacheError, CacheResult};
use crate::storage::Body;
use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// Finished CLI invocation
pub(super) struct CliOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Whether the CLI reported a missing object
    pub fn is_not_found(&self) -> bool {
        let stderr = self.stderr.as_str();
        ["404", "Not Found", "NotFound", "not found", "No URLs matched"]
            .iter()
            .any(|needle| stderr.contains(needle))
    }

    /// Trimmed stderr, or the exit status if the CLI printed nothing
    pub fn reason(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exited with {}", self.status)
        } else {
            stderr.to_string()
        }
    }
}

fn describe(program: &str, args: &[String]) -> String {
    format!("{} {}", program, args.join(" "))
}

/// Check whether a CLI is installed
pub(super) async fn available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a CLI to completion and capture its output
pub(super) async fn run(program: &str, args: &[String]) -> CacheResult<CliOutput> {
    debug!("Executing: {}", describe(program, args));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| CacheError::command_failed(describe(program, args), e))?;

    Ok(CliOutput {
        status: output.status,
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a CLI that reads an object body from its stdin
pub(super) async fn upload(program: &str, args: &[String], body: Body<'_>) -> CacheResult<CliOutput> {
    debug!("Uploading via: {}", describe(program, args));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CacheError::command_failed(describe(program, args), e))?;

    let (Some(mut stdin), Some(mut stderr)) = (child.stdin.take(), child.stderr.take()) else {
        return Err(CacheError::io(
            format!("attaching to {}", program),
            io::Error::other("child pipes not captured"),
        ));
    };

    // Drain stderr while feeding stdin so a chatty CLI cannot stall the upload
    let feed = async {
        let copied = tokio::io::copy(body, &mut stdin).await;
        let closed = stdin.shutdown().await;
        drop(stdin);
        copied.and(closed.map(|_| 0))
    };
    let collect = async {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    };
    let (fed, stderr) = tokio::join!(feed, collect);

    let status = child
        .wait()
        .await
        .map_err(|e| CacheError::command_failed(describe(program, args), e))?;
    let output = CliOutput {
        status,
        stdout: Vec::new(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    };

    // A CLI that failed explains itself better than the broken pipe it caused
    if let Err(e) = fed {
        if output.success() {
            return Err(CacheError::io(format!("streaming body to {}", program), e));
        }
    }
    Ok(output)
}
