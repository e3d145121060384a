//! Bounded child-process execution for command-line generation backends.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes of stdout discarded past the output limit.
    pub stdout_truncated: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last non-empty stderr line, for error messages.
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// Run `cmd`, feed `input` on stdin, and capture output until exit or `timeout`.
///
/// Stdin is written and stdout/stderr are drained on separate threads so a
/// large prompt cannot deadlock against a child that writes before it reads.
/// At most `output_limit_bytes` of each stream are kept.
///
/// On Unix the child leads its own process group and a timeout kills the whole
/// group, so wrapper scripts cannot outlive it. A timed-out run returns no
/// output and never waits on pipes a surviving descendant may hold open.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), input_len = input.len()))]
pub fn run_with_input(
    mut cmd: Command,
    input: &[u8],
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning backend process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn backend command");
            return Err(e).context("spawn command");
        }
    };

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let payload = input.to_vec();
    let stdin_handle = thread::spawn(move || -> Result<()> {
        stdin.write_all(&payload).context("write stdin")?;
        // Dropping stdin closes the pipe so the child sees EOF.
        Ok(())
    });
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "backend command timed out, killing"
            );
            timed_out = true;
            kill_tree(&mut child);
            child.wait().context("wait command after kill")?
        }
    };

    if timed_out {
        // Reader threads are detached; they end once the last pipe holder dies.
        return Ok(ProcessOutput {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: 0,
            timed_out,
        });
    }

    if let Err(err) = join(stdin_handle)? {
        // A child that exits without reading all of stdin closes the pipe early.
        debug!(err = %err, "stdin not fully consumed");
    }
    let (stdout, stdout_truncated) = join(stdout_handle)?.context("read stdout")?;
    let (stderr, _) = join(stderr_handle)?.context("read stderr")?;

    if stdout_truncated > 0 {
        warn!(stdout_truncated, "backend output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "backend command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        timed_out,
    })
}

/// Kill the child's process group, then the child itself.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success());
        if !killed {
            debug!(pid = child.id(), "process group kill failed");
        }
    }
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill command");
    }
}

fn join<T>(handle: thread::JoinHandle<T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("process i/o thread panicked"))
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
