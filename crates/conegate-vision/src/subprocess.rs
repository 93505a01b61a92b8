use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

/// Runs `cmd` to completion with an optional stdin payload and a hard time limit.
///
/// stdin is fed while stdout/stderr are drained, so a chatty child can't stall the
/// write. The child is always reaped, and killed when `limit` expires. A non-zero
/// exit is an error carrying the child's stderr.
///
/// Blocking: call from a plain or `spawn_blocking` thread, never from async code.
pub fn run_bounded(cmd: Command, input: Option<Vec<u8>>, limit: Duration) -> Result<Output> {
    let fut = run(cmd, input, limit);
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.block_on(fut),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build process runtime")?
            .block_on(fut),
    }
}

async fn run(mut cmd: Command, input: Option<Vec<u8>>, limit: Duration) -> Result<Output> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn().with_context(|| format!("spawn {}", program))?;

    let stdin = child.stdin.take();
    let feed = async move {
        if let (Some(mut stdin), Some(data)) = (stdin, input) {
            stdin.write_all(&data).await?;
            stdin.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    // on expiry the child is dropped, which kills it
    let (fed, out) = match tokio::time::timeout(limit, async { tokio::join!(feed, child.wait_with_output()) }).await {
        Ok(done) => done,
        Err(_) => {
            warn!("{} still running after {:?}, killed", program, limit);
            anyhow::bail!("{} timed out after {:?}", program, limit);
        }
    };

    let out = out.with_context(|| format!("wait for {}", program))?;
    anyhow::ensure!(
        out.status.success(),
        "{} exited with {}: {}",
        program,
        out.status,
        String::from_utf8_lossy(&out.stderr).trim()
    );
    fed.with_context(|| format!("write stdin of {}", program))?;
    Ok(out)
}
