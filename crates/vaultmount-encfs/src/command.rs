//! Execution wrapper for invoking helper binaries.
//!
//! Keeps shell integration isolated so the lifecycle logic in `vaultmount-core`
//! stays testable against scripted runners.
//!
//! A call resolves on the helper's exit status, not on EOF of its output
//! pipes: FUSE helpers daemonise, and the daemon may keep inherited pipes open
//! long after the helper itself has exited.

use async_trait::async_trait;
use log::debug;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use vaultmount_core::runner::{HelperFailure, HelperOutput, HelperRunner, Invocation};

/// How long output readers may keep draining once the helper has exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// Spawns each invocation as a child process and waits for it to exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl HelperRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<HelperOutput, HelperFailure> {
        let program = invocation.program_name();
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if invocation.input().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn().map_err(|err| {
            debug!("process error: unable to spawn {program}: {err}");
            HelperFailure::errored(&program, err)
        })?;

        let stdout = StreamCapture::start(child.stdout.take());
        let stderr = StreamCapture::start(child.stderr.take());

        if let Some(payload) = invocation.input() {
            let stdin = child.stdin.take();
            if let Err(failure) = deliver_input(&mut child, stdin, &program, payload).await {
                stdout.abandon();
                stderr.abandon();
                return Err(failure);
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(err) => {
                debug!("process error: waiting on {program} failed: {err}");
                stdout.abandon();
                stderr.abandon();
                return Err(HelperFailure::errored(&program, err));
            }
        };

        let deadline = Instant::now() + OUTPUT_GRACE;
        let stdout = stdout.finish(&program, deadline).await;
        let stderr = stderr.finish(&program, deadline).await;

        let code = status.code();
        let signal = exit_signal(&status);
        debug!("process exit: {program} code {code:?} signal {signal:?}");
        if !stdout.is_empty() {
            debug!("{program} stdout: {}", stdout.trim_end());
        }
        if !stderr.is_empty() {
            debug!("{program} stderr: {}", stderr.trim_end());
        }

        if status.success() {
            Ok(HelperOutput { stdout, stderr })
        } else {
            Err(HelperFailure::exited(program, code, signal, stderr))
        }
    }
}

/// Background reader accumulating one output pipe into a shared buffer.
struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl StreamCapture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(read) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..read]),
                    Err(err) => {
                        debug!("helper output stream error: {err}");
                        break;
                    }
                }
            }
        });
        Self { buffer, task }
    }

    /// Wait for EOF until `deadline`, then keep whatever has been read.
    async fn finish(self, program: &str, deadline: Instant) -> String {
        let Self { buffer, task } = self;
        let abort = task.abort_handle();
        if tokio::time::timeout_at(deadline, task).await.is_err() {
            abort.abort();
            debug!("{program} output still held open after exit; keeping what was read");
        }
        let captured = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let text = String::from_utf8_lossy(&captured).into_owned();
        text
    }

    fn abandon(self) {
        self.task.abort();
    }
}

/// Feed the stdin payload; on failure kill and reap the child before reporting.
async fn deliver_input<W>(
    child: &mut Child,
    stdin: Option<W>,
    program: &str,
    payload: &[u8],
) -> Result<(), HelperFailure>
where
    W: AsyncWrite + Unpin,
{
    let Err(err) = feed_stdin(stdin, payload).await else {
        return Ok(());
    };

    debug!("process error: stdin for {program} unusable: {err}");
    if let Err(kill_err) = child.kill().await {
        debug!("unable to reap {program} after stdin failure: {kill_err}");
    }
    Err(HelperFailure::errored(program, err))
}

/// Write `payload` and close stdin.
///
/// A child that exits before reading its input surfaces as a broken pipe; that
/// case is left to the exit status, which carries the better diagnostic.
async fn feed_stdin<W>(stdin: Option<W>, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut stdin =
        stdin.ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdin unavailable"))?;

    let written = match stdin.write_all(payload).await {
        Ok(()) => stdin.flush().await,
        Err(err) => Err(err),
    };
    drop(stdin);

    match written {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("child closed stdin before the payload was fully written");
            Ok(())
        }
        other => other,
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
