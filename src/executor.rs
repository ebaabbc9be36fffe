use crate::storage::ExecutionResult;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

pub const NO_OUTPUT: &str = "No output.";
pub const DEFAULT_SHELL: &str = "/bin/bash";

// How long to wait for the pipe readers once the child is gone. Grandchildren
// that inherited the pipes can keep them open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(200);

type Captured = Arc<Mutex<Vec<u8>>>;

pub struct CommandExecutor {
    shell: String,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(shell: impl Into<String>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `command` through `<shell> -c`. Never returns an error: spawn
    /// failures and timeouts are flagged on the result instead.
    pub fn run(&self, command: &str) -> ExecutionResult {
        let start_time = Instant::now();
        match self.run_inner(command, start_time) {
            Ok(result) => result,
            Err(e) => {
                warn!(shell = %self.shell, error = %e, "command execution failed");
                ExecutionResult {
                    output: format!("Execution error: {e}"),
                    timed_out: false,
                    failed: true,
                    exit_code: None,
                    duration_ms: start_time.elapsed().as_millis() as u64,
                }
            }
        }
    }

    fn run_inner(&self, command: &str, start_time: Instant) -> io::Result<ExecutionResult> {
        debug!(shell = %self.shell, command, "spawning shell");
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()?;

        let (done_tx, done_rx) = mpsc::channel();
        let stdout_buf = spawn_reader(child.stdout.take(), done_tx.clone());
        let stderr_buf = spawn_reader(child.stderr.take(), done_tx);

        let (exit_code, timed_out) = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => (status.code(), false),
            Ok(None) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "command timed out, killing");
                kill(&mut child);
                (None, true)
            }
            Err(e) => {
                kill(&mut child);
                return Err(e);
            }
        };

        let deadline = if timed_out {
            Instant::now() + READER_GRACE
        } else {
            (start_time + self.timeout).max(Instant::now() + READER_GRACE)
        };
        await_readers(&done_rx, 2, deadline);

        let stdout = snapshot(&stdout_buf);
        let stderr = snapshot(&stderr_buf);
        let duration_ms = start_time.elapsed().as_millis() as u64;

        let output = if timed_out && stdout.is_empty() && stderr.is_empty() {
            timed_out_message(self.timeout)
        } else {
            select_output(&stdout, &stderr)
        };

        Ok(ExecutionResult {
            output,
            timed_out,
            failed: false,
            exit_code,
            duration_ms,
        })
    }
}

/// Picks what the user sees: stdout, falling back to stderr, falling back to
/// the sentinel. Never returns an empty string.
pub fn select_output(stdout: &str, stderr: &str) -> String {
    if !stdout.is_empty() {
        stdout.to_string()
    } else if !stderr.is_empty() {
        stderr.to_string()
    } else {
        NO_OUTPUT.to_string()
    }
}

/// Output reported for a timed-out command that printed nothing.
pub fn timed_out_message(timeout: Duration) -> String {
    format!("Command timed out after {}s.", timeout.as_secs())
}

fn spawn_reader<R>(pipe: Option<R>, done: Sender<()>) -> Captured
where
    R: Read + Send + 'static,
{
    let collected: Captured = Arc::new(Mutex::new(Vec::new()));
    let Some(mut reader) = pipe else {
        let _ = done.send(());
        return collected;
    };
    let sink = Arc::clone(&collected);
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(bytes_read) => {
                    if let Ok(mut out) = sink.lock() {
                        out.extend_from_slice(&buffer[..bytes_read]);
                    }
                }
            }
        }
        let _ = done.send(());
    });
    collected
}

fn await_readers(done: &Receiver<()>, mut pending: usize, deadline: Instant) {
    while pending > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if done.recv_timeout(remaining).is_err() {
            debug!(pending, "abandoning pipe readers");
            return;
        }
        pending -= 1;
    }
}

fn snapshot(buf: &Captured) -> String {
    match buf.lock() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
        Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).to_string(),
    }
}

// The shell leads its own process group, so killing the group also takes
// down background jobs and pipeline members it started.
fn kill(child: &mut Child) {
    match i32::try_from(child.id()) {
        Ok(pgid) => unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        },
        Err(_) => {
            let _ = child.kill();
        }
    }
    let _ = child.wait();
}
