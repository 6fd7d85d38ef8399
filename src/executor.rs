//! One-shot subprocess supervision.
//!
//! Commands are spawned directly (argv, never a shell) with piped stdio.
//! Reader threads drain stdout and stderr while the parent waits with a
//! deadline, so a chatty child cannot deadlock on a full pipe. The result is
//! the uniform currency every layer above consumes.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How long to keep waiting for stream EOF after the child was killed.
/// Orphaned grandchildren can hold the pipe write end open well past the
/// kill, so this wait must be bounded.
const READER_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: BTreeMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(command: Vec<String>, cwd: PathBuf, timeout: Duration) -> Self {
        ExecutionRequest {
            command,
            cwd,
            timeout,
            env: BTreeMap::new(),
        }
    }
}

/// Outcome of one subprocess invocation. `exit_code` is `None` when the
/// spawn itself failed; `ok` holds only for a clean zero exit with no
/// timeout.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub command: Vec<String>,
}

/// Seam between orchestration and real processes. Tests substitute scripted
/// runners; production uses [`ProcessRunner`].
pub trait CommandRunner: Send + Sync {
    fn run(&self, request: &ExecutionRequest) -> ExecutionResult;
}

pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        run_process(request)
    }
}

fn run_process(request: &ExecutionRequest) -> ExecutionResult {
    let started = Instant::now();
    let Some((program, args)) = request.command.split_first() else {
        return failure(request, started, None, false, "Command is empty.".to_string());
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&request.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &request.env {
        command.env(key, value);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            debug!(command = ?request.command, error = %err, "spawn failed");
            return failure(request, started, None, false, err.to_string());
        }
    };

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let mut timed_out = false;
    let mut killed = false;
    let status = match child.wait_timeout(request.timeout) {
        Ok(Some(status)) => Some(status),
        Ok(None) => {
            timed_out = true;
            killed = true;
            terminate(&mut child);
            match child.wait() {
                Ok(status) => Some(status),
                Err(err) => {
                    warn!(command = ?request.command, error = %err, "wait after kill failed");
                    None
                }
            }
        }
        Err(err) => {
            warn!(command = ?request.command, error = %err, "wait failed");
            killed = true;
            terminate(&mut child);
            child.wait().ok()
        }
    };

    let stdout = stdout_reader.collect(killed);
    let stderr = stderr_reader.collect(killed);
    let exit_code = status.and_then(|status| status.code());
    let ok = !timed_out && status.is_some_and(|status| status.success());

    ExecutionResult {
        ok,
        exit_code,
        stdout,
        stderr,
        timed_out,
        duration_ms: started.elapsed().as_millis() as u64,
        error_message: None,
        command: request.command.clone(),
    }
}

fn failure(
    request: &ExecutionRequest,
    started: Instant,
    exit_code: Option<i32>,
    timed_out: bool,
    message: String,
) -> ExecutionResult {
    ExecutionResult {
        ok: false,
        exit_code,
        stdout: String::new(),
        stderr: String::new(),
        timed_out,
        duration_ms: started.elapsed().as_millis() as u64,
        error_message: Some(message),
        command: request.command.clone(),
    }
}

fn terminate(child: &mut Child) {
    if let Err(err) = child.kill() {
        warn!(error = %err, "kill failed");
    }
}

/// Drains one output stream into a shared buffer so partial output survives
/// a kill, and signals EOF over a channel so the collecting side can bound
/// its wait.
struct StreamReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl StreamReader {
    /// Collect whatever was read. After a kill the wait for EOF is bounded
    /// by [`READER_GRACE`]; a reader still blocked on an inherited pipe is
    /// abandoned and its buffer taken as-is.
    fn collect(self, killed: bool) -> String {
        if killed {
            let _ = self.done.recv_timeout(READER_GRACE);
        } else {
            let _ = self.done.recv();
        }
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).to_string()
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> StreamReader {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let (sender, done) = mpsc::channel();
    match pipe {
        Some(mut pipe) => {
            let sink = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(count) => sink
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&chunk[..count]),
                    }
                }
                let _ = sender.send(());
            });
        }
        None => {
            let _ = sender.send(());
        }
    }
    StreamReader { buffer, done }
}
