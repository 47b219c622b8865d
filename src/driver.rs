use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cfg_if::cfg_if;
use thiserror::Error;
use wait_timeout::ChildExt;

/// Most output kept from one process; anything past it is read and dropped.
pub const DEFAULT_CAPTURE_LIMIT: usize = 4 * 1024 * 1024;

/// How long to keep draining pipes after the process is gone. Something that
/// escaped the process group can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("could not start {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("lost track of {}: {source}", program.display())]
    Io {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("refusing to run {} without a time limit", program.display())]
    ZeroTimeout { program: PathBuf },
}

/// How a driven process came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Exited(i32),
    Signaled(i32),
    /// Still running when the time limit expired; it was killed and reaped.
    TimedOut,
}

impl ExitState {
    pub fn is_zero(self) -> bool {
        matches!(self, ExitState::Exited(0))
    }
}

cfg_if! {
    if #[cfg(unix)] {
        use std::os::unix::process::{CommandExt, ExitStatusExt};

        impl From<ExitStatus> for ExitState {
            fn from(status: ExitStatus) -> Self {
                match (status.code(), status.signal()) {
                    (Some(code), _) => ExitState::Exited(code),
                    (None, Some(signal)) => ExitState::Signaled(signal),
                    (None, None) => ExitState::Exited(-1),
                }
            }
        }

        fn signal_name(signal: i32) -> Option<&'static str> {
            match signal {
                libc::SIGABRT => Some("SIGABRT"),
                libc::SIGBUS => Some("SIGBUS"),
                libc::SIGFPE => Some("SIGFPE"),
                libc::SIGILL => Some("SIGILL"),
                libc::SIGKILL => Some("SIGKILL"),
                libc::SIGSEGV => Some("SIGSEGV"),
                libc::SIGTERM => Some("SIGTERM"),
                libc::SIGUSR2 => Some("SIGUSR2"),
                _ => None,
            }
        }

        // The child leads its own process group so a timeout can take down
        // anything it forked along with it.
        fn isolate(command: &mut Command) {
            command.process_group(0);
        }

        fn kill_group(leader: u32) -> bool {
            let group = -(leader as libc::pid_t);
            // SAFETY: kill(2) has no memory-safety preconditions.
            unsafe { libc::kill(group, libc::SIGKILL) == 0 }
        }
    } else {
        impl From<ExitStatus> for ExitState {
            fn from(status: ExitStatus) -> Self {
                ExitState::Exited(status.code().unwrap_or(-1))
            }
        }

        fn signal_name(_signal: i32) -> Option<&'static str> {
            None
        }

        fn isolate(_command: &mut Command) {}

        fn kill_group(_leader: u32) -> bool {
            false
        }
    }
}

fn kill_tree(child: &mut Child) -> io::Result<()> {
    if kill_group(child.id()) {
        return Ok(());
    }
    child.kill()
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Exited(code) => write!(f, "exit code {code}"),
            ExitState::Signaled(signal) => match signal_name(*signal) {
                Some(name) => write!(f, "signal {name}"),
                None => write!(f, "signal {signal}"),
            },
            ExitState::TimedOut => f.write_str("a timeout"),
        }
    }
}

/// Outcome of exactly one spawn.
#[derive(Debug)]
pub struct RunResult {
    /// Everything the process wrote to stdout and stderr, interleaved in
    /// arrival order.
    pub output: Vec<u8>,
    /// The process wrote more than the capture limit.
    pub truncated: bool,
    pub exit: ExitState,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn timed_out(&self) -> bool {
        self.exit == ExitState::TimedOut
    }

    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

/// A program, its arguments and the limits it runs under.
///
/// An empty argument list spawns the program with no arguments at all;
/// `arg("")` passes one empty argument.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    timeout: Duration,
    capture_limit: usize,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn capture_limit(mut self, bytes: usize) -> Self {
        self.capture_limit = bytes;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Spawns the program and blocks until it exits or the time limit
    /// expires. The child is always reaped before this returns.
    pub fn run(&self) -> Result<RunResult, DriverError> {
        if self.timeout.is_zero() {
            return Err(DriverError::ZeroTimeout {
                program: self.program.clone(),
            });
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        isolate(&mut command);

        let started = Instant::now();
        let child = command.spawn().map_err(|source| DriverError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let mut child = ChildGuard::new(child);

        let capture = Capture::new(self.capture_limit);
        let (done_tx, done_rx) = mpsc::channel();
        let (stdout, stderr) = child.take_pipes();
        let mut pumps = 0;
        if let Some(pipe) = stdout {
            capture.pump(pipe, done_tx.clone());
            pumps += 1;
        }
        if let Some(pipe) = stderr {
            capture.pump(pipe, done_tx);
            pumps += 1;
        }

        let exit = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => {
                // Background children left behind would hold the pipes open.
                kill_group(child.id());
                ExitState::from(status)
            }
            Ok(None) => {
                child.terminate().map_err(|source| self.io_error(source))?;
                ExitState::TimedOut
            }
            Err(source) => return Err(self.io_error(source)),
        };
        let elapsed = started.elapsed();

        drain(&done_rx, pumps, DRAIN_GRACE);

        let (output, truncated) = capture.take();
        Ok(RunResult {
            output,
            truncated,
            exit,
            elapsed,
        })
    }

    fn io_error(&self, source: io::Error) -> DriverError {
        DriverError::Io {
            program: self.program.clone(),
            source,
        }
    }
}

/// Owns a spawned child and kills and reaps it on drop unless it has
/// already been waited on.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn id(&self) -> u32 {
        self.child.id()
    }

    fn take_pipes(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        (self.child.stdout.take(), self.child.stderr.take())
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let status = self.child.wait_timeout(timeout)?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    fn terminate(&mut self) -> io::Result<()> {
        // The child may exit on its own between the timeout and the kill.
        let _ = kill_tree(&mut self.child);
        self.child.wait()?;
        self.reaped = true;
        Ok(())
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.terminate();
        }
    }
}

/// Waits for up to `pumps` completions, giving up once `grace` has passed.
/// Pumps still running are left to finish on their own.
fn drain(done: &Receiver<()>, pumps: usize, grace: Duration) {
    let deadline = Instant::now() + grace;
    for _ in 0..pumps {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if done.recv_timeout(remaining).is_err() {
            return;
        }
    }
}

#[derive(Default)]
struct Buffer {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Output buffer shared by the stdout and stderr pumps of one process,
/// bounded at `limit` bytes.
#[derive(Clone)]
struct Capture {
    buffer: Arc<Mutex<Buffer>>,
    limit: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            buffer: Arc::default(),
            limit,
        }
    }

    /// Reads `pipe` to its end on a background thread, then signals `done`.
    /// Reading continues past the limit so the child never blocks on a full
    /// pipe.
    fn pump<R>(&self, mut pipe: R, done: Sender<()>)
    where
        R: Read + Send + 'static,
    {
        let sink = self.clone();
        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => sink.append(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = done.send(());
        });
    }

    fn append(&self, chunk: &[u8]) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let room = self.limit.saturating_sub(buffer.bytes.len());
        if chunk.len() > room {
            buffer.truncated = true;
        }
        let keep = chunk.len().min(room);
        buffer.bytes.extend_from_slice(&chunk[..keep]);
    }

    /// Whatever has arrived so far. Chunks from a pump that outlived the
    /// grace period land in a buffer nobody reads again.
    fn take(&self) -> (Vec<u8>, bool) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let taken = std::mem::take(&mut *buffer);
        (taken.bytes, taken.truncated)
    }
}
