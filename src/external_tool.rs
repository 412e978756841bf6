//! Runs external executables (ffmpeg, 7-Zip) for the type processors.

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancellation::CancellationFlag;
use crate::error::ProcessingError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An executable invocation with a fully enumerated argument list.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Exit codes at or above this fail the invocation.
    pub failure_exit_code: i32,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, failure_exit_code: i32) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            failure_exit_code,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// Captured result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Seam over process spawning so processors can be tested without the tools.
pub trait ToolRunner {
    fn run(&self, command: &ToolCommand, cancel: &CancellationFlag) -> Result<ToolOutput, ProcessingError>;
}

/// Spawns real processes. The child inherits this process's lowered priority.
pub struct ProcessToolRunner;

impl ProcessToolRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRunner for ProcessToolRunner {
    fn run(&self, command: &ToolCommand, cancel: &CancellationFlag) -> Result<ToolOutput, ProcessingError> {
        let tool = command.tool_name();
        debug!(tool = %tool, args = ?command.args, "starting external tool");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessingError::ToolSpawn {
                tool: tool.clone(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_or_kill(&mut child, cancel);
        let stdout = join_output(stdout);
        let stderr = join_output(stderr);

        let status = match status? {
            Some(status) => status,
            None => return Err(ProcessingError::Cancelled),
        };

        check_status(&tool, status, command.failure_exit_code, stdout, stderr)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf) {
                warn!("failed to read tool output: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// The parts of a running process that `wait_or_kill` drives.
trait RunningProcess {
    fn id(&self) -> u32;
    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>>;
    fn kill(&mut self) -> std::io::Result<()>;
    fn wait(&mut self) -> std::io::Result<ExitStatus>;
}

impl RunningProcess for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }

    fn kill(&mut self) -> std::io::Result<()> {
        Child::kill(self)
    }

    fn wait(&mut self) -> std::io::Result<ExitStatus> {
        Child::wait(self)
    }
}

/// Waits for the child, killing it if cancellation is requested. `None`
/// means the run was cancelled.
///
/// The child is never left running on an error path, since the output
/// reader threads only finish once its pipes close.
fn wait_or_kill(child: &mut impl RunningProcess, cancel: &CancellationFlag) -> Result<Option<ExitStatus>, ProcessingError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {}
            Err(e) => {
                warn!(pid = child.id(), "failed to poll external tool, terminating it: {}", e);
                kill_and_reap(child);
                return Err(e.into());
            }
        }
        if cancel.is_cancelled() {
            warn!(pid = child.id(), "cancellation requested, terminating external tool");
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_and_reap(child: &mut impl RunningProcess) {
    if let Err(e) = child.kill() {
        debug!(pid = child.id(), "kill after poll failure: {}", e);
    }
    if let Err(e) = child.wait() {
        debug!(pid = child.id(), "wait after poll failure: {}", e);
    }
}

fn check_status(
    tool: &str,
    status: ExitStatus,
    failure_exit_code: i32,
    stdout: String,
    stderr: String,
) -> Result<ToolOutput, ProcessingError> {
    match status.code() {
        Some(code) if code >= failure_exit_code => Err(ProcessingError::ToolFailed {
            tool: tool.to_string(),
            code,
            stdout,
            stderr,
        }),
        Some(code) => {
            if code != 0 {
                warn!(tool, code, "external tool finished with warnings");
            }
            Ok(ToolOutput { code, stdout, stderr })
        }
        None => Err(ProcessingError::ToolKilled {
            tool: tool.to_string(),
            stderr,
        }),
    }
}
