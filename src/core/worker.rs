//! Worker subprocesses and the line protocol used to drive them
//!
//! A worker is started with its first file as a positional argument.
//! After that, every line written to its stdin is one more file to
//! validate and every line it prints on stdout is the path of the report
//! fragment for the file it just finished. A reserved exit token on stdin
//! asks it to terminate.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::exit_status::WorkerExitStatus;
use crate::config::BatchConfig;
use crate::error::{BatchError, Result};
use crate::reporting::ReportFormat;

#[cfg(windows)]
pub const LAUNCHER_SCRIPT: &str = "verapdf.bat";
#[cfg(not(windows))]
pub const LAUNCHER_SCRIPT: &str = "verapdf";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Protocol endpoint for one worker
pub trait WorkerChannel {
    /// Send the next file to validate
    fn submit(&mut self, path: &Path) -> io::Result<()>;

    /// Block for the report path of the file last submitted; `None` once
    /// the worker has closed its output
    fn next_result(&mut self) -> io::Result<Option<PathBuf>>;

    /// Send the exit token and wait for the worker to terminate
    fn close(&mut self) -> WorkerExitStatus;

    /// Kill the worker after a protocol failure and reap it
    fn abort(&mut self) -> WorkerExitStatus;
}

/// Starts workers already primed with their first file
pub trait WorkerLauncher: Send + Sync {
    type Channel: WorkerChannel + Send + 'static;

    fn launch(&self, first: &Path) -> Result<Self::Channel>;
}

/// Fixed command line shared by every worker of a batch
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    /// Arguments placed before everything else, e.g. the script for an
    /// interpreter
    pub leading_args: Vec<OsString>,
    /// Validation flags passed through from the user
    pub worker_args: Vec<String>,
    pub single_file_flag: String,
    pub format_flag: String,
    pub format: ReportFormat,
    pub exit_token: String,
    pub timeout: Option<Duration>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let defaults = BatchConfig::default();
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            worker_args: Vec::new(),
            single_file_flag: defaults.single_file_flag,
            format_flag: defaults.format_flag,
            format: defaults.format,
            exit_token: defaults.exit_token,
            timeout: None,
        }
    }

    /// Build the command from configuration, locating the executable
    pub fn resolve(config: &BatchConfig) -> Result<Self> {
        let program = resolve_executable(config.worker_executable.as_deref())?;
        Ok(Self {
            program,
            leading_args: Vec::new(),
            worker_args: config.worker_args.clone(),
            single_file_flag: config.single_file_flag.clone(),
            format_flag: config.format_flag.clone(),
            format: config.format,
            exit_token: config.exit_token.clone(),
            timeout: config.worker_timeout(),
        })
    }

    /// Full argument list for a worker primed with `first`
    pub fn args_for(&self, first: &Path) -> Vec<OsString> {
        let mut args = self.leading_args.clone();
        args.extend(self.worker_args.iter().map(OsString::from));
        args.push(OsString::from(&self.single_file_flag));
        args.push(OsString::from(&self.format_flag));
        args.push(OsString::from(self.format.worker_arg()));
        args.push(first.as_os_str().to_os_string());
        args
    }
}

/// Locate the worker executable
///
/// An explicit path wins; a bare name is looked up on `PATH`. Without one,
/// the launcher script installed next to this binary is used, then the
/// script found on `PATH`.
pub fn resolve_executable(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return which::which(path)
            .map_err(|_| BatchError::WorkerNotFound(path.display().to_string()));
    }

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let candidate = dir.join(LAUNCHER_SCRIPT);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    which::which(LAUNCHER_SCRIPT).map_err(|_| BatchError::WorkerNotFound(LAUNCHER_SCRIPT.to_string()))
}

/// A worker running as a child process
pub struct ProcessWorker {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<io::Result<Vec<u8>>>,
    exit_token: String,
    timeout: Option<Duration>,
    reaped: bool,
}

impl ProcessWorker {
    pub fn spawn(command: &WorkerCommand, first: &Path) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(command.args_for(first))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| BatchError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BatchError::Protocol("worker stdout was not captured".to_string()));
            }
        };

        // Lines are forwarded over a channel so reads can time out
        let (sender, lines) = unbounded();
        let pid = child.id();
        let reader = thread::Builder::new()
            .name(format!("worker-{}-stdout", pid))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                loop {
                    let mut line = Vec::new();
                    let read = match reader.read_until(b'\n', &mut line) {
                        Ok(0) => break,
                        Ok(_) => Ok(trim_line_end(line)),
                        Err(e) => Err(e),
                    };
                    let failed = read.is_err();
                    if sender.send(read).is_err() || failed {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BatchError::Io(e));
        }

        debug!(pid, program = %command.program.display(), first = %first.display(), "worker started");
        Ok(Self {
            child,
            stdin,
            lines,
            exit_token: command.exit_token.clone(),
            timeout: command.timeout,
            reaped: false,
        })
    }

    fn send_line(&mut self, line: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin already closed"))?;
        stdin.write_all(line)?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    fn reap(&mut self) -> WorkerExitStatus {
        self.stdin = None;
        match self.child.wait() {
            Ok(status) => {
                self.reaped = true;
                WorkerExitStatus::from_process(status)
            }
            Err(e) => {
                warn!(pid = self.child.id(), error = %e, "failed to wait for worker");
                WorkerExitStatus::IoError
            }
        }
    }

    /// Wait for a worker that was asked to exit, killing it once the
    /// timeout runs out
    fn reap_within(&mut self, timeout: Duration) -> WorkerExitStatus {
        self.stdin = None;
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.reaped = true;
                    return WorkerExitStatus::from_process(status);
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => {
                    warn!(pid = self.child.id(), ?timeout, "worker ignored exit token, killing it");
                    self.abort();
                    return WorkerExitStatus::IoError;
                }
                Err(e) => {
                    warn!(pid = self.child.id(), error = %e, "failed to poll worker");
                    return self.abort().worst(WorkerExitStatus::IoError);
                }
            }
        }
    }
}

fn trim_line_end(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    line
}

/// Encode a path as one protocol line
#[cfg(unix)]
fn path_to_line(path: &Path) -> io::Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(path.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
fn path_to_line(path: &Path) -> io::Result<Vec<u8>> {
    path.to_str().map(|s| s.as_bytes().to_vec()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path is not valid Unicode: {}", path.display()),
        )
    })
}

#[cfg(unix)]
fn line_to_path(line: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(OsString::from_vec(line))
}

#[cfg(not(unix))]
fn line_to_path(line: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&line).into_owned())
}

impl WorkerChannel for ProcessWorker {
    fn submit(&mut self, path: &Path) -> io::Result<()> {
        let line = path_to_line(path)?;
        if line.iter().any(|&b| b == b'\n' || b == b'\r') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path contains a line break: {}", path.display()),
            ));
        }
        self.send_line(&line)
    }

    fn next_result(&mut self) -> io::Result<Option<PathBuf>> {
        loop {
            let received = match self.timeout {
                Some(timeout) => match self.lines.recv_timeout(timeout) {
                    Ok(line) => line,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no result from worker within {:?}", timeout),
                        ))
                    }
                    Err(RecvTimeoutError::Disconnected) => return Ok(None),
                },
                None => match self.lines.recv() {
                    Ok(line) => line,
                    Err(_) => return Ok(None),
                },
            };

            let line = received?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line_to_path(line)));
        }
    }

    fn close(&mut self) -> WorkerExitStatus {
        let token = self.exit_token.clone();
        if let Err(e) = self.send_line(token.as_bytes()) {
            // The worker may already have exited on its own
            debug!(pid = self.child.id(), error = %e, "could not send exit token");
        }
        match self.timeout {
            Some(timeout) => self.reap_within(timeout),
            None => self.reap(),
        }
    }

    fn abort(&mut self) -> WorkerExitStatus {
        if let Err(e) = self.child.kill() {
            debug!(pid = self.child.id(), error = %e, "kill failed, worker probably exited");
        }
        self.reap()
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Launches [`ProcessWorker`]s from a resolved command
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: WorkerCommand,
}

impl ProcessLauncher {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }
}

impl WorkerLauncher for ProcessLauncher {
    type Channel = ProcessWorker;

    fn launch(&self, first: &Path) -> Result<ProcessWorker> {
        ProcessWorker::spawn(&self.command, first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_args_place_first_file_last() {
        let mut command = WorkerCommand::new("/opt/verapdf/verapdf");
        command.worker_args = vec!["--flavour".to_string(), "1b".to_string()];
        command.format = ReportFormat::Text;

        let args = command.args_for(Path::new("/docs/a.pdf"));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["--flavour", "1b", "--servermode", "--format", "text", "/docs/a.pdf"]
        );
    }

    #[test]
    fn test_explicit_missing_executable_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("no-such-validator");
        let err = resolve_executable(Some(&missing)).unwrap_err();
        assert!(matches!(err, BatchError::WorkerNotFound(_)));
        assert_eq!(err.exit_status(), WorkerExitStatus::StartFailure);
    }

    #[test]
    fn test_explicit_existing_executable_is_used() {
        let temp_dir = TempDir::new().unwrap();
        let exe = temp_dir.path().join("validator");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        assert_eq!(resolve_executable(Some(&exe)).unwrap(), exe);
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let command = WorkerCommand::new("/definitely/not/a/real/program");
        let err = ProcessWorker::spawn(&command, Path::new("/docs/a.pdf")).err().unwrap();
        assert!(matches!(err, BatchError::Spawn { .. }));
    }

    #[cfg(unix)]
    fn sh_command(script: &str, timeout: Option<Duration>) -> WorkerCommand {
        let mut command = WorkerCommand::new("/bin/sh");
        command.leading_args = vec![OsString::from("-c"), OsString::from(script), OsString::from("worker")];
        command.timeout = timeout;
        command
    }

    #[cfg(unix)]
    #[test]
    fn test_process_worker_line_protocol() {
        // Echo "<file>.report" for the primed file and each submitted one
        let script = r#"
            for last; do :; done
            echo "$last.report"
            while read line; do
                [ "$line" = "--exit" ] && exit 1
                echo "$line.report"
            done
            exit 8
        "#;
        let command = sh_command(script, Some(Duration::from_secs(10)));
        let mut worker = ProcessWorker::spawn(&command, Path::new("/docs/a.pdf")).unwrap();

        assert_eq!(
            worker.next_result().unwrap(),
            Some(PathBuf::from("/docs/a.pdf.report"))
        );
        worker.submit(Path::new("/docs/b.pdf")).unwrap();
        assert_eq!(
            worker.next_result().unwrap(),
            Some(PathBuf::from("/docs/b.pdf.report"))
        );
        assert_eq!(worker.close(), WorkerExitStatus::Invalid);
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_worker_times_out() {
        let command = sh_command("sleep 30", Some(Duration::from_millis(200)));
        let mut worker = ProcessWorker::spawn(&command, Path::new("/docs/a.pdf")).unwrap();

        let err = worker.next_result().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(worker.abort(), WorkerExitStatus::Interrupted);
    }

    #[cfg(unix)]
    #[test]
    fn test_early_exit_reads_as_end_of_stream() {
        let command = sh_command("exit 6", None);
        let mut worker = ProcessWorker::spawn(&command, Path::new("/docs/a.pdf")).unwrap();
        assert_eq!(worker.next_result().unwrap(), None);
        assert_eq!(worker.close(), WorkerExitStatus::ParseFailure);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_cross_the_protocol() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let script = r#"
            for last; do :; done
            echo "$last.report"
            while IFS= read -r line; do
                [ "$line" = "--exit" ] && exit 0
                printf '%s.report\n' "$line"
            done
            exit 8
        "#;
        let command = sh_command(script, Some(Duration::from_secs(10)));
        let mut worker = ProcessWorker::spawn(&command, Path::new("/docs/a.pdf")).unwrap();
        assert_eq!(
            worker.next_result().unwrap(),
            Some(PathBuf::from("/docs/a.pdf.report"))
        );

        worker.submit(Path::new(OsStr::from_bytes(b"/docs/caf\xe9.pdf"))).unwrap();
        assert_eq!(
            worker.next_result().unwrap(),
            Some(PathBuf::from(OsStr::from_bytes(b"/docs/caf\xe9.pdf.report")))
        );
        assert_eq!(worker.close(), WorkerExitStatus::Valid);
    }

    #[cfg(unix)]
    #[test]
    fn test_worker_ignoring_exit_token_is_killed() {
        let script = r#"
            for last; do :; done
            echo "$last.report"
            exec sleep 30
        "#;
        let command = sh_command(script, Some(Duration::from_millis(300)));
        let mut worker = ProcessWorker::spawn(&command, Path::new("/docs/a.pdf")).unwrap();
        assert!(worker.next_result().unwrap().is_some());

        let started = Instant::now();
        assert_eq!(worker.close(), WorkerExitStatus::IoError);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_submit_rejects_line_breaks() {
        let command = sh_command("read line; exit 0", None);
        let mut worker = ProcessWorker::spawn(&command, Path::new("/docs/a.pdf")).unwrap();
        let err = worker.submit(Path::new("/docs/evil\nname.pdf")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(worker.close(), WorkerExitStatus::Valid);
    }
}
