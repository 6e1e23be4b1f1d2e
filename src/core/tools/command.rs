//! Child process execution with a deadline.

use crate::error::ToolError;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured output of a finished command
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Run `program` with `args`, killing it if it outlives `timeout`.
///
/// Stdout and stderr are drained on helper threads so a chatty child can
/// never block on a full pipe while we wait for it. A non-zero exit is
/// reported as [`ToolError::Failed`].
pub fn run_command<I, S>(
    tool: &str,
    program: &Path,
    args: I,
    timeout: Duration,
) -> Result<CommandOutput, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotInstalled {
                    tool: tool.to_string(),
                }
            } else {
                ToolError::Io {
                    tool: tool.to_string(),
                    path: program.to_path_buf(),
                    source: e,
                }
            }
        })?;

    let stdout_reader = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            buffer
        })
    });
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            buffer
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                warn!(tool, timeout_secs = timeout.as_secs(), "Killing tool after timeout");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Timeout {
                    tool: tool.to_string(),
                    timeout,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(ToolError::Io {
                    tool: tool.to_string(),
                    path: program.to_path_buf(),
                    source: e,
                });
            }
        }
    };

    let stdout = stdout_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
        .unwrap_or_default();

    debug!(tool, status = ?status.code(), "Tool finished");

    if !status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            status: status.code().unwrap_or(-1),
            stderr,
        });
    }

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

/// Locate an executable on `PATH`
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let sh = find_in_path("sh").unwrap();
        let output = run_command("sh", &sh, ["-c", "printf hello"], Duration::from_secs(5)).unwrap();

        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn nonzero_exit_is_failure_with_stderr() {
        let sh = find_in_path("sh").unwrap();
        let result = run_command("sh", &sh, ["-c", "echo boom >&2; exit 3"], Duration::from_secs(5));

        match result {
            Err(ToolError::Failed { status, stderr, .. }) => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {:?}", other.map(|o| o.status)),
        }
    }

    #[test]
    fn slow_command_times_out() {
        let sh = find_in_path("sh").unwrap();
        let started = Instant::now();
        let result = run_command("sh", &sh, ["-c", "sleep 5"], Duration::from_millis(200));

        assert!(matches!(result, Err(ToolError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_not_installed() {
        let result = run_command(
            "ghost",
            Path::new("/definitely/not/here/ghost-tool"),
            Vec::<String>::new(),
            Duration::from_secs(1),
        );

        assert!(matches!(result, Err(ToolError::NotInstalled { .. })));
    }
}
