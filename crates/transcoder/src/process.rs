//! Supervision of the external transcoder process.
//!
//! The session manager only needs three things from a running transcoder: it can be
//! suspended, resumed and killed. [`Launcher`] hides how the process is started so the
//! manager can be exercised without ffmpeg.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::TranscodeError;

/// File in the session directory that receives the transcoder's stderr.
pub const LOG_FILE: &str = "ffmpeg.log";

/// Everything needed to start one transcoder.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub session_id: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub output_dir: PathBuf,
}

/// How a transcoder process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Every segment was written.
    Success,
    Failed(String),
    /// Terminated through [`TranscodeProcess::kill`].
    Killed,
}

/// Control handle over one running transcoder.
pub trait TranscodeProcess: Send + Sync {
    /// Whether [`suspend`](Self::suspend) freezes the process in place.
    fn can_suspend(&self) -> bool;
    fn suspend(&self) -> Result<(), TranscodeError>;
    fn resume(&self) -> Result<(), TranscodeError>;
    /// Terminate the process. Idempotent.
    fn kill(&self);
}

/// A started process plus a channel that fires once it exits.
pub struct Launched {
    pub process: Box<dyn TranscodeProcess>,
    pub exited: oneshot::Receiver<ProcessExit>,
}

/// Starts transcoder processes.
pub trait Launcher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<Launched, TranscodeError>;
}

/// Production launcher: runs ffmpeg with stderr redirected to [`LOG_FILE`].
#[derive(Debug, Clone, Default)]
pub struct FfmpegLauncher;

impl Launcher for FfmpegLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Launched, TranscodeError> {
        let log_file = std::fs::File::create(spec.output_dir.join(LOG_FILE))
            .map_err(|e| TranscodeError::SpawnFailed(format!("create log: {e}")))?;

        let mut child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::from(log_file))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TranscodeError::BinaryNotFound(spec.program.clone()),
                _ => TranscodeError::SpawnFailed(format!("spawn: {e}")),
            })?;

        let pid = child.id();
        let cancel = CancellationToken::new();
        let exited_flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let token = cancel.clone();
        let flag = exited_flag.clone();
        let session_id = spec.session_id.clone();
        tokio::spawn(async move {
            let exit = tokio::select! {
                status = child.wait() => match status {
                    Ok(s) if s.success() => ProcessExit::Success,
                    Ok(s) => ProcessExit::Failed(s.to_string()),
                    Err(e) => ProcessExit::Failed(e.to_string()),
                },
                _ = token.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    ProcessExit::Killed
                }
            };
            flag.store(true, Ordering::SeqCst);
            debug!(session_id = %session_id, ?exit, "transcoder exited");
            let _ = tx.send(exit);
        });

        info!(
            session_id = %spec.session_id,
            program = ?spec.program,
            args = ?spec.args,
            "spawned transcoder"
        );

        Ok(Launched {
            process: Box::new(FfmpegProcess {
                pid,
                cancel,
                exited: exited_flag,
                suspended: AtomicBool::new(false),
            }),
            exited: rx,
        })
    }
}

struct FfmpegProcess {
    pid: Option<u32>,
    cancel: CancellationToken,
    exited: Arc<AtomicBool>,
    suspended: AtomicBool,
}

impl FfmpegProcess {
    /// Pid of a still-running child. `None` once it has been reaped, so signals
    /// never reach a recycled pid.
    fn live_pid(&self) -> Option<u32> {
        if self.exited.load(Ordering::SeqCst) {
            None
        } else {
            self.pid
        }
    }
}

impl TranscodeProcess for FfmpegProcess {
    fn can_suspend(&self) -> bool {
        cfg!(unix)
    }

    fn suspend(&self) -> Result<(), TranscodeError> {
        let pid = self
            .live_pid()
            .ok_or_else(|| TranscodeError::Signal("process already exited".into()))?;
        signal::stop(pid)?;
        self.suspended.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<(), TranscodeError> {
        if let Some(pid) = self.live_pid() {
            signal::cont(pid)?;
        }
        self.suspended.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn kill(&self) {
        // A stopped process cannot act on SIGKILL until it is continued.
        if self.suspended.swap(false, Ordering::SeqCst) {
            if let Some(pid) = self.live_pid() {
                let _ = signal::cont(pid);
            }
        }
        self.cancel.cancel();
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
mod signal {
    use crate::TranscodeError;

    fn send(pid: u32, sig: libc::c_int) -> Result<(), TranscodeError> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| TranscodeError::Signal(format!("pid {pid} out of range")))?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, sig) };
        if rc == 0 {
            Ok(())
        } else {
            Err(TranscodeError::Signal(
                std::io::Error::last_os_error().to_string(),
            ))
        }
    }

    pub fn stop(pid: u32) -> Result<(), TranscodeError> {
        send(pid, libc::SIGSTOP)
    }

    pub fn cont(pid: u32) -> Result<(), TranscodeError> {
        send(pid, libc::SIGCONT)
    }
}

#[cfg(not(unix))]
mod signal {
    use crate::TranscodeError;

    pub fn stop(_pid: u32) -> Result<(), TranscodeError> {
        Err(TranscodeError::Signal(
            "process suspension is not supported on this platform".into(),
        ))
    }

    pub fn cont(_pid: u32) -> Result<(), TranscodeError> {
        Ok(())
    }
}

/// Last `lines` lines of the transcoder log in `output_dir`, if any.
pub async fn log_tail(output_dir: &Path, lines: usize) -> Option<String> {
    let data = tokio::fs::read_to_string(output_dir.join(LOG_FILE)).await.ok()?;
    let all: Vec<&str> = data.trim().lines().collect();
    if all.is_empty() {
        return None;
    }
    let start = all.len().saturating_sub(lines);
    Some(all[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_tail_keeps_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        tokio::fs::write(dir.path().join(LOG_FILE), body).await.unwrap();

        let tail = log_tail(dir.path(), 20).await.unwrap();
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), 20);
        assert_eq!(lines[0], "line 11");
        assert_eq!(lines[19], "line 30");
    }

    #[tokio::test]
    async fn log_tail_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(log_tail(dir.path(), 20).await.is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec {
            session_id: "s1".into(),
            program: PathBuf::from("/nonexistent/ffmpeg-binary"),
            args: vec![],
            output_dir: dir.path().to_path_buf(),
        };
        let err = FfmpegLauncher.launch(&spec).err().unwrap();
        assert!(matches!(err, TranscodeError::BinaryNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_reports_killed_exit() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec {
            session_id: "s2".into(),
            program: PathBuf::from("sleep"),
            args: vec!["30".into()],
            output_dir: dir.path().to_path_buf(),
        };
        let launched = FfmpegLauncher.launch(&spec).unwrap();
        assert!(launched.process.can_suspend());
        launched.process.suspend().unwrap();
        launched.process.resume().unwrap();
        launched.process.kill();
        assert_eq!(launched.exited.await.unwrap(), ProcessExit::Killed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_process_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec {
            session_id: "s3".into(),
            program: PathBuf::from("false"),
            args: vec![],
            output_dir: dir.path().to_path_buf(),
        };
        let launched = FfmpegLauncher.launch(&spec).unwrap();
        assert!(matches!(launched.exited.await.unwrap(), ProcessExit::Failed(_)));
    }
}
