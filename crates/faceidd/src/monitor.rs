//! Protected-process monitor.
//!
//! Polls the process table and terminates any protected executable that has
//! not been approved, reporting it to the controller for verification.

use crate::guard::GuardEvent;
use faceid_core::ProtectedRegistry;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Linux truncates `/proc/<pid>/comm` to this many bytes.
const COMM_MAX: usize = 15;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("process {0} no longer exists")]
    NoSuchProcess(u32),
    #[error("failed to signal process {pid}: {errno}")]
    Signal { pid: u32, errno: Errno },
}

/// One running process as seen by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

/// OS process table.
pub trait ProcessTable: Send + 'static {
    fn processes(&self) -> Vec<ProcessInfo>;
    /// Ask the process to exit. Does not wait for it.
    fn terminate(&self, pid: u32) -> Result<(), MonitorError>;
}

/// `/proc`-backed process table.
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_process(&self, dir: &Path, pid: u32) -> Option<ProcessInfo> {
        let comm = std::fs::read_to_string(dir.join("comm")).ok()?;
        let comm = comm.trim_end_matches('\n').to_string();
        let exe = std::fs::read_link(dir.join("exe")).ok();

        // comm is truncated; prefer the executable's file name when it extends it
        let name = match exe.as_ref().and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
            Some(exe_name) if comm.len() >= COMM_MAX && exe_name.starts_with(&comm) => {
                exe_name.to_string()
            }
            _ => comm,
        };

        Some(ProcessInfo { pid, name, exe })
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for ProcFs {
    fn processes(&self) -> Vec<ProcessInfo> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            tracing::warn!(root = %self.root.display(), "cannot read process table");
            return Vec::new();
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
                self.read_process(&entry.path(), pid)
            })
            .collect()
    }

    fn terminate(&self, pid: u32) -> Result<(), MonitorError> {
        let raw = i32::try_from(pid).map_err(|_| MonitorError::NoSuchProcess(pid))?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(MonitorError::NoSuchProcess(pid)),
            Err(errno) => Err(MonitorError::Signal { pid, errno }),
        }
    }
}

/// A protected process that was terminated pending verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlaggedProcess {
    pub name: String,
    pub path: Option<PathBuf>,
}

pub struct ProcessMonitor<T> {
    registry: Arc<ProtectedRegistry>,
    table: T,
    own_pid: u32,
}

impl<T: ProcessTable> ProcessMonitor<T> {
    pub fn new(registry: Arc<ProtectedRegistry>, table: T) -> Self {
        Self {
            registry,
            table,
            own_pid: std::process::id(),
        }
    }

    /// One pass over the process table.
    ///
    /// The registry file is re-read first so `faceid protect` and
    /// `faceid unprotect` take effect without a restart.
    pub fn scan_once(&self) -> Vec<FlaggedProcess> {
        let mut flagged = Vec::new();

        if let Err(e) = self.registry.reload() {
            tracing::warn!(error = %e, "keeping previous protected list");
        }

        for proc in self.table.processes() {
            if proc.pid == self.own_pid {
                continue;
            }
            match self.registry.is_approved(&proc.name) {
                Ok(Some(false)) => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "registry unavailable; skipping scan");
                    return flagged;
                }
            }

            match self.table.terminate(proc.pid) {
                Ok(()) => {
                    tracing::info!(app = %proc.name, pid = proc.pid, "terminated protected process");
                    flagged.push(FlaggedProcess {
                        name: proc.name,
                        path: proc.exe,
                    });
                }
                Err(MonitorError::NoSuchProcess(pid)) => {
                    tracing::debug!(app = %proc.name, pid, "process exited before termination");
                }
                Err(e) => {
                    tracing::warn!(app = %proc.name, error = %e, "failed to terminate protected process");
                }
            }
        }

        flagged
    }

    /// Poll every `interval` on a dedicated thread, forwarding flagged
    /// processes to the controller.
    pub fn spawn(self, interval: Duration, tx: mpsc::Sender<GuardEvent>) -> std::io::Result<MonitorHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("faceid-monitor".into())
            .spawn(move || {
                tracing::info!(interval_ms = interval.as_millis() as u64, "process monitor started");
                while !flag.load(Ordering::Acquire) {
                    for FlaggedProcess { name, path } in self.scan_once() {
                        if tx.blocking_send(GuardEvent::ProcessFlagged { name, path }).is_err() {
                            tracing::info!("controller gone; process monitor exiting");
                            return;
                        }
                    }
                    std::thread::sleep(interval);
                }
                tracing::info!("process monitor stopped");
            })?;

        Ok(MonitorHandle {
            stop,
            handle: Some(handle),
        })
    }
}

pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
