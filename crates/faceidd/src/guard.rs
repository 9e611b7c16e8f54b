//! Controller that owns the daemon's mutable state.
//!
//! Background loops never touch state directly; they send [`GuardEvent`]s
//! and the controller applies them one at a time.

use crate::engine::{EngineError, EngineHandle};
use faceid_core::ProtectedRegistry;
use faceid_hw::Frame;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Messages from the capture loop, the monitor loop and verification tasks.
#[derive(Debug)]
pub enum GuardEvent {
    /// A new (cropped) camera frame.
    FrameReady(Frame),
    /// A protected process was terminated and needs verification.
    ProcessFlagged { name: String, path: Option<PathBuf> },
    /// A verification attempt for `name` finished.
    DecisionReady {
        name: String,
        path: Option<PathBuf>,
        verified: bool,
    },
}

/// Counters exposed over D-Bus.
#[derive(Debug, Default, Clone, Serialize)]
pub struct GuardStatus {
    pub frames_seen: u64,
    pub attempts: u64,
    pub verified: u64,
    pub rejected: u64,
    pub relaunched: u64,
    pub in_flight: Option<String>,
    pub last_message: Option<String>,
}

/// Starts executables again after approval.
pub trait Launcher: Send {
    fn launch(&self, path: &Path) -> std::io::Result<()>;
}

/// Spawns the executable as a detached child.
pub struct SpawnLauncher;

impl Launcher for SpawnLauncher {
    fn launch(&self, path: &Path) -> std::io::Result<()> {
        std::process::Command::new(path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map(|_| ())
    }
}

pub struct Controller {
    registry: Arc<ProtectedRegistry>,
    engine: EngineHandle,
    timeout: Duration,
    max_frame_age: Duration,
    tx: mpsc::Sender<GuardEvent>,
    status: Arc<Mutex<GuardStatus>>,
    launcher: Box<dyn Launcher>,
    latest: Option<Frame>,
    in_flight: Option<String>,
}

impl Controller {
    pub fn new(
        registry: Arc<ProtectedRegistry>,
        engine: EngineHandle,
        timeout: Duration,
        max_frame_age: Duration,
        tx: mpsc::Sender<GuardEvent>,
        status: Arc<Mutex<GuardStatus>>,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        Self {
            registry,
            engine,
            timeout,
            max_frame_age,
            tx,
            status,
            launcher,
            latest: None,
            in_flight: None,
        }
    }

    /// Process events until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<GuardEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        tracing::info!("event channel closed; controller exiting");
    }

    pub fn handle(&mut self, event: GuardEvent) {
        match event {
            GuardEvent::FrameReady(frame) => {
                self.latest = Some(frame);
                self.update_status(|s| s.frames_seen += 1);
            }
            GuardEvent::ProcessFlagged { name, path } => self.start_attempt(name, path),
            GuardEvent::DecisionReady {
                name,
                path,
                verified,
            } => self.apply_decision(name, path, verified),
        }
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    fn start_attempt(&mut self, name: String, path: Option<PathBuf>) {
        if let Some(pending) = &self.in_flight {
            tracing::debug!(app = %name, pending = %pending, "verification already in flight; ignoring");
            return;
        }

        // Only a frame from the last moments counts as captured at decision time
        let probe = match &self.latest {
            Some(frame) if frame.timestamp.elapsed() > self.max_frame_age => {
                tracing::warn!(
                    app = %name,
                    age_ms = frame.timestamp.elapsed().as_millis() as u64,
                    "latest frame is stale; is the camera still capturing?"
                );
                None
            }
            latest => latest.as_ref().and_then(Frame::to_rgb_image),
        };
        let engine = self.engine.clone();
        let tx = self.tx.clone();
        let timeout = self.timeout;
        let app = name.clone();

        tracing::info!(app = %name, "verification requested");
        self.in_flight = Some(name.clone());
        self.update_status(|s| {
            s.attempts += 1;
            s.in_flight = Some(name.clone());
        });

        tokio::spawn(async move {
            let verified = match probe {
                None => {
                    tracing::warn!(app = %app, error = %EngineError::NoFrame, "cannot verify");
                    false
                }
                Some(probe) => match tokio::time::timeout(timeout, engine.verify(probe)).await {
                    Ok(Ok(result)) => result.verified,
                    Ok(Err(e)) => {
                        tracing::warn!(app = %app, error = %e, "verification attempt failed");
                        false
                    }
                    Err(_) => {
                        tracing::warn!(app = %app, timeout_secs = timeout.as_secs(), "verification timed out");
                        false
                    }
                },
            };
            let _ = tx
                .send(GuardEvent::DecisionReady {
                    name: app,
                    path,
                    verified,
                })
                .await;
        });
    }

    fn apply_decision(&mut self, name: String, path: Option<PathBuf>, verified: bool) {
        if self.in_flight.as_deref() == Some(name.as_str()) {
            self.in_flight = None;
        }

        if !verified {
            tracing::info!(app = %name, "Unverified, please try again");
            self.update_status(|s| {
                s.rejected += 1;
                s.in_flight = None;
                s.last_message = Some(format!("{name}: Unverified, please try again"));
            });
            return;
        }

        if let Err(e) = self.registry.approve(&name) {
            tracing::warn!(app = %name, error = %e, "cannot approve application");
        }
        self.update_status(|s| {
            s.verified += 1;
            s.in_flight = None;
            s.last_message = Some(format!("{name}: verified"));
        });

        match path {
            Some(path) if path.exists() => match self.launcher.launch(&path) {
                Ok(()) => {
                    tracing::info!(app = %name, path = %path.display(), "relaunched");
                    self.update_status(|s| s.relaunched += 1);
                }
                Err(e) => tracing::warn!(app = %name, error = %e, "relaunch failed"),
            },
            Some(path) => {
                tracing::warn!(app = %name, path = %path.display(), "executable no longer exists; skipping relaunch");
            }
            None => tracing::warn!(app = %name, "executable path unknown; skipping relaunch"),
        }
    }

    fn update_status(&self, f: impl FnOnce(&mut GuardStatus)) {
        if let Ok(mut status) = self.status.lock() {
            f(&mut status);
        }
    }
}
