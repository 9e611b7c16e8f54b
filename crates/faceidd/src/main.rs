use anyhow::{Context, Result};
use faceid_core::{Config, Gallery, ModelHandle, ProtectedRegistry, Verifier};
use faceid_hw::{Camera, CaptureLoop};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;
mod guard;
mod monitor;

use guard::{Controller, GuardEvent, GuardStatus, SpawnLauncher};
use monitor::{ProcFs, ProcessMonitor};

/// Pending events between the background loops and the controller.
const EVENT_QUEUE: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("faceidd starting");

    let config = Config::load().context("loading configuration")?;
    let registry = Arc::new(
        ProtectedRegistry::load(config.registry_path()).context("loading protected registry")?,
    );
    let gallery = Gallery::open(config.gallery_dir()).context("opening gallery")?;
    if gallery.is_empty()? {
        tracing::warn!(
            dir = %gallery.dir().display(),
            "no ID images enrolled; verification will fail until `faceid enroll` is run"
        );
    }

    let model = ModelHandle::new(config.model_path());
    let verifier = Verifier::new(model, config.thresholds, config.probe_path());
    let engine = engine::spawn_engine(verifier, gallery)?;

    let (tx, rx) = mpsc::channel::<GuardEvent>(EVENT_QUEUE);

    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    camera.set_warmup(config.warmup_frames);

    let crop = config.crop;
    let frame_tx = tx.clone();
    let capture = CaptureLoop::spawn(camera, move |frame| {
        let frame = frame.crop(crop.x, crop.y, crop.width, crop.height);
        // Drop frames rather than wait on a busy controller
        match frame_tx.try_send(GuardEvent::FrameReady(frame)) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        }
    })?;

    let monitor = ProcessMonitor::new(registry.clone(), ProcFs::new())
        .spawn(Duration::from_millis(config.poll_interval_ms), tx.clone())?;

    let status = Arc::new(Mutex::new(GuardStatus::default()));
    let service = dbus_interface::GuardService::new(registry.clone(), status.clone());
    let _dbus = match serve_dbus(service).await {
        Ok(conn) => Some(conn),
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable; status interface disabled");
            None
        }
    };

    let controller = Controller::new(
        registry,
        engine,
        Duration::from_secs(config.verify_timeout_secs),
        Duration::from_millis(config.max_frame_age_ms),
        tx,
        status,
        Box::new(SpawnLauncher),
    );

    tracing::info!("faceidd ready");

    tokio::select! {
        _ = controller.run(rx) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("faceidd shutting down");
        }
    }

    monitor.stop();
    if let Err(e) = capture.stop() {
        tracing::warn!(error = %e, "capture loop ended with an error");
    }

    Ok(())
}

async fn serve_dbus(service: dbus_interface::GuardService) -> zbus::Result<zbus::Connection> {
    zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
}
