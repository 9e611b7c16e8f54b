use faceid_core::gallery::Gallery;
use faceid_core::verify::VerifyError;
use faceid_core::{SimilarityModel, Verification, Verifier};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error("no camera frame available yet")]
    NoFrame,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the controller to the engine thread.
enum EngineRequest {
    Verify {
        probe: RgbImage,
        reply: oneshot::Sender<Result<Verification, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request verification of `probe` against the enrolled gallery.
    pub async fn verify(&self, probe: RgbImage) -> Result<Verification, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                probe,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The verifier (and the model it owns) lives on that thread for the life of
/// the daemon, so the model is loaded at most once.
pub fn spawn_engine<M>(verifier: Verifier<M>, gallery: Gallery) -> Result<EngineHandle, EngineError>
where
    M: SimilarityModel + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("faceid-engine".into())
        .spawn(move || {
            tracing::info!(gallery = %gallery.dir().display(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify { probe, reply } => {
                        let result = verifier.verify(&probe, &gallery).map_err(EngineError::from);
                        if let Err(e) = &result {
                            tracing::warn!(error = %e, "verification attempt failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
