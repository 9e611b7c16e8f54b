//! Background capture loop.
//!
//! Runs a frame source on its own thread and hands every frame to a sink.
//! Cancellation is cooperative: the stop flag is checked once per iteration,
//! so stopping waits for the in-flight read to return.

use crate::camera::{Camera, CameraError, CameraStream};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Something that can start a stream of frames.
///
/// The capture thread starts the stream once and reads from it until it
/// stops, so per-stream setup (buffer allocation, warmup) is paid once.
pub trait FrameSource: Send + 'static {
    type Stream<'a>: FrameStream
    where
        Self: 'a;

    fn start(&mut self) -> Result<Self::Stream<'_>, CameraError>;
}

/// A started stream yielding frames one at a time.
pub trait FrameStream {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for Camera {
    type Stream<'a> = CameraStream<'a>;

    fn start(&mut self) -> Result<CameraStream<'_>, CameraError> {
        self.stream()
    }
}

impl FrameStream for CameraStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        CameraStream::next_frame(self)
    }
}

/// Consecutive read failures tolerated before the loop gives up.
const MAX_CONSECUTIVE_ERRORS: usize = 10;

/// Handle to a running capture thread.
pub struct CaptureLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<u64, CameraError>>>,
}

impl CaptureLoop {
    /// Start capturing from `source` on a dedicated thread.
    ///
    /// The sink receives every frame and returns `false` to end the loop.
    pub fn spawn<S, F>(mut source: S, mut sink: F) -> std::io::Result<Self>
    where
        S: FrameSource,
        F: FnMut(Frame) -> bool + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("faceid-capture".into())
            .spawn(move || {
                let mut stream = source.start()?;
                tracing::debug!("capture loop started");
                let mut delivered = 0u64;
                let mut errors = 0usize;

                while !flag.load(Ordering::Acquire) {
                    match stream.next_frame() {
                        Ok(frame) => {
                            errors = 0;
                            delivered += 1;
                            if !sink(frame) {
                                break;
                            }
                        }
                        Err(e) => {
                            errors += 1;
                            tracing::warn!(error = %e, errors, "frame capture failed");
                            if errors >= MAX_CONSECUTIVE_ERRORS {
                                return Err(e);
                            }
                        }
                    }
                }

                tracing::debug!(delivered, "capture loop exiting");
                Ok(delivered)
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Whether the capture thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the loop to stop and wait for it. Returns the number of frames
    /// delivered, or the error that ended the loop.
    pub fn stop(mut self) -> Result<u64, CameraError> {
        self.stop.store(true, Ordering::Release);
        self.join()
    }

    fn join(&mut self) -> Result<u64, CameraError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(CameraError::CaptureFailed("capture thread panicked".into()))),
            None => Ok(0),
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.join();
    }
}
