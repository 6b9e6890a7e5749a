//! Runs the detector on a dedicated OS thread.
//!
//! Uses std::thread (NOT a tokio task) so the FFT loop never competes with
//! the async relay and controller tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::Result;

use super::source::{Chunk, SourceSpec};
use crate::detector::{DetectorCore, DetectorSink, PerformanceMonitor, PerformanceStatus};

pub struct AudioSystem<S: DetectorSink + Send + 'static> {
    running: Arc<AtomicBool>,
    performance: Arc<Mutex<Option<PerformanceStatus>>>,
    handle: Option<JoinHandle<Result<S>>>,
}

impl<S: DetectorSink + Send + 'static> AudioSystem<S> {
    /// Start capturing. The source is opened on the new thread.
    pub fn start(
        source: SourceSpec,
        core: DetectorCore,
        sink: S,
        monitor: Option<PerformanceMonitor>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let performance = Arc::new(Mutex::new(None));

        log::info!(
            "AudioSystem starting: source {:?}, chunk {} @ {} Hz",
            source,
            core.params().chunk_size,
            core.params().sample_rate,
        );

        let handle = {
            let running = running.clone();
            let performance = performance.clone();
            thread::Builder::new()
                .name("beep-detect".into())
                .spawn(move || {
                    let result = detect_thread(&source, core, sink, monitor, &running, &performance);
                    if let Err(e) = &result {
                        log::error!("Detector thread error: {:#}", e);
                    }
                    running.store(false, Ordering::SeqCst);
                    result
                })?
        };

        Ok(Self {
            running,
            performance,
            handle: Some(handle),
        })
    }

    /// Shared flag, cleared to stop the thread between chunks.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Status of the last closed performance window, `None` before the first one.
    pub fn performance(&self) -> Option<PerformanceStatus> {
        self.performance.lock().ok().and_then(|status| *status)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for the thread and take back the sink.
    pub fn join(mut self) -> Result<S> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow::anyhow!("Detector thread already joined"))?;
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("Detector thread panicked"))?
    }
}

impl<S: DetectorSink + Send + 'static> Drop for AudioSystem<S> {
    fn drop(&mut self) {
        self.stop();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn detect_thread<S: DetectorSink>(
    spec: &SourceSpec,
    mut core: DetectorCore,
    mut sink: S,
    mut monitor: Option<PerformanceMonitor>,
    running: &AtomicBool,
    performance: &Mutex<Option<PerformanceStatus>>,
) -> Result<S> {
    let mut source = spec.open()?;
    let mut buf = vec![0i16; core.params().chunk_size];

    log::info!("Detection started on {}", source.describe());

    while running.load(Ordering::Relaxed) {
        match source.read_chunk(&mut buf)? {
            Chunk::Samples(n) => {
                core.process(&buf[..n], &mut sink);
                let status = monitor
                    .as_mut()
                    .and_then(|monitor| monitor.record_chunk(Instant::now()));
                if let (Some(status), Ok(mut slot)) = (status, performance.lock()) {
                    *slot = Some(status);
                }
            }
            Chunk::Dropped => core.discontinuity(),
            Chunk::End => {
                log::info!("End of input after {} chunks", core.chunks());
                break;
            }
        }
    }

    log::info!(
        "Detection stopped, {} chunks, {} discontinuities",
        core.chunks(),
        core.discontinuities()
    );
    Ok(sink)
}

/// Print capture devices for the `list-devices` command.
pub fn list_devices() -> Result<Vec<(String, String)>> {
    #[cfg(feature = "alsa-capture")]
    {
        super::alsa_device::capture_devices()
    }
    #[cfg(not(feature = "alsa-capture"))]
    {
        anyhow::bail!("Built without ALSA support")
    }
}
