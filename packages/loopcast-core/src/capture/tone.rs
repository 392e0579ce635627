use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{CaptureError, CaptureSink, CaptureStream};
use crate::stream::AudioFormat;

/// Peak amplitude as a fraction of full scale.
const TONE_AMPLITUDE: f32 = 0.25;

/// Generates a sine wave in real time on a dedicated thread.
pub struct ToneCaptureStream {
    device_id: String,
    generator: SineGenerator,
    chunk_ms: u32,
    sink: Arc<dyn CaptureSink>,
    running: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl ToneCaptureStream {
    pub fn new(
        device_id: String,
        frequency_hz: f32,
        format: AudioFormat,
        chunk_ms: u32,
        sink: Arc<dyn CaptureSink>,
    ) -> Self {
        Self {
            device_id,
            generator: SineGenerator::new(frequency_hz, format),
            chunk_ms: chunk_ms.max(1),
            sink,
            running: None,
        }
    }
}

impl CaptureStream for ToneCaptureStream {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Ok(());
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let thread_stopping = Arc::clone(&stopping);
        let sink = Arc::clone(&self.sink);
        let mut generator = self.generator.clone();
        let chunk_ms = self.chunk_ms;

        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", self.device_id))
            .spawn(move || {
                let period = Duration::from_millis(chunk_ms as u64);
                let mut chunk = Vec::new();
                let mut next = Instant::now();
                while !thread_stopping.load(Ordering::SeqCst) {
                    generator.fill(&mut chunk, chunk_ms);
                    sink.on_data(&chunk);

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        // Fell behind (suspended?); don't try to catch up in a burst.
                        next = now;
                    }
                }
            })
            .map_err(|e| CaptureError::StartFailed(format!("tone thread: {}", e)))?;

        log::info!(
            "[Capture] {}: tone at {} Hz",
            self.device_id,
            self.generator.frequency_hz
        );
        self.running = Some((stopping, handle));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((stopping, handle)) = self.running.take() {
            stopping.store(true, Ordering::SeqCst);
            let _ = handle.join();
            log::info!("[Capture] {}: tone stopped", self.device_id);
        }
    }
}

impl Drop for ToneCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Phase-continuous s16le sine generator.
#[derive(Debug, Clone)]
struct SineGenerator {
    frequency_hz: f32,
    format: AudioFormat,
    phase: f32,
}

impl SineGenerator {
    fn new(frequency_hz: f32, format: AudioFormat) -> Self {
        Self {
            frequency_hz,
            format,
            phase: 0.0,
        }
    }

    /// Replaces `out` with `duration_ms` of interleaved frames.
    fn fill(&mut self, out: &mut Vec<u8>, duration_ms: u32) {
        let len = self.format.frame_bytes(duration_ms);
        let frames = len / self.format.block_align();
        let step = TAU * self.frequency_hz / self.format.sample_rate as f32;

        out.clear();
        out.reserve(len);
        for _ in 0..frames {
            let sample = (self.phase.sin() * TONE_AMPLITUDE * i16::MAX as f32) as i16;
            for _ in 0..self.format.channels {
                out.extend_from_slice(&sample.to_le_bytes());
            }
            self.phase = (self.phase + step) % TAU;
        }
    }
}
