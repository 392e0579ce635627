//! Capture source multiplexer.
//!
//! Keeps exactly one open capture stream per physical device and fans every
//! hardware chunk out to the ring buffers of all attached consumers. Capture
//! starts with the first attachment and stops with the last detachment.
//!
//! Locking: the registry lock serialises attach/detach; each device handle
//! has one coarse lock over its buffer set, held for a whole fan-out burst
//! and for each consumer read. Order is always registry, then handle.
//! Capture streams are stopped outside both locks since `stop` joins the
//! capture thread, which may be waiting on the handle lock. On a tokio
//! worker the stop runs on the blocking pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use super::ring_buffer::{BufferError, RingBuffer};
use super::transform::InputTransform;
use crate::capture::{CaptureBackend, CaptureDevice, CaptureError, CaptureSink, CaptureStream};
use crate::events::{CaptureEvent, EventEmitter};
use crate::utils::now_millis;

/// Errors from attaching a consumer.
#[derive(Debug, Error)]
pub enum MultiplexerError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The preamble couldn't be written into the new buffer.
    #[error("failed to seed buffer: {0}")]
    Buffer(#[from] BufferError),
}

/// A device with live capture, as reported by
/// [`CaptureMultiplexer::active_devices`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDevice {
    pub device_id: String,
    pub consumers: usize,
    pub failed: bool,
}

/// Shares capture devices between any number of consumers.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct CaptureMultiplexer {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    backend: Arc<dyn CaptureBackend>,
    buffer_capacity: usize,
    handles: Mutex<HashMap<String, Arc<DeviceHandle>>>,
    emitter: Arc<dyn EventEmitter>,
    next_buffer_id: AtomicU64,
}

/// One physical device: its capture stream plus the attached buffers.
struct DeviceHandle {
    device: CaptureDevice,
    fan_out: Arc<FanOut>,
    stream: Mutex<Option<Box<dyn CaptureStream>>>,
}

/// The capture sink. Owns the buffer set; the capture stream holds it, so
/// it must not point back at the handle.
struct FanOut {
    device_id: String,
    buffers: Mutex<Vec<BufferEntry>>,
    failed: AtomicBool,
    emitter: Arc<dyn EventEmitter>,
}

struct BufferEntry {
    id: u64,
    ring: RingBuffer,
    error: Option<BufferError>,
}

impl CaptureSink for FanOut {
    fn on_data(&self, chunk: &[u8]) {
        let mut buffers = self.buffers.lock();
        for entry in buffers.iter_mut() {
            if entry.error.is_some() {
                continue;
            }
            match entry.ring.write(chunk) {
                Ok(()) => {}
                // Only this chunk is lost; the buffer keeps receiving.
                Err(e @ BufferError::CapacityExceeded { .. }) => {
                    log::warn!(
                        "[Capture] {}: dropped chunk for buffer {}: {}",
                        self.device_id,
                        entry.id,
                        e
                    );
                }
                Err(e @ BufferError::Transform(_)) => {
                    log::warn!(
                        "[Capture] {}: write to buffer {} failed: {}",
                        self.device_id,
                        entry.id,
                        e
                    );
                    entry.error = Some(e);
                }
            }
        }
    }

    fn on_error(&self, error: CaptureError) {
        if self.failed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::error!("[Capture] {}: {}", self.device_id, error);
        self.emitter.emit_capture(CaptureEvent::Failed {
            device_id: self.device_id.clone(),
            error: error.to_string(),
            timestamp: now_millis(),
        });
    }
}

impl DeviceHandle {
    fn is_failed(&self) -> bool {
        self.fan_out.failed.load(Ordering::SeqCst)
    }
}

impl CaptureMultiplexer {
    /// Creates a multiplexer giving each consumer a ring of
    /// `buffer_capacity` bytes.
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        buffer_capacity: usize,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                backend,
                buffer_capacity,
                handles: Mutex::new(HashMap::new()),
                emitter,
                next_buffer_id: AtomicU64::new(1),
            }),
        }
    }

    /// Devices the backend can capture from.
    #[must_use]
    pub fn devices(&self) -> Vec<CaptureDevice> {
        self.inner.backend.devices()
    }

    /// Resolves a device id, or the default device when `None`.
    pub fn resolve_device(&self, device_id: Option<&str>) -> Result<CaptureDevice, CaptureError> {
        match device_id {
            Some(id) => self
                .inner
                .backend
                .device(id)
                .ok_or_else(|| CaptureError::UnknownDevice(id.to_string())),
            None => self
                .inner
                .backend
                .default_device()
                .ok_or(CaptureError::NoDevices),
        }
    }

    /// Devices with capture currently running, with consumer counts.
    #[must_use]
    pub fn active_devices(&self) -> Vec<ActiveDevice> {
        let handles = self.inner.handles.lock();
        let mut active: Vec<_> = handles
            .values()
            .map(|h| ActiveDevice {
                device_id: h.device.id.clone(),
                consumers: h.fan_out.buffers.lock().len(),
                failed: h.is_failed(),
            })
            .collect();
        active.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        active
    }

    /// Attaches a new ring buffer to `device_id` (default device if `None`).
    ///
    /// `transform` is applied to every chunk written into the new buffer.
    /// `preamble` (e.g. a WAV header) is written first, untransformed by
    /// capture timing: it's in the buffer before the buffer joins the set.
    /// Starts capture if this is the device's first consumer.
    pub fn attach(
        &self,
        device_id: Option<&str>,
        transform: Box<dyn InputTransform>,
        preamble: &[u8],
    ) -> Result<BufferLease, MultiplexerError> {
        let device = self.resolve_device(device_id)?;

        let mut ring = RingBuffer::new(self.inner.buffer_capacity, transform);
        if !preamble.is_empty() {
            ring.write(preamble)?;
        }
        let buffer_id = self.inner.next_buffer_id.fetch_add(1, Ordering::Relaxed);
        let entry = BufferEntry {
            id: buffer_id,
            ring,
            error: None,
        };

        let mut stale = None;
        let handle = {
            let mut handles = self.inner.handles.lock();

            let existing = handles.get(&device.id).cloned();
            let reusable = match existing {
                Some(h) if h.is_failed() => {
                    log::info!("[Capture] {}: reopening after failure", device.id);
                    handles.remove(&device.id);
                    stale = h.stream.lock().take();
                    None
                }
                other => other,
            };

            match reusable {
                Some(handle) => {
                    handle.fan_out.buffers.lock().push(entry);
                    handle
                }
                None => {
                    let handle = self.inner.open_handle(device, entry)?;
                    handles.insert(handle.device.id.clone(), Arc::clone(&handle));
                    handle
                }
            }
        };

        if let Some(stream) = stale {
            stop_capture(stream, handle.device.id.clone(), None);
        }

        log::debug!(
            "[Capture] {}: attached buffer {}",
            handle.device.id,
            buffer_id
        );
        Ok(BufferLease {
            id: buffer_id,
            handle,
            mux: Arc::clone(&self.inner),
            detached: false,
        })
    }

    /// Releases a lease. Same as dropping it.
    pub fn detach(&self, mut lease: BufferLease) {
        lease.detach();
    }

    /// Stops every capture stream. Attached leases see
    /// [`BufferLease::source_failed`] afterwards.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.inner.handles.lock().drain().map(|(_, h)| h).collect();
        for handle in drained {
            handle.fan_out.failed.store(true, Ordering::SeqCst);
            let stream = handle.stream.lock().take();
            if let Some(mut stream) = stream {
                stream.stop();
            }
            self.inner.emitter.emit_capture(CaptureEvent::Stopped {
                device_id: handle.device.id.clone(),
                timestamp: now_millis(),
            });
        }
    }
}

impl MuxInner {
    /// Opens and starts capture with `first` already in the buffer set.
    /// Called with the registry lock held.
    fn open_handle(
        &self,
        device: CaptureDevice,
        first: BufferEntry,
    ) -> Result<Arc<DeviceHandle>, CaptureError> {
        let fan_out = Arc::new(FanOut {
            device_id: device.id.clone(),
            buffers: Mutex::new(vec![first]),
            failed: AtomicBool::new(false),
            emitter: Arc::clone(&self.emitter),
        });

        let sink: Arc<dyn CaptureSink> = fan_out.clone();
        let mut stream = self.backend.open(&device, sink)?;
        stream.start()?;

        log::info!("[Capture] {}: capture started", device.id);
        self.emitter.emit_capture(CaptureEvent::Started {
            device_id: device.id.clone(),
            timestamp: now_millis(),
        });

        Ok(Arc::new(DeviceHandle {
            device,
            fan_out,
            stream: Mutex::new(Some(stream)),
        }))
    }

    fn detach(&self, handle: &Arc<DeviceHandle>, buffer_id: u64) {
        let stream = {
            let mut handles = self.handles.lock();
            let mut buffers = handle.fan_out.buffers.lock();
            buffers.retain(|e| e.id != buffer_id);
            if !buffers.is_empty() {
                return;
            }
            drop(buffers);

            // A failed handle may already have been replaced by a fresh one.
            if handles
                .get(&handle.device.id)
                .is_some_and(|h| Arc::ptr_eq(h, handle))
            {
                handles.remove(&handle.device.id);
            }
            handle.stream.lock().take()
        };

        if let Some(stream) = stream {
            log::info!("[Capture] {}: last consumer gone, stopping capture", handle.device.id);
            stop_capture(
                stream,
                handle.device.id.clone(),
                Some(Arc::clone(&self.emitter)),
            );
        }
    }
}

/// Stops a capture stream that has left the registry.
///
/// `stop` joins the capture thread (and reaps a child process), so on a
/// tokio worker it is moved to the blocking pool. Outside a runtime it runs
/// inline. `Stopped` is emitted once the stream is down.
fn stop_capture(
    mut stream: Box<dyn CaptureStream>,
    device_id: String,
    emitter: Option<Arc<dyn EventEmitter>>,
) {
    let stop = move || {
        stream.stop();
        log::debug!("[Capture] {}: capture stream stopped", device_id);
        if let Some(emitter) = emitter {
            emitter.emit_capture(CaptureEvent::Stopped {
                device_id,
                timestamp: now_millis(),
            });
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(stop);
        }
        Err(_) => stop(),
    }
}

/// A consumer's attachment to a capture device.
///
/// Detaches on drop.
pub struct BufferLease {
    id: u64,
    handle: Arc<DeviceHandle>,
    mux: Arc<MuxInner>,
    detached: bool,
}

impl BufferLease {
    #[must_use]
    pub fn device(&self) -> &CaptureDevice {
        &self.handle.device
    }

    /// Runs `f` on this lease's ring buffer under the device lock.
    ///
    /// Returns `None` once detached. Keep `f` short and free of I/O: capture
    /// delivery waits for it.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut RingBuffer) -> R) -> Option<R> {
        if self.detached {
            return None;
        }
        let mut buffers = self.handle.fan_out.buffers.lock();
        buffers
            .iter_mut()
            .find(|e| e.id == self.id)
            .map(|e| f(&mut e.ring))
    }

    /// Whether the device stopped delivering (process exit, shutdown, ...).
    #[must_use]
    pub fn source_failed(&self) -> bool {
        self.handle.is_failed()
    }

    /// The transform error that disabled this buffer, if any. Once set, the
    /// buffer receives no further data. Oversized chunks are dropped without
    /// setting it.
    #[must_use]
    pub fn write_error(&self) -> Option<BufferError> {
        let buffers = self.handle.fan_out.buffers.lock();
        buffers
            .iter()
            .find(|e| e.id == self.id)
            .and_then(|e| e.error.clone())
    }

    /// Removes the buffer; stops capture if it was the last one. Idempotent.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.mux.detach(&self.handle, self.id);
        log::debug!(
            "[Capture] {}: detached buffer {}",
            self.handle.device.id,
            self.id
        );
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferLease")
            .field("id", &self.id)
            .field("device", &self.handle.device.id)
            .field("detached", &self.detached)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::CaptureSourceSpec;
    use crate::events::NoopEventEmitter;
    use crate::stream::transform::{EndianTransform, IdentityTransform};
    use crate::stream::AudioFormat;
    use std::sync::atomic::AtomicUsize;
    use std::thread::{self, ThreadId};
    use std::time::{Duration, Instant};

    /// Backend whose streams do nothing; tests drive the captured sinks.
    #[derive(Default)]
    pub(crate) struct MockBackend {
        pub sinks: Mutex<Vec<Arc<dyn CaptureSink>>>,
        pub starts: AtomicUsize,
        pub stops: Arc<AtomicUsize>,
        pub fail_start: AtomicBool,
        /// Thread each stop ran on.
        pub stop_threads: Arc<Mutex<Vec<ThreadId>>>,
    }

    struct MockStream {
        stops: Arc<AtomicUsize>,
        stop_threads: Arc<Mutex<Vec<ThreadId>>>,
        stopped: bool,
    }

    impl CaptureStream for MockStream {
        fn start(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        fn stop(&mut self) {
            if !self.stopped {
                self.stopped = true;
                self.stop_threads.lock().push(thread::current().id());
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub(crate) fn device(id: &str) -> CaptureDevice {
        CaptureDevice {
            id: id.into(),
            name: id.into(),
            is_default: id == "main",
            format: AudioFormat::new(48000, 2, 16),
            source: CaptureSourceSpec::Tone {
                frequency_hz: 440.0,
            },
        }
    }

    impl MockBackend {
        /// Delivers `chunk` through the most recently opened sink.
        pub fn push(&self, chunk: &[u8]) {
            let sink = self.sinks.lock().last().cloned().expect("no open stream");
            sink.on_data(chunk);
        }

        pub fn fail(&self, error: CaptureError) {
            let sink = self.sinks.lock().last().cloned().expect("no open stream");
            sink.on_error(error);
        }
    }

    impl CaptureBackend for MockBackend {
        fn devices(&self) -> Vec<CaptureDevice> {
            vec![device("main"), device("aux")]
        }

        fn open(
            &self,
            _device: &CaptureDevice,
            sink: Arc<dyn CaptureSink>,
        ) -> Result<Box<dyn CaptureStream>, CaptureError> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(CaptureError::StartFailed("mock".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.sinks.lock().push(sink);
            Ok(Box::new(MockStream {
                stops: Arc::clone(&self.stops),
                stop_threads: Arc::clone(&self.stop_threads),
                stopped: false,
            }))
        }
    }

    fn mux() -> (CaptureMultiplexer, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::default());
        let mux = CaptureMultiplexer::new(backend.clone(), 64, Arc::new(NoopEventEmitter));
        (mux, backend)
    }

    fn drain(lease: &BufferLease) -> Vec<u8> {
        lease
            .with_buffer(|rb| {
                let mut out = vec![0u8; rb.capacity()];
                let n = rb.read(&mut out);
                out.truncate(n);
                out
            })
            .unwrap_or_default()
    }

    #[test]
    fn two_leases_receive_identical_chunks_in_order() {
        let (mux, backend) = mux();
        let a = mux.attach(Some("main"), Box::new(IdentityTransform), &[]).unwrap();
        let b = mux.attach(Some("main"), Box::new(IdentityTransform), &[]).unwrap();
        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);

        backend.push(&[1, 2, 3, 4]);
        backend.push(&[5, 6, 7, 8]);

        assert_eq!(drain(&a), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(drain(&b), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn capture_runs_only_while_attached() {
        let (mux, backend) = mux();
        let a = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        let b = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        assert_eq!(a.device().id, "main");
        assert_eq!(mux.active_devices()[0].consumers, 2);

        drop(a);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 0);

        mux.detach(b);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
        assert!(mux.active_devices().is_empty());

        let _c = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        assert_eq!(backend.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn detach_is_idempotent() {
        let (mux, backend) = mux();
        let mut lease = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        lease.detach();
        lease.detach();
        drop(lease);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn preamble_precedes_captured_audio() {
        let (mux, backend) = mux();
        let _first = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        backend.push(&[9, 9, 9, 9]);

        let late = mux
            .attach(None, Box::new(IdentityTransform), &[0xA, 0xB, 0xC, 0xD])
            .unwrap();
        backend.push(&[1, 2, 3, 4]);
        assert_eq!(drain(&late), vec![0xA, 0xB, 0xC, 0xD, 1, 2, 3, 4]);
    }

    #[test]
    fn failing_buffer_does_not_block_others() {
        let (mux, backend) = mux();
        let bad = mux
            .attach(None, Box::new(EndianTransform::new(true, 4)), &[])
            .unwrap();
        let good = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();

        backend.push(&[1, 2, 3, 4, 5, 6]);
        assert!(matches!(bad.write_error(), Some(BufferError::Transform(_))));
        assert!(good.write_error().is_none());
        assert_eq!(drain(&good), vec![1, 2, 3, 4, 5, 6]);

        // Errored buffer stays quiet afterwards.
        backend.push(&[1, 2, 3, 4]);
        assert!(drain(&bad).is_empty());
        assert_eq!(drain(&good), vec![1, 2, 3, 4]);
    }

    #[test]
    fn oversized_chunk_is_dropped_and_buffer_stays_live() {
        let (mux, backend) = mux();
        let lease = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();

        backend.push(&[1u8; 68]);
        backend.push(&[2, 2, 2, 2]);

        assert!(lease.write_error().is_none());
        assert_eq!(drain(&lease), vec![2, 2, 2, 2]);
    }

    #[test]
    fn concurrent_capture_thread_and_readers_see_gap_free_order() {
        const FRAMES: u32 = 5_000;

        let backend = Arc::new(MockBackend::default());
        let mux = CaptureMultiplexer::new(backend.clone(), 1 << 16, Arc::new(NoopEventEmitter));
        let a = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        let b = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();

        let reader = |lease: BufferLease| {
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(10);
                let mut got = Vec::new();
                while got.len() < FRAMES as usize * 4 && Instant::now() < deadline {
                    let chunk = drain(&lease);
                    if chunk.is_empty() {
                        thread::yield_now();
                    }
                    got.extend(chunk);
                }
                assert!(lease.write_error().is_none());
                got
            })
        };
        let readers = [reader(a), reader(b)];

        let writer = {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                for frame in 0..FRAMES {
                    backend.push(&frame.to_le_bytes());
                    if frame % 64 == 0 {
                        thread::yield_now();
                    }
                }
            })
        };
        writer.join().unwrap();

        let expected: Vec<u32> = (0..FRAMES).collect();
        for reader in readers {
            let got = reader.join().unwrap();
            let frames: Vec<u32> = got
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            assert_eq!(frames, expected);
        }
    }

    #[tokio::test]
    async fn last_detach_on_runtime_stops_capture_off_the_worker() {
        let (mux, backend) = mux();
        let lease = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();

        drop(lease);
        assert!(mux.active_devices().is_empty());

        for _ in 0..200 {
            if backend.stops.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
        assert_ne!(backend.stop_threads.lock()[0], thread::current().id());
    }

    #[test]
    fn device_failure_is_visible_and_next_attach_reopens() {
        let (mux, backend) = mux();
        let old = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        backend.fail(CaptureError::DeviceLost("gone".into()));
        assert!(old.source_failed());

        let fresh = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        assert!(!fresh.source_failed());
        assert_eq!(backend.starts.load(Ordering::SeqCst), 2);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);

        // Detaching the stale lease must not tear down the new handle.
        drop(old);
        assert_eq!(mux.active_devices().len(), 1);
        backend.push(&[7, 7, 7, 7]);
        assert_eq!(drain(&fresh), vec![7, 7, 7, 7]);
    }

    #[test]
    fn unknown_device_and_start_failure() {
        let (mux, backend) = mux();
        assert!(matches!(
            mux.attach(Some("nope"), Box::new(IdentityTransform), &[]),
            Err(MultiplexerError::Capture(CaptureError::UnknownDevice(_)))
        ));

        backend.fail_start.store(true, Ordering::SeqCst);
        assert!(matches!(
            mux.attach(Some("aux"), Box::new(IdentityTransform), &[]),
            Err(MultiplexerError::Capture(CaptureError::StartFailed(_)))
        ));
        assert!(mux.active_devices().is_empty());
    }

    #[test]
    fn oversized_preamble_is_rejected() {
        let (mux, _backend) = mux();
        let err = mux
            .attach(None, Box::new(IdentityTransform), &[0u8; 65])
            .unwrap_err();
        assert!(matches!(
            err,
            MultiplexerError::Buffer(BufferError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn shutdown_stops_capture_and_fails_leases() {
        let (mux, backend) = mux();
        let lease = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        mux.shutdown();
        assert!(lease.source_failed());
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
        drop(lease);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
    }
}
