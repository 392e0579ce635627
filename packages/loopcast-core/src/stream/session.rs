//! Per-consumer delivery loop.
//!
//! A session owns one [`BufferLease`]. Every poll interval it tops the buffer
//! up with silence if capture hasn't produced anything, reads up to the
//! transport's write size (through the ICY embedder when metadata was
//! requested) and hands the bytes to the transport. The device lock is held
//! only for the buffer work, never across a sleep or a send.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use super::icy::MetadataEmbedder;
use super::multiplexer::BufferLease;
use super::ring_buffer::ByteSource;
use super::StreamingFormat;
use crate::events::{EventEmitter, SessionEvent};
use crate::metadata::TrackSubscription;
use crate::utils::now_millis;

pub use crate::events::SessionOutcome;

/// Errors from writing to a consumer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("consumer disconnected")]
    Closed,
}

/// Where a session's bytes go.
#[async_trait]
pub trait Transport: Send {
    /// Sends a chunk of response body.
    async fn write_body(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Whether the consumer is still there.
    fn is_connected(&self) -> bool;

    /// Largest chunk worth handing to `write_body` at once.
    fn write_buffer_size(&self) -> usize;
}

/// Transport feeding a bounded channel, drained by the HTTP response body.
pub struct ChannelTransport {
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
    write_buffer_size: usize,
}

impl ChannelTransport {
    /// Creates the transport and the receiving end for the response body.
    pub fn channel(
        capacity: usize,
        write_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<Result<Bytes, Infallible>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                write_buffer_size,
            },
            rx,
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn write_body(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.tx.send(Ok(data)).await.map_err(|_| TransportError::Closed)
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    fn write_buffer_size(&self) -> usize {
        self.write_buffer_size
    }
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct StreamSessionConfig {
    pub session_id: String,
    pub format: StreamingFormat,
    /// Sleep between delivery rounds.
    pub poll_interval: Duration,
    /// Silence written when the buffer is found empty.
    pub silence_ms: u32,
    /// Audio bytes between ICY blocks; `None` disables embedding.
    pub icy_metaint: Option<usize>,
    pub remote_addr: Option<String>,
}

/// Delivery loop for one consumer.
pub struct StreamSession {
    lease: BufferLease,
    config: StreamSessionConfig,
    track: Option<TrackSubscription>,
    emitter: Arc<dyn EventEmitter>,
}

impl StreamSession {
    /// `track` is only consulted when ICY embedding is on.
    pub fn new(
        lease: BufferLease,
        config: StreamSessionConfig,
        track: Option<TrackSubscription>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            lease,
            config,
            track,
            emitter,
        }
    }

    /// Runs until the consumer leaves or the source fails, then detaches.
    pub async fn run<T: Transport + ?Sized>(mut self, transport: &mut T) -> SessionOutcome {
        let device_id = self.lease.device().id.clone();
        let silence = self.lease.device().format.silence_frame(self.config.silence_ms);
        let mut out = vec![0u8; transport.write_buffer_size().max(1)];

        let mut embedder = self.config.icy_metaint.map(MetadataEmbedder::new);
        if let (Some(embedder), Some(track)) = (&embedder, &self.track) {
            if let Err(e) = embedder.set_track_info(&track.current()) {
                log::warn!("[Session] {}: {}", self.config.session_id, e);
            }
        }

        log::info!(
            "[Session] {} started: device={} format={} icy={:?}",
            self.config.session_id,
            device_id,
            self.config.format.id(),
            self.config.icy_metaint
        );
        self.emitter.emit_session(SessionEvent::Started {
            session_id: self.config.session_id.clone(),
            device_id: device_id.clone(),
            format: self.config.format.id().to_string(),
            metadata: embedder.is_some(),
            remote_addr: self.config.remote_addr.clone(),
            timestamp: now_millis(),
        });

        let mut bytes_sent: u64 = 0;
        let outcome = loop {
            if !transport.is_connected() {
                break SessionOutcome::Disconnected;
            }

            tokio::time::sleep(self.config.poll_interval).await;

            if self.lease.source_failed() {
                break SessionOutcome::SourceFailed;
            }
            if let Some(e) = self.lease.write_error() {
                log::warn!("[Session] {}: {}", self.config.session_id, e);
                break SessionOutcome::TransformFailed;
            }

            if let (Some(embedder), Some(track)) = (&embedder, &mut self.track) {
                if let Some(info) = track.take_update() {
                    if let Err(e) = embedder.set_track_info(&info) {
                        log::warn!("[Session] {}: {}", self.config.session_id, e);
                    }
                }
            }

            let read = self.lease.with_buffer(|rb| {
                if rb.is_empty() {
                    rb.write(&silence)?;
                }
                Ok::<_, super::BufferError>(match embedder.as_mut() {
                    Some(embedder) => embedder.wrap(rb).read(&mut out),
                    None => rb.read(&mut out),
                })
            });

            let n = match read {
                Some(Ok(n)) => n,
                Some(Err(e)) => {
                    log::warn!("[Session] {}: silence fill failed: {}", self.config.session_id, e);
                    break SessionOutcome::TransformFailed;
                }
                None => break SessionOutcome::Disconnected,
            };
            if n == 0 {
                continue;
            }

            if transport
                .write_body(Bytes::copy_from_slice(&out[..n]))
                .await
                .is_err()
            {
                break SessionOutcome::Disconnected;
            }
            bytes_sent += n as u64;
        };

        if let Some(mut track) = self.track.take() {
            track.cancel();
        }
        self.lease.detach();

        log::info!(
            "[Session] {} ended ({:?}) after {} bytes",
            self.config.session_id,
            outcome,
            bytes_sent
        );
        self.emitter.emit_session(SessionEvent::Ended {
            session_id: self.config.session_id.clone(),
            device_id,
            outcome,
            bytes_sent,
            timestamp: now_millis(),
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureError;
    use crate::events::NoopEventEmitter;
    use crate::metadata::TrackInfoHub;
    use crate::runtime::TokioSpawner;
    use crate::stream::multiplexer::tests::MockBackend;
    use crate::stream::multiplexer::CaptureMultiplexer;
    use crate::stream::transform::{EndianTransform, IdentityTransform};

    /// Records writes; disconnects after `limit` of them.
    struct RecordingTransport {
        writes: Vec<Bytes>,
        limit: usize,
        size: usize,
    }

    impl RecordingTransport {
        fn new(limit: usize, size: usize) -> Self {
            Self {
                writes: Vec::new(),
                limit,
                size,
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn write_body(&mut self, data: Bytes) -> Result<(), TransportError> {
            self.writes.push(data);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.writes.len() < self.limit
        }

        fn write_buffer_size(&self) -> usize {
            self.size
        }
    }

    fn config(icy: Option<usize>) -> StreamSessionConfig {
        StreamSessionConfig {
            session_id: "test".into(),
            format: StreamingFormat::Wav,
            poll_interval: Duration::from_millis(100),
            silence_ms: 100,
            icy_metaint: icy,
            remote_addr: None,
        }
    }

    fn setup() -> (CaptureMultiplexer, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::default());
        let mux = CaptureMultiplexer::new(backend.clone(), 1 << 16, Arc::new(NoopEventEmitter));
        (mux, backend)
    }

    fn session(lease: BufferLease, icy: Option<usize>, track: Option<TrackSubscription>) -> StreamSession {
        StreamSession::new(lease, config(icy), track, Arc::new(NoopEventEmitter))
    }

    #[tokio::test(start_paused = true)]
    async fn pads_with_silence_when_nothing_captured() {
        let (mux, _backend) = setup();
        let lease = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();

        let mut transport = RecordingTransport::new(2, 1 << 16);
        let outcome = session(lease, None, None).run(&mut transport).await;

        assert_eq!(outcome, SessionOutcome::Disconnected);
        assert_eq!(transport.writes.len(), 2);
        // 100 ms of 48 kHz stereo.
        for write in &transport.writes {
            assert_eq!(write.len(), 19_200);
            assert!(write.iter().all(|&b| b == 0));
        }
        assert!(mux.active_devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_captured_audio_capped_at_write_size() {
        let (mux, backend) = setup();
        let lease = mux
            .attach(None, Box::new(IdentityTransform), &[0xEE; 4])
            .unwrap();
        backend.push(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut transport = RecordingTransport::new(2, 8);
        session(lease, None, None).run(&mut transport).await;

        assert_eq!(&transport.writes[0][..], &[0xEE, 0xEE, 0xEE, 0xEE, 1, 2, 3, 4]);
        assert_eq!(&transport.writes[1][..], &[5, 6, 7, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn ends_when_source_fails() {
        let (mux, backend) = setup();
        let lease = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();
        backend.fail(CaptureError::DeviceLost("unplugged".into()));

        let mut transport = RecordingTransport::new(10, 64);
        let outcome = session(lease, None, None).run(&mut transport).await;

        assert_eq!(outcome, SessionOutcome::SourceFailed);
        assert!(transport.writes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ends_when_transform_rejects_capture() {
        let (mux, backend) = setup();
        let lease = mux
            .attach(None, Box::new(EndianTransform::new(true, 4)), &[])
            .unwrap();
        backend.push(&[1, 2, 3]);

        let mut transport = RecordingTransport::new(10, 64);
        let outcome = session(lease, None, None).run(&mut transport).await;
        assert_eq!(outcome, SessionOutcome::TransformFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn embeds_current_title() {
        let (mux, _backend) = setup();
        let lease = mux.attach(None, Box::new(IdentityTransform), &[]).unwrap();

        let hub = TrackInfoHub::new(
            None,
            Duration::from_secs(2),
            TokioSpawner::current(),
            Arc::new(NoopEventEmitter),
        );
        hub.set_title("x");
        let sub = hub.subscribe();

        let mut transport = RecordingTransport::new(1, 16 + 17 + 16 + 1);
        session(lease, Some(16), Some(sub)).run(&mut transport).await;

        let out = &transport.writes[0];
        assert!(out[..16].iter().all(|&b| b == 0));
        assert_eq!(out[16], 1);
        assert_eq!(&out[17..33], b"StreamTitle='x';");
        assert_eq!(out[49], 0);
        // Subscription released with the session.
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn channel_transport_reports_closed_receiver() {
        let (mut transport, rx) = ChannelTransport::channel(1, 1024);
        assert!(transport.is_connected());
        assert_eq!(transport.write_buffer_size(), 1024);

        drop(rx);
        assert!(!transport.is_connected());
        assert_eq!(
            transport.write_body(Bytes::from_static(b"x")).await,
            Err(TransportError::Closed)
        );
    }
}
