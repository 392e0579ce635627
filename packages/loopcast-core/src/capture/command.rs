use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::{CaptureError, CaptureSink, CaptureStream};
use crate::stream::AudioFormat;

/// Captures raw s16le PCM from a child process's stdout.
///
/// A dedicated reader thread accumulates output into fixed, frame-aligned
/// chunks and hands them to the sink. The process exiting (or its pipe
/// failing) while not stopped is reported as [`CaptureError::DeviceLost`].
pub struct CommandCaptureStream {
    device_id: String,
    program: String,
    args: Vec<String>,
    chunk_bytes: usize,
    sink: Arc<dyn CaptureSink>,
    running: Option<Running>,
}

struct Running {
    child: Child,
    stopping: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl CommandCaptureStream {
    pub fn new(
        device_id: String,
        program: String,
        args: Vec<String>,
        format: AudioFormat,
        chunk_bytes: usize,
        sink: Arc<dyn CaptureSink>,
    ) -> Self {
        // Round to whole frames so every delivered chunk is frame-aligned.
        let align = format.block_align();
        let chunk_bytes = (chunk_bytes / align).max(1) * align;
        Self {
            device_id,
            program,
            args,
            chunk_bytes,
            sink,
            running: None,
        }
    }
}

impl CaptureStream for CommandCaptureStream {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::StartFailed(format!("{}: {}", self.program, e)))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CaptureError::StartFailed("child stdout unavailable".into()));
        };

        let stopping = Arc::new(AtomicBool::new(false));
        let reader = {
            let stopping = Arc::clone(&stopping);
            let sink = Arc::clone(&self.sink);
            let chunk_bytes = self.chunk_bytes;
            let program = self.program.clone();
            std::thread::Builder::new()
                .name(format!("capture-{}", self.device_id))
                .spawn(move || read_loop(stdout, chunk_bytes, &program, &stopping, sink.as_ref()))
        };

        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::StartFailed(format!("reader thread: {}", e)));
            }
        };

        log::info!(
            "[Capture] {}: started `{} {}` (pid {})",
            self.device_id,
            self.program,
            self.args.join(" "),
            child.id()
        );
        self.running = Some(Running {
            child,
            stopping,
            reader,
        });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        running.stopping.store(true, Ordering::SeqCst);
        // Killing the process closes the pipe, which unblocks the reader.
        if let Err(e) = running.child.kill() {
            log::debug!("[Capture] {}: kill failed: {}", self.device_id, e);
        }
        let _ = running.child.wait();
        if running.reader.join().is_err() {
            log::warn!("[Capture] {}: reader thread panicked", self.device_id);
        }
        log::info!("[Capture] {}: stopped", self.device_id);
    }
}

impl Drop for CommandCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(
    mut stdout: ChildStdout,
    chunk_bytes: usize,
    program: &str,
    stopping: &AtomicBool,
    sink: &dyn CaptureSink,
) {
    let mut buf = vec![0u8; chunk_bytes];
    let mut filled = 0;

    let failure = loop {
        match stdout.read(&mut buf[filled..]) {
            Ok(0) => break format!("{} exited", program),
            Ok(n) => {
                filled += n;
                if filled == chunk_bytes {
                    if stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    sink.on_data(&buf);
                    filled = 0;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break format!("{} read failed: {}", program, e),
        }
    };

    if !stopping.load(Ordering::SeqCst) {
        log::warn!("[Capture] {}", failure);
        sink.on_error(CaptureError::DeviceLost(failure));
    }
}
