//! Title sources polled by the track hub.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Something that can report the current track title on demand.
#[async_trait]
pub trait TitleSource: Send + Sync {
    /// Returns the current title, or `None` if nothing is playing or the
    /// player can't be reached.
    async fn poll_title(&self) -> Option<String>;
}

/// Runs an external command and uses the first line of its stdout as the
/// title (e.g. `playerctl metadata --format "{{artist}} – {{title}}"`).
#[derive(Debug, Clone)]
pub struct CommandTitleSource {
    program: String,
    args: Vec<String>,
    strip_prefix: Option<String>,
    timeout: Duration,
}

impl CommandTitleSource {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            strip_prefix: None,
            timeout,
        }
    }

    /// Strips a fixed prefix from the output, e.g. `"Spotify – "` when the
    /// command prints a window title.
    #[must_use]
    pub fn with_strip_prefix(mut self, prefix: Option<String>) -> Self {
        self.strip_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    fn clean(&self, stdout: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(stdout);
        let mut line = text.lines().next()?.trim();

        if let Some(prefix) = &self.strip_prefix {
            match line.strip_prefix(prefix.as_str()) {
                Some(rest) => line = rest.trim(),
                // A window showing just the app name means nothing is playing.
                None if prefix.split_whitespace().next() == Some(line) => return None,
                None => {}
            }
        }

        (!line.is_empty()).then(|| line.to_string())
    }
}

#[async_trait]
impl TitleSource for CommandTitleSource {
    async fn poll_title(&self) -> Option<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(out)) if out.status.success() => self.clean(&out.stdout),
            Ok(Ok(out)) => {
                log::trace!("[Metadata] {} exited with {}", self.program, out.status);
                None
            }
            Ok(Err(e)) => {
                log::debug!("[Metadata] Failed to run {}: {}", self.program, e);
                None
            }
            Err(_) => {
                log::debug!("[Metadata] {} timed out", self.program);
                None
            }
        }
    }
}
