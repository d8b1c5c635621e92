use parking_lot::Mutex;
use std::io::Write;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

pub const TAKE_FULL_SNAPSHOT: &str = r#"{"command":"take_full_snapshot"}"#;

/// Control channel back to the capture side.
#[cfg_attr(test, automock)]
pub trait CaptureControl: Send + Sync {
    /// Asks the capture side to emit Meta, Focus and FullSnapshot records.
    fn take_full_snapshot(&self);
}

/// Writes capture commands as JSON lines.
pub struct LineCaptureControl<W> {
    writer: Mutex<W>,
}

pub type StdoutCaptureControl = LineCaptureControl<std::io::Stdout>;

impl<W: Write + Send> LineCaptureControl<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl StdoutCaptureControl {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> CaptureControl for LineCaptureControl<W> {
    fn take_full_snapshot(&self) {
        let mut writer = self.writer.lock();
        let written = writeln!(writer, "{TAKE_FULL_SNAPSHOT}").and_then(|()| writer.flush());
        match written {
            Ok(()) => debug!("Requested a full snapshot from the capture process"),
            Err(e) => warn!("Failed to request a full snapshot: {}", e),
        }
    }
}
