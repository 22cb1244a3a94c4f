//! Producer side of the streamed response.

use tokio::sync::mpsc;

use crate::stream_event::StreamPart;

/// Writes [`StreamPart`]s toward the HTTP response. The channel is bounded,
/// so `send` suspends while the socket is not ready for more.
///
/// Once the client goes away every send reports `false`; callers keep
/// working (post-stream effects still run) but stop producing output.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<StreamPart>,
}

impl StreamWriter {
    pub fn new(tx: mpsc::Sender<StreamPart>) -> Self {
        Self { tx }
    }

    /// Bounded channel pair.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamPart>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Returns whether the part was handed to the reader.
    pub async fn send(&self, part: StreamPart) -> bool {
        self.tx.send(part).await.is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
