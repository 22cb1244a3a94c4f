//! The out-of-band "memory saved" notice.
//!
//! A notice is stashed during memory extraction and written at most once,
//! only while the stream writer is still attached. Anything else drops it;
//! the drop reason is returned so callers and tests can see what happened.

use crate::stream_event::StreamPart;
use crate::writer::StreamWriter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryNotice {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NothingPending,
    AlreadyDelivered,
    WriterClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped(DropReason),
}

#[derive(Debug, Default)]
pub struct NoticeSlot {
    pending: Option<MemoryNotice>,
    delivered: bool,
}

impl NoticeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier pending notice.
    pub fn stash(&mut self, notice: MemoryNotice) {
        self.pending = Some(notice);
    }

    pub fn pending(&self) -> Option<&MemoryNotice> {
        self.pending.as_ref()
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered
    }

    pub async fn deliver(&mut self, writer: Option<&StreamWriter>) -> Delivery {
        if self.delivered {
            return Delivery::Dropped(DropReason::AlreadyDelivered);
        }
        let Some(notice) = self.pending.take() else {
            return Delivery::Dropped(DropReason::NothingPending);
        };
        let Some(writer) = writer.filter(|w| w.is_open()) else {
            return Delivery::Dropped(DropReason::WriterClosed);
        };
        if writer
            .send(StreamPart::memory_saved(notice.title, notice.content))
            .await
        {
            self.delivered = true;
            Delivery::Delivered
        } else {
            Delivery::Dropped(DropReason::WriterClosed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> MemoryNotice {
        MemoryNotice {
            title: "Pets".into(),
            content: "The user has a dog".into(),
        }
    }

    #[tokio::test]
    async fn delivers_once() {
        let (writer, mut rx) = StreamWriter::channel(4);
        let mut slot = NoticeSlot::new();
        slot.stash(notice());

        assert_eq!(slot.deliver(Some(&writer)).await, Delivery::Delivered);
        assert_eq!(
            rx.recv().await,
            Some(StreamPart::memory_saved("Pets", "The user has a dog"))
        );

        slot.stash(notice());
        assert_eq!(
            slot.deliver(Some(&writer)).await,
            Delivery::Dropped(DropReason::AlreadyDelivered)
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn nothing_pending() {
        let (writer, _rx) = StreamWriter::channel(1);
        let mut slot = NoticeSlot::new();
        assert_eq!(
            slot.deliver(Some(&writer)).await,
            Delivery::Dropped(DropReason::NothingPending)
        );
    }

    #[tokio::test]
    async fn closed_or_missing_writer_drops() {
        let (writer, rx) = StreamWriter::channel(1);
        drop(rx);
        let mut slot = NoticeSlot::new();
        slot.stash(notice());
        assert_eq!(
            slot.deliver(Some(&writer)).await,
            Delivery::Dropped(DropReason::WriterClosed)
        );
        assert!(!slot.is_delivered());

        slot.stash(notice());
        assert_eq!(
            slot.deliver(None).await,
            Delivery::Dropped(DropReason::WriterClosed)
        );
    }
}
