// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded inbound mailbox between transport threads and the model thread.
//!
//! The transport pushes fully-formed records from its own threads; the
//! dispatcher drains on the model thread, a bounded number per tick, so a
//! chatty peer cannot starve the frame.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

use mirror_proto::Message;
use thiserror::Error;

/// Errors surfaced to the transport side of the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// The mailbox is full. Surfaced, not retried here; the transport
    /// decides whether to buffer or drop.
    #[error("inbound mailbox full")]
    Full,
    /// The dispatcher side is gone.
    #[error("inbound mailbox closed")]
    Closed,
}

/// Sending half of the mailbox, handed to transport threads. Cloneable.
#[derive(Debug, Clone)]
pub struct Inbox {
    tx: SyncSender<Message>,
}

impl Inbox {
    /// Enqueues one inbound record without blocking.
    pub fn push(&self, message: Message) -> Result<(), MailboxError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => MailboxError::Full,
            TrySendError::Disconnected(_) => MailboxError::Closed,
        })
    }
}

pub(crate) fn channel(capacity: usize) -> (Inbox, Receiver<Message>) {
    let (tx, rx) = sync_channel(capacity);
    (Inbox { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_proto::SnapshotRequest;

    fn request() -> Message {
        Message::SnapshotRequest(SnapshotRequest {
            reason: "join".to_owned(),
        })
    }

    #[test]
    fn full_mailbox_reports_backpressure() {
        let (inbox, _rx) = channel(1);
        inbox.push(request()).unwrap();
        assert_eq!(inbox.push(request()), Err(MailboxError::Full));
    }

    #[test]
    fn closed_mailbox_reports_closed() {
        let (inbox, rx) = channel(1);
        drop(rx);
        assert_eq!(inbox.push(request()), Err(MailboxError::Closed));
    }
}
