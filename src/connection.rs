//! Connection handle: one live client session and its bounded outbound mailbox.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type UserId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(0);

fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identity of one registration. A user id alone is not enough: the same user may
/// reconnect and get a new handle while the old session is still tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    pub user_id: UserId,
    pub conn_id: u64,
}

/// Producer side of a session, owned by the hub once registered.
///
/// The handle holds the only sender of its mailbox, so dropping the handle closes the
/// mailbox, and that can only happen once.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: HandleId,
    tx: mpsc::Sender<String>,
}

/// Consumer side of a session, owned by the transport's write loop.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    /// The consumer is not keeping up.
    Full,
    /// The consumer went away.
    Closed,
}

impl ConnectionHandle {
    /// Create a handle for `user_id` with a mailbox holding at most `capacity` events.
    pub fn new(user_id: UserId, capacity: usize) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = HandleId {
            user_id,
            conn_id: next_conn_id(),
        };
        (Self { id, tx }, Mailbox { rx })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.id.user_id
    }

    /// Non-blocking enqueue. Never waits on the consumer.
    pub(crate) fn offer(&self, message: String) -> Result<(), OfferError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => OfferError::Full,
            TrySendError::Closed(_) => OfferError::Closed,
        })
    }
}

impl Mailbox {
    /// Next queued event in FIFO order, or `None` once the handle has been dropped
    /// and the buffer is drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
