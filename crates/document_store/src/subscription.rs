use tokio::sync::watch;
use tokio_stream::{wrappers::WatchStream, Stream};

use crate::{DocumentSnapshot, Result, StoreError};

/// A live query result. Every published value is the complete result, not a
/// delta.
#[derive(Debug)]
pub struct Subscription {
    receiver: watch::Receiver<Vec<DocumentSnapshot>>,
}

impl Subscription {
    pub fn from_receiver(receiver: watch::Receiver<Vec<DocumentSnapshot>>) -> Self {
        Self { receiver }
    }

    /// The latest result, without waiting.
    pub fn current(&self) -> Vec<DocumentSnapshot> {
        self.receiver.borrow().clone()
    }

    /// Waits for the next result that differs from the last one seen.
    pub async fn changed(&mut self) -> Result<Vec<DocumentSnapshot>> {
        self.receiver
            .changed()
            .await
            .map_err(|_| StoreError::Unavailable("subscription closed".to_owned()))?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Streams the current result first, then every change.
    pub fn into_stream(self) -> impl Stream<Item = Vec<DocumentSnapshot>> {
        WatchStream::new(self.receiver)
    }
}
