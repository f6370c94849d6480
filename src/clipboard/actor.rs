//! Single-owner clipboard task
//!
//! OS clipboards are not safe to drive from several threads, so one dedicated
//! thread owns the [`ClipboardProvider`] and serves typed requests. Async code
//! talks to it through a cloneable [`ClipboardHandle`].

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::{ClipboardError, ClipboardProvider, Item};

/// Pending requests the clipboard thread will queue
const MAILBOX_SIZE: usize = 16;

enum Request {
    Read {
        reply: oneshot::Sender<Result<Vec<Item>, ClipboardError>>,
    },
    Write {
        items: Vec<Item>,
        reply: oneshot::Sender<Result<(), ClipboardError>>,
    },
}

/// Owner of the clipboard thread
pub struct ClipboardActor;

impl ClipboardActor {
    /// Start the clipboard thread.
    ///
    /// The provider is built on the thread itself so backends that are not
    /// `Send` still work. A construction failure is returned here.
    pub async fn spawn<P, F>(factory: F) -> Result<ClipboardHandle, ClipboardError>
    where
        P: ClipboardProvider + 'static,
        F: FnOnce() -> Result<P, ClipboardError> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Request>(MAILBOX_SIZE);
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("clipboard".to_string())
            .spawn(move || {
                let mut provider = match factory() {
                    Ok(provider) => {
                        let _ = ready_tx.send(Ok(()));
                        provider
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                info!("Clipboard thread started with {} backend", provider.name());

                while let Some(request) = rx.blocking_recv() {
                    match request {
                        Request::Read { reply } => {
                            let _ = reply.send(provider.read());
                        }
                        Request::Write { items, reply } => {
                            let _ = reply.send(provider.write(&items));
                        }
                    }
                }

                debug!("Clipboard thread stopped");
            })
            .map_err(|e| ClipboardError::Unavailable(e.to_string()))?;

        ready_rx.await.map_err(|_| ClipboardError::ActorGone)??;

        Ok(ClipboardHandle { tx })
    }
}

/// Async front end of the clipboard thread
#[derive(Clone)]
pub struct ClipboardHandle {
    tx: mpsc::Sender<Request>,
}

impl ClipboardHandle {
    /// Read the current clipboard contents
    pub async fn read(&self) -> Result<Vec<Item>, ClipboardError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Read { reply })
            .await
            .map_err(|_| ClipboardError::ActorGone)?;
        rx.await.map_err(|_| ClipboardError::ActorGone)?
    }

    /// Replace the clipboard contents
    pub async fn write(&self, items: Vec<Item>) -> Result<(), ClipboardError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Write { items, reply })
            .await
            .map_err(|_| ClipboardError::ActorGone)?;
        rx.await.map_err(|_| ClipboardError::ActorGone)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{formats, MemoryClipboard};

    #[tokio::test]
    async fn test_read_write_through_actor() {
        let handle = ClipboardActor::spawn(|| Ok(MemoryClipboard::new()))
            .await
            .unwrap();

        assert!(handle.read().await.unwrap().is_empty());

        let items = vec![Item::text(formats::TEXT, "from actor")];
        handle.write(items.clone()).await.unwrap();
        assert_eq!(handle.read().await.unwrap(), items);
    }

    #[tokio::test]
    async fn test_factory_failure_is_reported() {
        let result = ClipboardActor::spawn(|| -> Result<MemoryClipboard, ClipboardError> {
            Err(ClipboardError::Unavailable("no display".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ClipboardError::Unavailable(_))));
    }
}
