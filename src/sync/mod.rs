//! Application loops tying the clipboard to a transport
//!
//! Four tasks run side by side until cancelled:
//! - the watcher samples the local clipboard and queues new captures
//! - the uploader drains that queue into [`Client::send`]
//! - the transport's own receive loop ([`Client::poll`])
//! - the applier writes received snapshots into the local clipboard
//!
//! Watcher and applier share the last seen quick key so content written by
//! the applier is not captured and uploaded again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Identity;
use crate::clipboard::{quick_key, ClipboardHandle, Snapshot};
use crate::transport::Client;

/// Captures waiting for upload
const OUTBOUND_BUFFER: usize = 8;

/// Received snapshots waiting to be applied
const INBOUND_BUFFER: usize = 8;

pub struct SyncEngine {
    identity: Arc<Identity>,
    clipboard: ClipboardHandle,
    client: Arc<dyn Client>,
    watch_interval: Duration,
    last_seen: Arc<RwLock<Option<String>>>,
}

impl SyncEngine {
    pub fn new(
        identity: Arc<Identity>,
        clipboard: ClipboardHandle,
        client: Arc<dyn Client>,
        watch_interval: Duration,
    ) -> Self {
        Self {
            identity,
            clipboard,
            client,
            watch_interval,
            last_seen: Arc::new(RwLock::new(None)),
        }
    }

    /// Run until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            "Starting sync engine as {} (watch every {:?})",
            self.identity.device_id(),
            self.watch_interval
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);

        tokio::join!(
            self.watch(cancel.clone(), outbound_tx),
            self.upload(cancel.clone(), outbound_rx),
            self.client.poll(cancel.clone(), inbound_tx),
            self.apply(inbound_rx),
        );

        info!("Sync engine stopped");
        Ok(())
    }

    async fn watch(&self, cancel: CancellationToken, out: mpsc::Sender<Snapshot>) {
        let mut ticker = interval(self.watch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // held across the read so an apply cannot land between read and compare
            let captured = {
                let mut last_seen = self.last_seen.write().await;
                match self.clipboard.read().await {
                    Ok(items) if items.is_empty() => None,
                    Ok(items) => {
                        let key = quick_key(&items);
                        if last_seen.as_deref() == Some(key.as_str()) {
                            None
                        } else {
                            *last_seen = Some(key);
                            Some(items)
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read clipboard: {}", e);
                        None
                    }
                }
            };
            let Some(items) = captured else {
                continue;
            };

            let snapshot = Snapshot::new(self.identity.device_id(), items);
            info!(
                "Local clipboard changed: {} items, {} bytes",
                snapshot.items.len(),
                snapshot.items.iter().map(|item| item.byte_len()).sum::<usize>()
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = out.send(snapshot) => if sent.is_err() { break },
            }
        }

        debug!("Clipboard watcher stopped");
    }

    async fn upload(&self, cancel: CancellationToken, mut rx: mpsc::Receiver<Snapshot>) {
        loop {
            let snapshot = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(snapshot) => snapshot,
                    None => break,
                },
            };

            // a send in flight runs to completion; cancellation is checked between sends
            let items = snapshot.items.len();
            let started = Instant::now();
            match self.client.send(snapshot).await {
                Ok(()) => info!(
                    "Sent snapshot with {} items ({} ms)",
                    items,
                    started.elapsed().as_millis()
                ),
                Err(e) => warn!("Send failed: {}", e),
            }
        }

        debug!("Uploader stopped");
    }

    async fn apply(&self, mut rx: mpsc::Receiver<Snapshot>) {
        let mut last_applied: Option<String> = None;

        while let Some(snapshot) = rx.recv().await {
            // never trust the sender's key
            let key = quick_key(&snapshot.items);
            if last_applied.as_deref() == Some(key.as_str()) {
                debug!("Skipping snapshot from {}: already applied", snapshot.origin);
                continue;
            }
            last_applied = Some(key.clone());

            let items = snapshot.items.len();
            // the watcher waits on this guard until the write has landed
            let mut last_seen = self.last_seen.write().await;
            let previous = last_seen.replace(key);

            match self.clipboard.write(snapshot.items).await {
                Ok(()) => info!(
                    "Applied snapshot from {} ({} items)",
                    snapshot.origin, items
                ),
                Err(e) => {
                    *last_seen = previous;
                    warn!("Failed to write clipboard: {}", e);
                }
            }
            drop(last_seen);
        }

        debug!("Applier stopped");
    }
}
