//! Ordered background presence writes.
//!
//! Every online/offline write for the process goes through one worker task
//! and is applied in the order it was issued. A connect immediately followed
//! by a disconnect therefore always ends offline in the shared set.
//!
//! Failures never reach the caller. They are logged here and counted under
//! [`PRESENCE_WRITE_ERRORS_TOTAL`]. Each write is bounded by [`WRITE_TIMEOUT`]
//! so one stuck command cannot hold up the writes queued behind it.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use relay_core::UserId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::PRESENCE_WRITE_ERRORS_TOTAL;
use crate::presence::PresenceStore;

/// Longest a single presence write may take before it is abandoned.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

enum PresenceCommand {
    Online(UserId),
    Offline(UserId, oneshot::Sender<()>),
}

/// Handle for queuing presence writes.
#[derive(Clone)]
pub struct PresenceWriter {
    tx: mpsc::UnboundedSender<PresenceCommand>,
}

impl PresenceWriter {
    /// Start the worker. It drains its queue and exits once `cancel` fires
    /// or every writer handle is dropped.
    pub fn spawn(
        store: Arc<dyn PresenceStore>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(store, rx, cancel));
        (Self { tx }, handle)
    }

    /// Queue an online write and return immediately.
    pub fn mark_online(&self, user_id: UserId) {
        if self.tx.send(PresenceCommand::Online(user_id)).is_err() {
            debug!("presence writer stopped, online write skipped");
        }
    }

    /// Queue an offline write and wait until the worker has applied it.
    ///
    /// Returns even when the write failed or the worker is gone.
    pub async fn mark_offline(&self, user_id: UserId) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .tx
            .send(PresenceCommand::Offline(user_id, ack_tx))
            .is_err()
        {
            debug!("presence writer stopped, offline write skipped");
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn run(
    store: Arc<dyn PresenceStore>,
    mut rx: mpsc::UnboundedReceiver<PresenceCommand>,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            biased;
            cmd = rx.recv() => cmd,
            () = cancel.cancelled() => break,
        };
        let Some(command) = command else { break };
        apply(store.as_ref(), command).await;
    }
    // apply whatever was queued before shutdown so offline writes still land
    rx.close();
    while let Some(command) = rx.recv().await {
        apply(store.as_ref(), command).await;
    }
    debug!("presence writer stopped");
}

async fn apply(store: &dyn PresenceStore, command: PresenceCommand) {
    match command {
        PresenceCommand::Online(user_id) => {
            match tokio::time::timeout(WRITE_TIMEOUT, store.mark_online(&user_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(%user_id, error = %e, "mark online failed");
                    counter!(PRESENCE_WRITE_ERRORS_TOTAL, "op" => "online").increment(1);
                }
                Err(_) => {
                    warn!(%user_id, timeout = ?WRITE_TIMEOUT, "mark online timed out");
                    counter!(PRESENCE_WRITE_ERRORS_TOTAL, "op" => "online").increment(1);
                }
            }
        }
        PresenceCommand::Offline(user_id, ack) => {
            match tokio::time::timeout(WRITE_TIMEOUT, store.mark_offline(&user_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(%user_id, error = %e, "mark offline failed");
                    counter!(PRESENCE_WRITE_ERRORS_TOTAL, "op" => "offline").increment(1);
                }
                Err(_) => {
                    warn!(%user_id, timeout = ?WRITE_TIMEOUT, "mark offline timed out");
                    counter!(PRESENCE_WRITE_ERRORS_TOTAL, "op" => "offline").increment(1);
                }
            }
            let _ = ack.send(());
        }
    }
}
