//! Alert batching dispatcher.
//!
//! Each [`AlertDispatcher::submit`] call queues one change and waits until the message
//! carrying it has been sent (or has failed). Changes arriving within one batch window
//! are flushed together: up to the batch threshold they go out as individual messages
//! in arrival order; above it, as one summary table shared by every caller.
//!
//! The queue and the flush deadline are owned by a single actor task, so swapping the
//! queue out at flush time cannot interleave with a submission.

pub mod channel;
pub mod render;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::models::SignalChange;

pub use channel::{NotifyChannel, TelegramChannel};
pub use render::Renderer;

pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub window: Duration,
    /// Batches strictly larger than this are sent as one summary.
    pub threshold: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            window: DEFAULT_BATCH_WINDOW,
            threshold: DEFAULT_BATCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Single,
    Batch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub mode: DeliveryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchOutcome {
    fn from_send(mode: DeliveryMode, result: Result<String, String>) -> Self {
        match result {
            Ok(id) => Self {
                mode,
                message_id: Some(id),
                error: None,
            },
            Err(error) => Self {
                mode,
                message_id: None,
                error: Some(error),
            },
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

struct Pending {
    change: SignalChange,
    reply: oneshot::Sender<DispatchOutcome>,
}

/// Cheap handle to the dispatcher task. The task exits once every handle is dropped.
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::UnboundedSender<Pending>,
}

impl AlertDispatcher {
    pub fn spawn(
        channel: Arc<dyn NotifyChannel>,
        renderer: Renderer,
        settings: BatchSettings,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            channel,
            renderer: Arc::new(renderer),
            settings,
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    pub async fn submit(&self, change: SignalChange) -> DispatchOutcome {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Pending { change, reply }).is_err() {
            return DispatchOutcome::from_send(
                DeliveryMode::Single,
                Err("alert dispatcher is not running".to_string()),
            );
        }
        done.await.unwrap_or_else(|_| {
            DispatchOutcome::from_send(
                DeliveryMode::Single,
                Err("alert dispatcher dropped the change".to_string()),
            )
        })
    }
}

struct Worker {
    channel: Arc<dyn NotifyChannel>,
    renderer: Arc<Renderer>,
    settings: BatchSettings,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Pending>) {
        let mut queue: Vec<Pending> = Vec::new();
        let mut deadline: Option<Instant> = None;
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            let armed = deadline;
            let timer = async move {
                match armed {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                received = rx.recv() => match received {
                    Some(pending) => {
                        queue.push(pending);
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + self.settings.window);
                            debug!(window = ?self.settings.window, "Alert window opened");
                        }
                    }
                    None => break,
                },
                () = timer => {
                    let batch = std::mem::take(&mut queue);
                    deadline = None;
                    if let Some(previous) = in_flight.take() {
                        let _ = previous.await;
                    }
                    in_flight = Some(tokio::spawn(flush(
                        batch,
                        Arc::clone(&self.channel),
                        Arc::clone(&self.renderer),
                        self.settings.threshold,
                    )));
                }
            }
        }

        if let Some(previous) = in_flight.take() {
            let _ = previous.await;
        }
        if !queue.is_empty() {
            flush(queue, self.channel, self.renderer, self.settings.threshold).await;
        }
        debug!("Alert dispatcher stopped");
    }
}

async fn flush(
    batch: Vec<Pending>,
    channel: Arc<dyn NotifyChannel>,
    renderer: Arc<Renderer>,
    threshold: usize,
) {
    if batch.is_empty() {
        return;
    }

    if batch.len() > threshold {
        let changes: Vec<&SignalChange> = batch.iter().map(|p| &p.change).collect();
        let text = renderer.batch(&changes);
        let result = channel.send(&text).await.map_err(|err| err.to_string());
        match &result {
            Ok(id) => info!(channel = channel.name(), size = batch.len(), message_id = %id, "Batch alert sent"),
            Err(err) => warn!(channel = channel.name(), size = batch.len(), error = %err, "Batch alert failed"),
        }
        let outcome = DispatchOutcome::from_send(DeliveryMode::Batch, result);
        for pending in batch {
            let _ = pending.reply.send(outcome.clone());
        }
        return;
    }

    for pending in batch {
        let text = renderer.single(&pending.change);
        let result = channel.send(&text).await.map_err(|err| err.to_string());
        if let Err(err) = &result {
            warn!(
                channel = channel.name(),
                signal = %pending.change.signal_name,
                error = %err,
                "Alert failed"
            );
        }
        let _ = pending
            .reply
            .send(DispatchOutcome::from_send(DeliveryMode::Single, result));
    }
}
