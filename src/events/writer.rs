//! Asynchronous batched event writer.
//!
//! A bounded channel fronts a single background task. `write` never
//! blocks: on a full buffer the event is dropped with a warning — the
//! event stream is telemetry, not a ledger. The task flushes a batch when
//! it reaches [`BATCH_SIZE`] or when the flush timer fires with a
//! non-empty batch. A failed or timed-out flush drops its batch; records
//! are never re-queued so memory stays bounded under a store outage.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::StoreError;
use crate::events::SecurityEvent;

/// Channel capacity; events beyond it are dropped.
pub const QUEUE_CAPACITY: usize = 10_000;
/// Flush when a batch reaches this size.
pub const BATCH_SIZE: usize = 1_000;
/// Flush a non-empty batch at least this often.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// Budget for a single batch insert.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// Budget for draining on close.
pub const DRAIN_BUDGET: Duration = Duration::from_secs(2);

/// Destination for event batches.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn insert_events(&self, events: &[SecurityEvent]) -> Result<(), StoreError>;
}

struct WriterState {
    tx: Option<mpsc::Sender<SecurityEvent>>,
    handle: Option<JoinHandle<()>>,
}

/// Non-blocking buffered event writer.
pub struct EventWriter {
    state: Mutex<WriterState>,
}

impl EventWriter {
    /// Spawn the background flush task against a sink.
    pub fn spawn(sink: Arc<dyn EventSink>) -> Self {
        Self::spawn_with(sink, QUEUE_CAPACITY, BATCH_SIZE, FLUSH_INTERVAL)
    }

    /// [`spawn`](Self::spawn) with explicit tuning, for tests.
    pub fn spawn_with(
        sink: Arc<dyn EventSink>,
        capacity: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(flush_loop(rx, sink, batch_size, flush_interval));
        Self {
            state: Mutex::new(WriterState {
                tx: Some(tx),
                handle: Some(handle),
            }),
        }
    }

    /// Enqueue an event. Never blocks; a full buffer or a closed writer
    /// drops the event with a warning.
    pub fn write(&self, event: SecurityEvent) {
        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(tx) = state.tx.as_ref() else {
            tracing::warn!(request_id = %event.request_id, "event writer closed, dropping event");
            return;
        };
        if let Err(err) = tx.try_send(event) {
            let request_id = match &err {
                mpsc::error::TrySendError::Full(ev)
                | mpsc::error::TrySendError::Closed(ev) => ev.request_id,
            };
            tracing::warn!(%request_id, "event buffer full, dropping event");
        }
    }

    /// Close the writer: stop accepting events, drain what is buffered,
    /// flush a final batch, and return. Idempotent and bounded by
    /// [`DRAIN_BUDGET`].
    pub async fn close(&self) {
        let (tx, handle) = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (state.tx.take(), state.handle.take())
        };
        // Dropping the sender lets the flush loop drain and exit.
        drop(tx);

        let Some(handle) = handle else {
            return;
        };
        if tokio::time::timeout(DRAIN_BUDGET, handle).await.is_err() {
            tracing::warn!("event writer drain exceeded budget, abandoning remaining events");
        }
    }
}

async fn flush_loop(
    mut rx: mpsc::Receiver<SecurityEvent>,
    sink: Arc<dyn EventSink>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut interval = tokio::time::interval(flush_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch: Vec<SecurityEvent> = Vec::with_capacity(batch_size);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => {
                    batch.push(event);
                    if batch.len() >= batch_size {
                        flush(&sink, &mut batch).await;
                    }
                }
                // Channel closed: remaining buffered events were already
                // delivered by recv, emit the final batch.
                None => break,
            },
            _ = interval.tick() => {
                if !batch.is_empty() {
                    flush(&sink, &mut batch).await;
                }
            }
        }
    }

    if !batch.is_empty() {
        flush(&sink, &mut batch).await;
    }
}

async fn flush(sink: &Arc<dyn EventSink>, batch: &mut Vec<SecurityEvent>) {
    let events = std::mem::take(batch);
    match tokio::time::timeout(FLUSH_TIMEOUT, sink.insert_events(&events)).await {
        Ok(Ok(())) => {
            tracing::debug!(count = events.len(), "event batch flushed");
        }
        Ok(Err(error)) => {
            tracing::warn!(count = events.len(), %error, "event batch insert failed, dropping batch");
        }
        Err(_) => {
            tracing::warn!(count = events.len(), "event batch insert timed out, dropping batch");
        }
    }
}
