//! In-order payload delivery.
//!
//! Long-poll requests can complete in any order, so payloads are queued
//! until every earlier sequence has been written.

use std::collections::BTreeMap;
use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::payload::codec::TunnelPayload;
use crate::payload::error::PayloadError;

/// Maximum number of out-of-order payloads held back.
pub const MAXIMUM_QUEUE_SIZE: usize = 100;

struct ForwarderState<W> {
    writer: W,
    last_sequence: u64,
    queue: BTreeMap<u64, TunnelPayload>,
}

/// Writes payloads to `W` strictly in sequence order.
pub struct PayloadForwarder<W> {
    state: Mutex<ForwarderState<W>>,
}

impl<W> PayloadForwarder<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            state: Mutex::new(ForwarderState {
                writer,
                last_sequence: 0,
                queue: BTreeMap::new(),
            }),
        }
    }

    /// Write `payload` now if it is next in sequence, otherwise queue it.
    pub async fn forward(&self, payload: TunnelPayload) -> Result<(), PayloadError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let sequence = payload.sequence();

        if sequence <= state.last_sequence || state.queue.contains_key(&sequence) {
            tracing::debug!(sequence, last = state.last_sequence, "Dropping duplicate payload");
            return Ok(());
        }

        if sequence != state.last_sequence + 1 {
            if state.queue.len() >= MAXIMUM_QUEUE_SIZE {
                return Err(PayloadError::QueueFull);
            }
            tracing::trace!(sequence, last = state.last_sequence, "Queueing out-of-order payload");
            state.queue.insert(sequence, payload);
            return Ok(());
        }

        let mut next = Some(payload);
        while let Some(payload) = next {
            payload.write_to(&mut state.writer).await?;
            state.last_sequence = payload.sequence();
            next = state.queue.remove(&(state.last_sequence + 1));
        }
        Ok(())
    }

    /// Number of payloads waiting for an earlier sequence.
    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Shut down the underlying writer.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.state.lock().await.writer.shutdown().await
    }
}
