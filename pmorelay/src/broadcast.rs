//! Fan-out buffer between the active encoder and the listeners
//!
//! A single producer publishes encoded chunks; every attached listener
//! reads them at its own pace through a [`ListenerCursor`]. The producer
//! never waits for listeners: the ring keeps the most recent chunks up to
//! a byte budget, and a listener that falls out of the window is moved
//! forward to the oldest retained chunk.
//!
//! ```text
//!   publish ──► [ seq 40 | seq 41 | seq 42 | seq 43 ] ──► read_next(cursor A)
//!                 ▲ oldest                    ▲ newest  ──► read_next(cursor B)
//! ```

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Default ring budget, about 16 seconds at 128 kbps
pub const DEFAULT_RETENTION_BYTES: usize = 256 * 1024;

/// An encoded chunk tagged with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub seq: u64,
    pub data: Bytes,
}

/// Read position of one listener.
///
/// Created by [`BroadcastBuffer::subscribe`] at the live point. Owned by
/// exactly one session.
#[derive(Debug)]
pub struct ListenerCursor {
    id: u64,
    next_seq: u64,
    delivered: u64,
    skipped: u64,
    attached: bool,
}

impl ListenerCursor {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence number of the next chunk this listener expects
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Chunks jumped over because they were evicted before being read
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

/// Snapshot of the ring bounds and counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
pub struct BufferStats {
    /// Sequence number the next published chunk will get
    pub next_seq: u64,
    /// Oldest retained sequence number, if any chunk is retained
    pub oldest_seq: Option<u64>,
    pub retained_chunks: usize,
    pub retained_bytes: usize,
    pub retention_bytes: usize,
    pub listeners: usize,
    pub closed: bool,
}

struct State {
    chunks: VecDeque<Chunk>,
    next_seq: u64,
    retained_bytes: usize,
    listeners: usize,
    next_listener_id: u64,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    retention_bytes: usize,
}

/// Single-producer, multi-consumer ring of encoded chunks.
///
/// Cloning yields another handle on the same ring.
#[derive(Clone)]
pub struct BroadcastBuffer {
    inner: Arc<Inner>,
}

impl BroadcastBuffer {
    pub fn new(retention_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    chunks: VecDeque::new(),
                    next_seq: 0,
                    retained_bytes: 0,
                    listeners: 0,
                    next_listener_id: 1,
                    closed: false,
                }),
                notify: Notify::new(),
                retention_bytes,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a chunk and wakes every waiting listener.
    ///
    /// Oldest chunks are evicted while the retained size exceeds the
    /// budget; the chunk just published is always kept. Fails only once
    /// the buffer is closed.
    pub fn publish(&self, data: Bytes) -> Result<u64> {
        let seq = {
            let mut state = self.lock();
            if state.closed {
                return Err(Error::BufferClosed);
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.retained_bytes += data.len();
            state.chunks.push_back(Chunk { seq, data });

            while state.retained_bytes > self.inner.retention_bytes && state.chunks.len() > 1 {
                if let Some(evicted) = state.chunks.pop_front() {
                    state.retained_bytes -= evicted.data.len();
                }
            }
            seq
        };

        self.inner.notify.notify_waiters();
        Ok(seq)
    }

    /// Registers a listener at the live point: it will only see chunks
    /// published from now on.
    pub fn subscribe(&self) -> ListenerCursor {
        let mut state = self.lock();
        state.listeners += 1;
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        trace!(listener = id, at_seq = state.next_seq, "Listener subscribed");
        ListenerCursor {
            id,
            next_seq: state.next_seq,
            delivered: 0,
            skipped: 0,
            attached: true,
        }
    }

    /// Waits for the next chunk after `cursor` and advances it by one.
    ///
    /// If the expected chunk has already been evicted, the oldest retained
    /// chunk is returned instead and the gap is counted on the cursor.
    /// Returns [`Error::BufferClosed`] once the buffer is closed or the
    /// cursor has been released.
    pub async fn read_next(&self, cursor: &mut ListenerCursor) -> Result<Chunk> {
        loop {
            // Register for the wakeup before looking at the ring so a
            // publish between the check and the await is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.lock();
                if state.closed || !cursor.attached {
                    return Err(Error::BufferClosed);
                }

                if let Some(oldest) = state.chunks.front().map(|c| c.seq) {
                    if cursor.next_seq < oldest {
                        let gap = oldest - cursor.next_seq;
                        cursor.skipped += gap;
                        debug!(
                            listener = cursor.id,
                            skipped = gap,
                            "Listener fell behind the retention window, skipping ahead"
                        );
                        cursor.next_seq = oldest;
                    }

                    if cursor.next_seq < state.next_seq {
                        let index = (cursor.next_seq - oldest) as usize;
                        if let Some(chunk) = state.chunks.get(index) {
                            cursor.next_seq += 1;
                            cursor.delivered += 1;
                            return Ok(chunk.clone());
                        }
                    }
                }
            }

            notified.await;
        }
    }

    /// Releases a listener. Calling it again on the same cursor is a no-op.
    pub fn unsubscribe(&self, cursor: &mut ListenerCursor) {
        if !cursor.attached {
            return;
        }
        cursor.attached = false;
        let mut state = self.lock();
        state.listeners = state.listeners.saturating_sub(1);
        trace!(
            listener = cursor.id,
            delivered = cursor.delivered,
            skipped = cursor.skipped,
            "Listener unsubscribed"
        );
    }

    /// Closes the buffer: pending and future reads fail with
    /// [`Error::BufferClosed`], publishing fails too.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.inner.notify.notify_waiters();
        debug!("Broadcast buffer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.lock();
        BufferStats {
            next_seq: state.next_seq,
            oldest_seq: state.chunks.front().map(|c| c.seq),
            retained_chunks: state.chunks.len(),
            retained_bytes: state.retained_bytes,
            retention_bytes: self.inner.retention_bytes,
            listeners: state.listeners,
            closed: state.closed,
        }
    }
}

impl Default for BroadcastBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_BYTES)
    }
}
