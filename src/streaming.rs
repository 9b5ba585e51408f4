//! Ordered push of intermediate results to a streaming caller.
//!
//! # Semantics
//!
//! - One [`StreamEvent::Phase`] per completed phase, in completion order,
//!   carrying the fields that phase made available.
//! - The stream ends with exactly one terminal event: `Complete` or
//!   `Error`. Later `complete`/`fail` calls are ignored.
//! - The buffer is bounded. When it is full the oldest phase event is
//!   dropped; the terminal event is held separately and is never dropped.
//! - Dropping the receiver does not cancel the run. Sends after that are
//!   discarded.
//! - Dropping the sender without closing ends the stream with `Error`.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::engine::ProcessResult;

// ---------------------------------------------------------------------------
// StreamEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A phase finished.
    Phase {
        index: usize,
        /// Newly available fields, in write order.
        fields: Map<String, Value>,
    },

    /// The run finished with this result.
    Complete { result: Box<ProcessResult> },

    /// The run ended without a result.
    Error { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Phase { .. })
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ChannelState {
    queue: VecDeque<StreamEvent>,
    terminal: Option<StreamEvent>,
    closed: bool,
    receiver_gone: bool,
    dropped: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ChannelState>,
    notify: Notify,
    capacity: usize,
}

/// Create a channel buffering at most `capacity` phase events.
pub fn channel(capacity: usize) -> (StreamSender, StreamReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(ChannelState::default()),
        notify: Notify::new(),
        capacity: capacity.max(1),
    });
    (
        StreamSender {
            shared: Arc::clone(&shared),
        },
        StreamReceiver { shared },
    )
}

/// Producer side, owned by the run.
#[derive(Debug)]
pub struct StreamSender {
    shared: Arc<Shared>,
}

impl StreamSender {
    /// Queue a phase event. Returns `false` when it was discarded because
    /// the stream is closed or nobody is listening.
    pub fn send_phase(&self, index: usize, fields: Map<String, Value>) -> bool {
        let mut state = self.shared.state.lock();
        if state.closed || state.receiver_gone {
            return false;
        }
        if state.queue.len() >= self.shared.capacity {
            state.queue.pop_front();
            state.dropped += 1;
            log::debug!("stream buffer full, dropped oldest phase event ({} total)", state.dropped);
        }
        state.queue.push_back(StreamEvent::Phase { index, fields });
        drop(state);
        self.shared.notify.notify_one();
        true
    }

    /// Close with the final result. Returns `false` if already closed.
    pub fn complete(&self, result: ProcessResult) -> bool {
        self.close_with(StreamEvent::Complete {
            result: Box::new(result),
        })
    }

    /// Close with an error. Returns `false` if already closed.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.close_with(StreamEvent::Error {
            message: message.into(),
        })
    }

    fn close_with(&self, event: StreamEvent) -> bool {
        let mut state = self.shared.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        if !state.receiver_gone {
            state.terminal = Some(event);
        }
        drop(state);
        self.shared.notify.notify_one();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Phase events dropped on overflow so far.
    pub fn dropped(&self) -> usize {
        self.shared.state.lock().dropped
    }
}

impl Drop for StreamSender {
    fn drop(&mut self) {
        if self.fail("stream ended before the run produced a result") {
            log::warn!("stream sender dropped without closing");
        }
    }
}

/// Consumer side, handed to the caller.
#[derive(Debug)]
pub struct StreamReceiver {
    shared: Arc<Shared>,
}

impl StreamReceiver {
    /// Next event, or `None` once the terminal event has been delivered.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(event) = state.queue.pop_front() {
                    return Some(event);
                }
                if let Some(event) = state.terminal.take() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Next event if one is buffered.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        let mut state = self.shared.state.lock();
        state.queue.pop_front().or_else(|| state.terminal.take())
    }

    pub fn dropped(&self) -> usize {
        self.shared.state.lock().dropped
    }

    /// Adapt into a `futures::Stream` ending after the terminal event.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> {
        futures::stream::unfold(self, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.receiver_gone = true;
        state.queue.clear();
    }
}
