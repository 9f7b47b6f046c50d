use crate::kubernetes::LineSource;
use futures::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace};

/// How many unread lines a log stream keeps for a slow reader.
pub const LOG_BUFFER_CAPACITY: usize = 3;

#[derive(Debug, Default)]
struct BufferState {
    lines: VecDeque<String>,
    closed: bool,
    dropped: u64,
}

/// Bounded single-consumer line queue. When full, the oldest unread line
/// is dropped to make room.
#[derive(Debug)]
pub struct LogBuffer {
    state: Mutex<BufferState>,
    capacity: usize,
    notify: Notify,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a line. Returns `false` if the buffer is already closed.
    pub fn push(&self, line: String) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            if state.lines.len() == self.capacity {
                state.lines.pop_front();
                state.dropped += 1;
            }
            state.lines.push_back(line);
        }
        self.notify.notify_one();
        true
    }

    /// Marks the end of input. Lines already queued can still be read.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    /// Closes the buffer and throws away anything unread.
    pub fn discard(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.lines.clear();
            state.lines.shrink_to_fit();
        }
        self.notify.notify_one();
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Waits for the next line; `None` once the buffer is closed and drained.
    pub async fn next_line(&self) -> Option<String> {
        loop {
            {
                let mut state = self.lock();
                if let Some(line) = state.lines.pop_front() {
                    return Some(line);
                }
                if state.closed {
                    return None;
                }
            }
            // notify_one stores a permit when nobody waits, so a push that
            // lands between the unlock above and this await is not lost.
            self.notify.notified().await;
        }
    }
}

/// A followed log. Lines are produced by a background task and read here;
/// dropping the handle stops the task.
pub struct LogStream {
    buffer: Arc<LogBuffer>,
    producer: AbortHandle,
    unit: String,
}

impl LogStream {
    pub(crate) fn spawn(source: LineSource, capacity: usize, unit: impl Into<String>) -> Self {
        let unit = unit.into();
        let buffer = Arc::new(LogBuffer::new(capacity));
        let handle = tokio::spawn(produce(source, buffer.clone(), unit.clone()));
        Self {
            buffer,
            producer: handle.abort_handle(),
            unit,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub async fn next_line(&mut self) -> Option<String> {
        self.buffer.next_line().await
    }

    /// Stops the producer, closes the connection behind it and releases
    /// whatever was buffered.
    pub fn cancel(&mut self) {
        debug!("Cancelling log stream for {}", self.unit);
        self.producer.abort();
        self.buffer.discard();
    }

    #[cfg(test)]
    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        futures::stream::unfold(self, |mut logs| async move {
            logs.next_line().await.map(|line| (line, logs))
        })
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

async fn produce(mut source: LineSource, buffer: Arc<LogBuffer>, unit: String) {
    while let Some(next) = source.next().await {
        match next {
            Ok(line) => {
                if !buffer.push(line) {
                    break;
                }
            }
            Err(e) => {
                error!("Can't get more information from the log of {}: {}", unit, e);
                break;
            }
        }
    }
    trace!(
        "Log producer for {} finished, {} lines dropped",
        unit,
        buffer.dropped()
    );
    buffer.close();
}
