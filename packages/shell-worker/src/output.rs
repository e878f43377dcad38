//! Output backpressure (§9): a bounded buffer between the executor's line
//! reader and the store's persister task. `tokio::sync::mpsc` only offers
//! drop-newest (`try_send` failing) or unbounded backpressure-free growth;
//! neither drops the *oldest* line on overflow, so this is a small
//! `VecDeque` guarded by a mutex and woken with a `Notify`, sized and
//! drained exactly like a channel would be.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

pub const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub text: String,
    pub is_stderr: bool,
}

pub struct OutputChannel {
    buffer: Mutex<VecDeque<OutputLine>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl OutputChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Pushes a line, dropping the oldest buffered line if full and
    /// recording the drop count so a diagnostic marker can be appended.
    pub fn push(&self, line: OutputLine) {
        let mut buf = self.buffer.lock().unwrap();
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(line);
        drop(buf);
        self.notify.notify_one();
    }

    /// Drains everything currently buffered without waiting.
    pub fn drain(&self) -> Vec<OutputLine> {
        self.buffer.lock().unwrap().drain(..).collect()
    }

    /// Waits until a line is available or the channel is closed and empty.
    pub async fn recv(&self) -> Option<OutputLine> {
        loop {
            if let Some(line) = self.buffer.lock().unwrap().pop_front() {
                return Some(line);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// A diagnostic line to append to the job's output once, if any lines
    /// were dropped for overflow, per the §9 overflow contract.
    pub fn overflow_diagnostic(&self) -> Option<String> {
        let dropped = self.dropped_count();
        if dropped == 0 {
            None
        } else {
            Some(format!("[shellfleet] {dropped} output line(s) dropped due to backpressure\n"))
        }
    }
}
