use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, Notify, oneshot};

use crate::judge::{Submission, Verdict};

/// A submission waiting for a worker, plus the channel its verdict goes back on
pub struct GradeMessage {
    pub id: u64,
    pub submission: Submission,
    pub responder: oneshot::Sender<Verdict>,
}

impl GradeMessage {
    /// Builds a message and the receiver the requester waits on
    pub fn new(id: u64, submission: Submission) -> (Self, oneshot::Receiver<Verdict>) {
        let (responder, receiver) = oneshot::channel();
        (
            Self {
                id,
                submission,
                responder,
            },
            receiver,
        )
    }
}

pub struct GradeQueue {
    queue: Mutex<VecDeque<GradeMessage>>,
    notify: Notify,
    next_id: AtomicU64,
}

impl GradeQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hands out ids used to follow a request through the logs
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn push(&self, message: GradeMessage) {
        self.queue.lock().await.push_back(message);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> GradeMessage {
        loop {
            if let Some(message) = self.queue.lock().await.pop_front() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for GradeQueue {
    fn default() -> Self {
        Self::new()
    }
}
