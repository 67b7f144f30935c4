use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::{Mutex, Notify, oneshot};

use crate::judge::{JudgeError, Verdict};

/// One queued judge request, carrying the oneshot the HTTP handler is
/// awaiting. Dropping the receiver does not cancel the run; the verdict is
/// still recorded, only its delivery is skipped.
pub struct JudgeRequest {
    pub submission_id: i64,
    pub username: String,
    pub problem_id: i64,
    pub source: String,
    pub enqueued_at: Instant,
    pub responder: oneshot::Sender<Result<Verdict, JudgeError>>,
}

/// FIFO queue between the HTTP handlers and the judge workers. The worker
/// pool bounds concurrent sandbox runs; saturation shows up here as queue
/// depth, and workers reject requests that waited past the configured bound.
pub struct JobQueue {
    queue: Mutex<VecDeque<JudgeRequest>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, request: JudgeRequest) {
        self.queue.lock().await.push_back(request);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> JudgeRequest {
        loop {
            if let Some(request) = self.queue.lock().await.pop_front() {
                return request;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
