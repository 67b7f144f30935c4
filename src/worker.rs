use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::judge::{JudgeError, JudgeService};
use crate::queue::{JobQueue, JudgeRequest};
use crate::sandbox::SandboxRunner;

/// Judge worker loop. Each worker owns one sandbox runner, so the worker
/// count is the bound on concurrent sandbox runs.
pub async fn worker(
    id: u8,
    service: Arc<JudgeService>,
    sandbox: Arc<dyn SandboxRunner>,
    queue: Arc<JobQueue>,
    max_queue_wait: Duration,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            request = queue.pop() => {
                let JudgeRequest {
                    submission_id,
                    username,
                    problem_id,
                    source,
                    enqueued_at,
                    responder,
                } = request;

                let waited = enqueued_at.elapsed();
                if waited > max_queue_wait {
                    log::warn!(
                        "Submission {submission_id} waited {}ms in queue, rejecting as overloaded",
                        waited.as_millis()
                    );
                    service.reject_overloaded(submission_id).await;
                    let _ = responder.send(Err(JudgeError::Overloaded));
                    continue;
                }

                log::info!("Worker {id} judging submission {submission_id} (user {username}, problem {problem_id})");
                let result = service
                    .judge(sandbox.clone(), submission_id, &username, problem_id, &source)
                    .await;
                log::info!("Submission {submission_id} finished on worker {id}");

                if responder.send(result).is_err() {
                    // Client went away; the verdict is already persisted and
                    // scored, only delivery is skipped.
                    log::warn!("Client for submission {submission_id} disconnected before the verdict");
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}
