use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SandboxConfig;
use crate::judge::Judge;
use crate::queue::GradeQueue;
use crate::sandbox::{SandboxRunner, create_sandbox_runner};

pub async fn worker(
    id: u8,
    judge: Arc<Judge>,
    sandbox_config: Arc<SandboxConfig>,
    queue: Arc<GradeQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let sandbox: Arc<dyn SandboxRunner> = Arc::from(create_sandbox_runner(id, sandbox_config)?);
    log::info!("Worker {id} initialized with {} sandbox", sandbox.name());

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            message = queue.pop() => {
                let grade_id = message.id;

                // 1. Nobody is waiting any more
                if message.responder.is_closed() {
                    log::info!("Grading request {grade_id} was abandoned, skipped on worker {id}");
                    continue;
                }
                log::info!("Worker {id} got grading request {grade_id} from queue");

                // 2. Grade on a blocking thread, the sandbox waits on child processes
                let sandbox_ref = Arc::clone(&sandbox);
                let judge_ref = Arc::clone(&judge);
                let submission = message.submission;
                let verdict_handle = tokio::task::spawn_blocking(move || {
                    let verdict = judge_ref.grade(sandbox_ref.as_ref(), &submission);
                    log::info!("Grading request {grade_id} finished on worker {id}");
                    verdict
                });

                // 3. Give back control to the runtime until grading is done
                match verdict_handle.await {
                    Ok(verdict) => {
                        if message.responder.send(verdict).is_err() {
                            log::warn!("Failed to send verdict {grade_id} back to server");
                        } else {
                            log::debug!("Verdict {grade_id} sent back from worker {id}");
                        }
                    }
                    Err(e) => {
                        // dropping the responder tells the requester grading failed
                        log::error!("Grading request {grade_id} failed on worker {id}: {e:?}");
                    }
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}
