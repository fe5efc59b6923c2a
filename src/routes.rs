mod challenges;
mod code;
mod progress;
mod submissions;

pub use challenges::{get_challenge_by_id_handler, get_challenges_handler, submit_challenge_handler};
pub use code::run_code_handler;
pub use progress::{CompletionRecord, LanguageProgress, ProgressReport, get_progress_handler};
pub use submissions::{
    SubmissionRecord, SubmissionsQueryParams, get_submission_by_id_handler, get_submissions_handler,
};

use actix_web::error::{InternalError, JsonPayloadError, QueryPayloadError};
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

use crate::config::SandboxConfig;
use crate::judge::{Submission, Verdict};
use crate::queue::{GradeMessage, GradeQueue};

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
}

#[derive(Serialize)]
struct ErrorResponseWithMessage {
    reason: &'static str,
    code: u32,
    message: String,
}

fn invalid_argument(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponseWithMessage {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
        message: message.into(),
    })
}

fn not_found(message: impl Into<String>) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponseWithMessage {
        reason: "ERR_NOT_FOUND",
        code: 3,
        message: message.into(),
    })
}

fn external_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse {
        reason: "ERR_EXTERNAL",
        code: 5,
    })
}

fn internal_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse {
        reason: "ERR_INTERNAL",
        code: 6,
    })
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

/// Rejects source text the graders should never see
fn validate_source(code: &str, sandbox: &SandboxConfig) -> Result<(), HttpResponse> {
    if code.trim().is_empty() {
        return Err(invalid_argument("Code and language are required"));
    }
    if code.len() > sandbox.max_source_bytes {
        return Err(invalid_argument(format!(
            "Code exceeds the maximum size of {} bytes",
            sandbox.max_source_bytes
        )));
    }
    Ok(())
}

/// Hands a submission to the worker pool and waits for its verdict
async fn grade(queue: &GradeQueue, submission: Submission) -> Result<Verdict, HttpResponse> {
    let grade_id = queue.next_id();
    let (message, rx) = GradeMessage::new(grade_id, submission);

    queue.push(message).await;
    log::debug!("Sent grading request {grade_id} to queue");

    match rx.await {
        Ok(verdict) => {
            log::info!(
                "Received verdict for grading request {grade_id} (passed: {})",
                verdict.passed
            );
            Ok(verdict)
        }
        Err(e) => {
            log::error!("Failed to receive verdict for grading request {grade_id}: {e}");
            Err(internal_error())
        }
    }
}
