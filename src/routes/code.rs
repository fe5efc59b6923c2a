use actix_web::{HttpResponse, Responder, post, web};
use serde::Deserialize;

use super::{grade, validate_source};
use crate::config::{ChallengeConfig, Language, SandboxConfig};
use crate::judge::Submission;
use crate::queue::GradeQueue;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub code: String,
    pub language: Language,
    pub challenge_id: Option<u32>,
}

/// Runs code against a challenge's cases, or plainly when there is no such challenge
#[post("/api/code/run")]
pub async fn run_code_handler(
    queue: web::Data<GradeQueue>,
    challenges: web::Data<Vec<ChallengeConfig>>,
    sandbox: web::Data<SandboxConfig>,
    body: web::Json<RunRequest>,
) -> impl Responder {
    if let Err(response) = validate_source(&body.code, &sandbox) {
        return response;
    }

    let RunRequest {
        code,
        language,
        challenge_id,
    } = body.into_inner();

    let challenge = challenge_id.and_then(|id| challenges.iter().find(|c| c.id == id));
    if let (Some(id), None) = (challenge_id, challenge) {
        log::info!("Challenge {id} not found, running code without test cases");
    }

    let submission = Submission {
        source_text: code,
        language,
        test_cases: challenge.map(|c| c.test_cases.clone()).unwrap_or_default(),
        challenge_id: challenge.map(|c| c.id),
    };

    match grade(&queue, submission).await {
        Ok(verdict) => HttpResponse::Ok().json(verdict),
        Err(response) => response,
    }
}
