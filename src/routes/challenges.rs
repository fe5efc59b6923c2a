use actix_web::{HttpResponse, Responder, get, post, web};
use serde::Deserialize;
use sqlx::sqlite::SqlitePool;

use super::{external_error, grade, not_found, validate_source};
use crate::config::{ChallengeConfig, Language, SandboxConfig};
use crate::database as db;
use crate::judge::Submission;
use crate::queue::GradeQueue;

#[derive(Deserialize, Debug)]
pub struct ChallengesQueryParams {
    pub language: Option<Language>,
    /// `all` (or absent) matches every difficulty
    pub difficulty: Option<String>,
}

impl ChallengesQueryParams {
    fn matches(&self, challenge: &ChallengeConfig) -> bool {
        let language_ok = self.language.is_none_or(|language| challenge.language == language);
        let difficulty_ok = match self.difficulty.as_deref() {
            None | Some("all") => true,
            Some(difficulty) => challenge.difficulty.as_deref() == Some(difficulty),
        };
        language_ok && difficulty_ok
    }
}

#[derive(Deserialize, Debug)]
pub struct SubmitRequest {
    pub code: String,
    pub language: Language,
}

#[get("/api/challenges")]
pub async fn get_challenges_handler(
    challenges: web::Data<Vec<ChallengeConfig>>,
    query: web::Query<ChallengesQueryParams>,
) -> impl Responder {
    let selected: Vec<&ChallengeConfig> = challenges
        .iter()
        .filter(|c| query.matches(c))
        .collect();
    HttpResponse::Ok().json(selected)
}

#[get("/api/challenges/{id}")]
pub async fn get_challenge_by_id_handler(
    challenges: web::Data<Vec<ChallengeConfig>>,
    path: web::Path<(u32,)>,
) -> impl Responder {
    let challenge_id = path.into_inner().0;
    match challenges.iter().find(|c| c.id == challenge_id) {
        Some(challenge) => HttpResponse::Ok().json(challenge),
        None => not_found(format!("Challenge {challenge_id} not found.")),
    }
}

/// Grades a submission for a challenge, records it and marks completion on a pass
#[post("/api/challenges/{id}/submit")]
pub async fn submit_challenge_handler(
    queue: web::Data<GradeQueue>,
    pool: web::Data<SqlitePool>,
    challenges: web::Data<Vec<ChallengeConfig>>,
    sandbox: web::Data<SandboxConfig>,
    path: web::Path<(u32,)>,
    body: web::Json<SubmitRequest>,
) -> impl Responder {
    let challenge_id = path.into_inner().0;
    let Some(challenge) = challenges.iter().find(|c| c.id == challenge_id) else {
        return not_found(format!("Challenge {challenge_id} not found."));
    };
    if let Err(response) = validate_source(&body.code, &sandbox) {
        return response;
    }

    let SubmitRequest { code, language } = body.into_inner();
    let submission = Submission {
        source_text: code,
        language,
        test_cases: challenge.test_cases.clone(),
        challenge_id: Some(challenge_id),
    };

    let verdict = match grade(&queue, submission.clone()).await {
        Ok(verdict) => verdict,
        Err(response) => return response,
    };

    match db::save_submission(
        Some(challenge_id),
        language,
        &submission.source_text,
        &verdict,
        pool.clone().into_inner(),
    )
    .await
    {
        Ok(id) => log::info!("Saved submission {id} for challenge {challenge_id}"),
        Err(e) => {
            log::error!("Failed to save submission for challenge {challenge_id}: {e}");
            return external_error();
        }
    }

    if verdict.passed {
        if let Err(e) =
            db::mark_completed(challenge_id, language, &submission.source_text, pool.into_inner())
                .await
        {
            log::error!("Failed to mark challenge {challenge_id} completed: {e}");
            return external_error();
        }
        log::info!("Challenge {challenge_id} completed in {language}");
    }

    HttpResponse::Ok().json(verdict)
}
