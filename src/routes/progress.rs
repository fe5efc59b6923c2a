use actix_web::{HttpResponse, Responder, get, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::external_error;
use crate::config::{ChallengeConfig, Language};
use crate::database as db;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub challenge_id: u32,
    pub language: Language,
    pub code: String,
    pub completed_time: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LanguageProgress {
    pub language: Language,
    pub total: usize,
    pub completed: usize,
    pub all_completed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub completions: Vec<CompletionRecord>,
    pub languages: Vec<LanguageProgress>,
}

/// Completions plus, for every language in the catalog, whether all of it is done
#[get("/api/progress")]
pub async fn get_progress_handler(
    pool: web::Data<SqlitePool>,
    challenges: web::Data<Vec<ChallengeConfig>>,
) -> impl Responder {
    let completions = match db::fetch_completions(pool.clone().into_inner()).await {
        Ok(completions) => completions,
        Err(e) => {
            log::error!("Failed to retrieve completions: {e}");
            return external_error();
        }
    };

    let mut languages = Vec::new();
    for language in Language::ALL {
        let ids: Vec<u32> = challenges
            .iter()
            .filter(|c| c.language == language)
            .map(|c| c.id)
            .collect();
        if ids.is_empty() {
            continue;
        }

        let all_completed =
            match db::has_completed_all(language, &ids, pool.clone().into_inner()).await {
                Ok(done) => done,
                Err(e) => {
                    log::error!("Failed to check {language} progress: {e}");
                    return external_error();
                }
            };
        let completed = completions
            .iter()
            .filter(|c| c.language == language && ids.contains(&c.challenge_id))
            .count();

        languages.push(LanguageProgress {
            language,
            total: ids.len(),
            completed,
            all_completed,
        });
    }

    HttpResponse::Ok().json(ProgressReport {
        completions,
        languages,
    })
}
