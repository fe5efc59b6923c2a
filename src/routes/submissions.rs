use actix_web::{HttpResponse, Responder, get, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::{external_error, not_found};
use crate::config::Language;
use crate::database as db;
use crate::judge::Verdict;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub id: u32,
    pub created_time: String,
    pub challenge_id: Option<u32>,
    pub language: Language,
    pub code: String,
    pub verdict: Verdict,
}

#[derive(Deserialize, Debug, Default)]
pub struct SubmissionsQueryParams {
    pub challenge_id: Option<u32>,
    pub language: Option<Language>,
    pub passed: Option<bool>,
}

#[get("/api/submissions")]
pub async fn get_submissions_handler(
    pool: web::Data<SqlitePool>,
    query: web::Query<SubmissionsQueryParams>,
) -> impl Responder {
    match db::fetch_submissions(&query, pool.into_inner()).await {
        Ok(records) => {
            log::info!("Got {} submission records", records.len());
            HttpResponse::Ok().json(records)
        }
        Err(e) => {
            log::error!("Failed to retrieve submission records: {e}");
            external_error()
        }
    }
}

#[get("/api/submissions/{id}")]
pub async fn get_submission_by_id_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<(u32,)>,
) -> impl Responder {
    let submission_id = path.into_inner().0;

    match db::fetch_submission(submission_id, pool.into_inner()).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(sqlx::Error::RowNotFound) => {
            log::info!("Got nothing with submission id {submission_id} from database");
            not_found(format!("Submission {submission_id} not found."))
        }
        Err(e) => {
            log::error!("Failed to retrieve submission record from database: {e}");
            external_error()
        }
    }
}
