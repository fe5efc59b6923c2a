use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use crate::config::Language;
use crate::create_timestamp;
use crate::judge::{CaseVerdict, Verdict};
use crate::routes::{CompletionRecord, SubmissionRecord, SubmissionsQueryParams};

const DATABASE_NAME: &str = "codejudge.sqlite3";

pub fn get_db_path() -> anyhow::Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "codejudge")
        .ok_or_else(|| anyhow!("Unable to find user directory"))?;
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir)?;

    Ok(data_dir.join(DATABASE_NAME))
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id              INTEGER  PRIMARY KEY AUTOINCREMENT,
            created_time    TEXT     NOT NULL,
            challenge_id    INTEGER,
            language        TEXT     NOT NULL,
            source_code     TEXT     NOT NULL,
            passed          INTEGER  NOT NULL,
            console_output  TEXT     NOT NULL DEFAULT ''
        );",
        "CREATE INDEX IF NOT EXISTS idx_submissions_challenge ON submissions(challenge_id);",
        r"
        CREATE TABLE IF NOT EXISTS submission_case (
            submission_id    INTEGER  NOT NULL,
            case_index       INTEGER  NOT NULL,
            input            TEXT     NOT NULL,
            expected_output  TEXT     NOT NULL,
            actual_output    TEXT     NOT NULL,
            passed           INTEGER  NOT NULL,
            PRIMARY KEY (submission_id, case_index),
            FOREIGN KEY (submission_id)  REFERENCES submissions (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS completions (
            challenge_id    INTEGER  NOT NULL,
            language        TEXT     NOT NULL,
            code            TEXT     NOT NULL,
            completed_time  TEXT     NOT NULL,
            PRIMARY KEY (challenge_id, language)
        );",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Records a graded submission and its per-case results, returning the new id
pub async fn save_submission(
    challenge_id: Option<u32>,
    language: Language,
    source_code: &str,
    verdict: &Verdict,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<u32> {
    let now = create_timestamp();
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO submissions (created_time, challenge_id, language, source_code, passed, console_output)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&now)
    .bind(challenge_id.map(i64::from))
    .bind(language.as_str())
    .bind(source_code)
    .bind(verdict.passed)
    .bind(&verdict.console_output)
    .execute(tx.as_mut())
    .await?;

    let id = result.last_insert_rowid();

    for (index, case) in verdict.results.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO submission_case (submission_id, case_index, input, expected_output, actual_output, passed)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(index as i64)
        .bind(&case.input)
        .bind(&case.expected_output)
        .bind(&case.actual_output)
        .bind(case.passed)
        .execute(tx.as_mut())
        .await?;
    }

    tx.commit().await?;
    Ok(id as u32)
}

pub async fn fetch_submission(id: u32, pool: Arc<SqlitePool>) -> sqlx::Result<SubmissionRecord> {
    log::debug!("Trying to fetch submission {id} from database");

    let mut conn = pool.acquire().await?;
    let row = sqlx::query(
        r#"
        SELECT id, created_time, challenge_id, language, source_code, passed, console_output
        FROM submissions
        WHERE id = ?
        "#,
    )
    .bind(i64::from(id))
    .fetch_one(conn.as_mut())
    .await?;

    let cases = fetch_cases(id, conn.as_mut()).await?;
    submission_from_row(&row, cases)
}

pub async fn fetch_submissions(
    query: &SubmissionsQueryParams,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<Vec<SubmissionRecord>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, created_time, challenge_id, language, source_code, passed, console_output \
         FROM submissions WHERE 1=1",
    );

    if let Some(challenge_id) = query.challenge_id {
        qb.push(" AND challenge_id = ").push_bind(i64::from(challenge_id));
    }
    if let Some(language) = query.language {
        qb.push(" AND language = ").push_bind(language.as_str());
    }
    if let Some(passed) = query.passed {
        qb.push(" AND passed = ").push_bind(passed);
    }
    qb.push(" ORDER BY id");

    let mut conn = pool.acquire().await?;
    let rows = qb.build().fetch_all(conn.as_mut()).await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.try_get("id")?;
        let cases = fetch_cases(id as u32, conn.as_mut()).await?;
        records.push(submission_from_row(&row, cases)?);
    }
    Ok(records)
}

async fn fetch_cases(submission_id: u32, conn: &mut SqliteConnection) -> sqlx::Result<Vec<CaseVerdict>> {
    let rows = sqlx::query(
        r#"
        SELECT input, expected_output, actual_output, passed
        FROM submission_case
        WHERE submission_id = ?
        ORDER BY case_index
        "#,
    )
    .bind(i64::from(submission_id))
    .fetch_all(conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(CaseVerdict {
                input: row.try_get("input")?,
                expected_output: row.try_get("expected_output")?,
                actual_output: row.try_get("actual_output")?,
                passed: row.try_get("passed")?,
            })
        })
        .collect()
}

fn submission_from_row(row: &SqliteRow, results: Vec<CaseVerdict>) -> sqlx::Result<SubmissionRecord> {
    let id: i64 = row.try_get("id")?;
    let challenge_id: Option<i64> = row.try_get("challenge_id")?;
    Ok(SubmissionRecord {
        id: id as u32,
        created_time: row.try_get("created_time")?,
        challenge_id: challenge_id.map(|id| id as u32),
        language: decode_language(row.try_get("language")?)?,
        code: row.try_get("source_code")?,
        verdict: Verdict {
            passed: row.try_get("passed")?,
            results,
            console_output: row.try_get("console_output")?,
        },
    })
}

fn decode_language(name: String) -> sqlx::Result<Language> {
    Language::parse(&name)
        .ok_or_else(|| sqlx::Error::Decode(format!("Unknown language {name} in database").into()))
}

/// Remembers that `challenge_id` was solved in `language`
///
/// A later passing submission replaces the stored code but keeps the original
/// completion time.
pub async fn mark_completed(
    challenge_id: u32,
    language: Language,
    code: &str,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<()> {
    let now = create_timestamp();
    sqlx::query(
        r#"
        INSERT INTO completions (challenge_id, language, code, completed_time)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (challenge_id, language) DO UPDATE SET code = excluded.code
        "#,
    )
    .bind(i64::from(challenge_id))
    .bind(language.as_str())
    .bind(code)
    .bind(now)
    .execute(pool.as_ref())
    .await?;
    Ok(())
}

pub async fn fetch_completions(pool: Arc<SqlitePool>) -> sqlx::Result<Vec<CompletionRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT challenge_id, language, code, completed_time
        FROM completions
        ORDER BY completed_time, challenge_id
        "#,
    )
    .fetch_all(pool.as_ref())
    .await?;

    rows.iter()
        .map(|row| {
            let challenge_id: i64 = row.try_get("challenge_id")?;
            Ok(CompletionRecord {
                challenge_id: challenge_id as u32,
                language: decode_language(row.try_get("language")?)?,
                code: row.try_get("code")?,
                completed_time: row.try_get("completed_time")?,
            })
        })
        .collect()
}

/// Whether every challenge in `challenge_ids` has a completion in `language`
///
/// An empty list is never "all completed".
pub async fn has_completed_all(
    language: Language,
    challenge_ids: &[u32],
    pool: Arc<SqlitePool>,
) -> sqlx::Result<bool> {
    if challenge_ids.is_empty() {
        return Ok(false);
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT COUNT(DISTINCT challenge_id) AS done FROM completions WHERE language = ",
    );
    qb.push_bind(language.as_str());
    qb.push(" AND challenge_id IN (");
    let mut separated = qb.separated(", ");
    for id in challenge_ids {
        separated.push_bind(i64::from(*id));
    }
    separated.push_unseparated(")");

    let done: i64 = qb.build().fetch_one(pool.as_ref()).await?.try_get("done")?;

    let mut unique = challenge_ids.to_vec();
    unique.sort_unstable();
    unique.dedup();
    Ok(done as usize == unique.len())
}
