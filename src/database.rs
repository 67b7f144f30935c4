use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::score::ScoreLedger;

const DATABASE_NAME: &str = "arena.sqlite3";

/// A problem as authored by the admin collaborator.
///
/// Exactly one test-definition mode is expected to be populated: the legacy
/// raw pair (`input`/`output` plus hidden `runner_code`) or the structured
/// pair (`signature_json`/`test_cases_json`). The judge enforces this when it
/// builds a test plan.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Problem {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub contest_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub runner_code: String,
    #[serde(default)]
    pub signature_json: String,
    #[serde(default)]
    pub test_cases_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contest {
    #[serde(default)]
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    /// JSON-encoded Registration Schema: `[{"name": .., "required": bool}]`.
    #[serde(default)]
    pub registration_config: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Registration {
    pub id: i64,
    pub user_id: String,
    pub contest_id: i64,
    pub extra_info: String,
    pub registered_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubmissionRecord {
    pub id: i64,
    pub user_id: String,
    pub problem_id: i64,
    pub status: String,
    pub output: String,
    pub failed_index: Option<i64>,
    pub passed_count: i64,
    pub total_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub fn get_db_path(configured: Option<&str>) -> PathBuf {
    match configured {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(DATABASE_NAME),
    }
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",  // Write-Ahead Logging for better concurrency
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS users (
            username      TEXT PRIMARY KEY,
            email         TEXT NOT NULL DEFAULT '',
            password      TEXT NOT NULL DEFAULT ''
        );",
        r"
        CREATE TABLE IF NOT EXISTS contests (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            title                TEXT NOT NULL,
            description          TEXT NOT NULL DEFAULT '',
            start_time           TEXT NOT NULL DEFAULT '',
            end_time             TEXT NOT NULL DEFAULT '',
            registration_config  TEXT NOT NULL DEFAULT ''
        );",
        r"
        CREATE TABLE IF NOT EXISTS problems (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            contest_id       INTEGER NOT NULL DEFAULT 0,
            title            TEXT NOT NULL,
            description      TEXT NOT NULL DEFAULT '',
            difficulty       TEXT NOT NULL DEFAULT '',
            points           INTEGER NOT NULL DEFAULT 0,
            template         TEXT NOT NULL DEFAULT '',
            input            TEXT NOT NULL DEFAULT '',
            output           TEXT NOT NULL DEFAULT '',
            runner_code      TEXT NOT NULL DEFAULT '',
            signature_json   TEXT NOT NULL DEFAULT '',
            test_cases_json  TEXT NOT NULL DEFAULT ''
        );",
        r"
        CREATE TABLE IF NOT EXISTS registrations (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id        TEXT NOT NULL,
            contest_id     INTEGER NOT NULL,
            extra_info     TEXT NOT NULL DEFAULT '',
            registered_at  TEXT NOT NULL,
            UNIQUE (user_id, contest_id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       TEXT NOT NULL,
            problem_id    INTEGER NOT NULL,
            status        TEXT NOT NULL,
            output        TEXT NOT NULL DEFAULT '',
            failed_index  INTEGER,
            passed_count  INTEGER NOT NULL DEFAULT 0,
            total_count   INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );",
        "CREATE INDEX IF NOT EXISTS idx_submissions_problem ON submissions(problem_id, status);",
        "CREATE INDEX IF NOT EXISTS idx_problems_contest ON problems(contest_id);",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // WAL and SHM files might not exist, ignore errors
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

// ===== problems =====

pub async fn create_problem(problem: &Problem, pool: Arc<SqlitePool>) -> sqlx::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO problems
            (contest_id, title, description, difficulty, points, template,
             input, output, runner_code, signature_json, test_cases_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(problem.contest_id)
    .bind(&problem.title)
    .bind(&problem.description)
    .bind(&problem.difficulty)
    .bind(problem.points)
    .bind(&problem.template)
    .bind(&problem.input)
    .bind(&problem.output)
    .bind(&problem.runner_code)
    .bind(&problem.signature_json)
    .bind(&problem.test_cases_json)
    .execute(pool.as_ref())
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn update_problem(problem: &Problem, pool: Arc<SqlitePool>) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE problems
        SET contest_id = ?, title = ?, description = ?, difficulty = ?, points = ?,
            template = ?, input = ?, output = ?, runner_code = ?,
            signature_json = ?, test_cases_json = ?
        WHERE id = ?
        "#,
    )
    .bind(problem.contest_id)
    .bind(&problem.title)
    .bind(&problem.description)
    .bind(&problem.difficulty)
    .bind(problem.points)
    .bind(&problem.template)
    .bind(&problem.input)
    .bind(&problem.output)
    .bind(&problem.runner_code)
    .bind(&problem.signature_json)
    .bind(&problem.test_cases_json)
    .bind(problem.id)
    .execute(pool.as_ref())
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_problem(id: i64, pool: Arc<SqlitePool>) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM problems WHERE id = ?")
        .bind(id)
        .execute(pool.as_ref())
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_problem(id: i64, pool: Arc<SqlitePool>) -> sqlx::Result<Option<Problem>> {
    sqlx::query_as::<_, Problem>("SELECT * FROM problems WHERE id = ?")
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await
}

pub async fn list_problems(pool: Arc<SqlitePool>) -> sqlx::Result<Vec<Problem>> {
    sqlx::query_as::<_, Problem>("SELECT * FROM problems ORDER BY id")
        .fetch_all(pool.as_ref())
        .await
}

/// Practice problems are the ones not assigned to any contest.
pub async fn list_practice_problems(pool: Arc<SqlitePool>) -> sqlx::Result<Vec<Problem>> {
    sqlx::query_as::<_, Problem>("SELECT * FROM problems WHERE contest_id = 0 ORDER BY id")
        .fetch_all(pool.as_ref())
        .await
}

// ===== contests =====

pub async fn create_contest(contest: &Contest, pool: Arc<SqlitePool>) -> sqlx::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO contests (title, description, start_time, end_time, registration_config)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&contest.title)
    .bind(&contest.description)
    .bind(&contest.start_time)
    .bind(&contest.end_time)
    .bind(&contest.registration_config)
    .execute(pool.as_ref())
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn update_contest(contest: &Contest, pool: Arc<SqlitePool>) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contests
        SET title = ?, description = ?, start_time = ?, end_time = ?, registration_config = ?
        WHERE id = ?
        "#,
    )
    .bind(&contest.title)
    .bind(&contest.description)
    .bind(&contest.start_time)
    .bind(&contest.end_time)
    .bind(&contest.registration_config)
    .bind(contest.id)
    .execute(pool.as_ref())
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Deleting a contest turns its problems into practice problems rather than
/// orphaning them.
pub async fn delete_contest(id: i64, pool: Arc<SqlitePool>) -> sqlx::Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE problems SET contest_id = 0 WHERE contest_id = ?")
        .bind(id)
        .execute(tx.as_mut())
        .await?;

    let result = sqlx::query("DELETE FROM contests WHERE id = ?")
        .bind(id)
        .execute(tx.as_mut())
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_contest(id: i64, pool: Arc<SqlitePool>) -> sqlx::Result<Option<Contest>> {
    sqlx::query_as::<_, Contest>("SELECT * FROM contests WHERE id = ?")
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await
}

pub async fn list_contests(pool: Arc<SqlitePool>) -> sqlx::Result<Vec<Contest>> {
    sqlx::query_as::<_, Contest>("SELECT * FROM contests ORDER BY id")
        .fetch_all(pool.as_ref())
        .await
}

pub async fn list_contest_problems(
    contest_id: i64,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<Vec<Problem>> {
    sqlx::query_as::<_, Problem>("SELECT * FROM problems WHERE contest_id = ? ORDER BY id")
        .bind(contest_id)
        .fetch_all(pool.as_ref())
        .await
}

// ===== registrations =====

pub async fn is_registered(
    user_id: &str,
    contest_id: i64,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM registrations WHERE user_id = ? AND contest_id = ?")
            .bind(user_id)
            .bind(contest_id)
            .fetch_optional(pool.as_ref())
            .await?;
    Ok(row.is_some())
}

pub async fn create_registration(
    user_id: &str,
    contest_id: i64,
    extra_info: &str,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<i64> {
    let now = crate::create_timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO registrations (user_id, contest_id, extra_info, registered_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(contest_id)
    .bind(extra_info)
    .bind(now)
    .execute(pool.as_ref())
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn list_registrations(
    contest_id: i64,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<Vec<Registration>> {
    sqlx::query_as::<_, Registration>(
        "SELECT * FROM registrations WHERE contest_id = ? ORDER BY registered_at",
    )
    .bind(contest_id)
    .fetch_all(pool.as_ref())
    .await
}

pub async fn count_registrations(contest_id: i64, pool: Arc<SqlitePool>) -> sqlx::Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM registrations WHERE contest_id = ?")
        .bind(contest_id)
        .fetch_one(pool.as_ref())
        .await?;
    Ok(row.0)
}

// ===== users =====

pub async fn create_user(user: &User, pool: Arc<SqlitePool>) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO users (username, email, password) VALUES (?, ?, ?)")
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password)
        .execute(pool.as_ref())
        .await?;
    Ok(())
}

pub async fn verify_user(
    username: &str,
    password: &str,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM users WHERE username = ? AND password = ?")
            .bind(username)
            .bind(password)
            .fetch_optional(pool.as_ref())
            .await?;
    Ok(row.is_some())
}

// ===== submissions =====

/// Creates the Pending submission row for a judge request. The row is
/// finalized exactly once with the verdict (or Error); history is append-only.
pub async fn create_submission(
    user_id: &str,
    problem_id: i64,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<i64> {
    let now = crate::create_timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO submissions (user_id, problem_id, status, created_at)
        VALUES (?, ?, 'Pending', ?)
        "#,
    )
    .bind(user_id)
    .bind(problem_id)
    .bind(now)
    .execute(pool.as_ref())
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn finalize_submission(
    id: i64,
    status: &str,
    output: &str,
    failed_index: Option<i64>,
    passed_count: i64,
    total_count: i64,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE submissions
        SET status = ?, output = ?, failed_index = ?, passed_count = ?, total_count = ?
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(output)
    .bind(failed_index)
    .bind(passed_count)
    .bind(total_count)
    .bind(id)
    .execute(pool.as_ref())
    .await?;
    Ok(())
}

pub async fn list_passed_submissions(
    problem_id: i64,
    pool: Arc<SqlitePool>,
) -> sqlx::Result<Vec<SubmissionRecord>> {
    sqlx::query_as::<_, SubmissionRecord>(
        r#"
        SELECT * FROM submissions
        WHERE problem_id = ? AND status = 'Passed'
        ORDER BY created_at
        "#,
    )
    .bind(problem_id)
    .fetch_all(pool.as_ref())
    .await
}

// ===== ledger hydration =====

/// Rebuilds the in-memory score ledger from persisted state: passed
/// submissions credit problem and contest scopes in chronological order, and
/// registrations seed zero-score contest entries.
pub async fn hydrate_ledger(ledger: &ScoreLedger, pool: Arc<SqlitePool>) -> sqlx::Result<()> {
    let registrations = sqlx::query_as::<_, Registration>(
        "SELECT * FROM registrations ORDER BY registered_at",
    )
    .fetch_all(pool.as_ref())
    .await?;

    for reg in &registrations {
        ledger.register(&reg.user_id, reg.contest_id, parse_timestamp(&reg.registered_at));
    }

    let passed: Vec<(String, i64, i64, i64, String)> = sqlx::query_as(
        r#"
        SELECT s.user_id, s.problem_id, p.contest_id, p.points, s.created_at
        FROM submissions s JOIN problems p ON p.id = s.problem_id
        WHERE s.status = 'Passed'
        ORDER BY s.created_at
        "#,
    )
    .fetch_all(pool.as_ref())
    .await?;

    let count = passed.len();
    for (user_id, problem_id, contest_id, points, created_at) in passed {
        let contest = (contest_id != 0).then_some(contest_id);
        ledger.credit_pass(
            &user_id,
            problem_id,
            contest,
            points,
            parse_timestamp(&created_at),
        );
    }

    log::info!(
        "Hydrated score ledger from {} registration(s) and {count} passed submission(s)",
        registrations.len()
    );
    Ok(())
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => {
            log::warn!("Unparseable timestamp `{raw}` in database: {e}");
            Utc::now()
        }
    }
}
