use std::time::Instant;

use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use tokio::sync::oneshot;

use super::{ErrorResponse, judge_error_response};
use crate::database as db;
use crate::judge::Verdict;
use crate::queue::{JobQueue, JudgeRequest};

#[derive(Deserialize, Debug)]
pub struct RunRequest {
    pub username: String,
    /// Problem id, as a string for front-end compatibility.
    pub problem: String,
    pub solution: String,
}

#[derive(Serialize, Debug)]
pub struct RunResponse {
    pub username: String,
    pub status: String,
    pub output: String,
    pub expected_output: String,
    pub test_case_input: String,
    pub failed_index: Option<u32>,
    pub passed_count: u32,
    pub total_count: u32,
}

impl RunResponse {
    fn new(username: String, verdict: Verdict) -> Self {
        Self {
            username,
            status: verdict.status.as_str().to_string(),
            output: verdict.output,
            expected_output: verdict.expected_output,
            test_case_input: verdict.test_case_input,
            failed_index: verdict.failed_index,
            passed_count: verdict.passed_count,
            total_count: verdict.total_count,
        }
    }
}

#[post("/run")]
pub async fn post_run_handler(
    pool: web::Data<SqlitePool>,
    queue: web::Data<JobQueue>,
    body: web::Json<RunRequest>,
) -> impl Responder {
    let Ok(problem_id) = body.problem.parse::<i64>() else {
        return HttpResponse::BadRequest().json(ErrorResponse {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
        });
    };

    // Reject unknown problems before spending a submission row or a queue
    // slot on them.
    match db::fetch_problem(problem_id, pool.clone().into_inner()).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse {
                reason: "ERR_NOT_FOUND",
                code: 3,
            });
        }
        Err(e) => {
            log::error!("Failed to look up problem {problem_id}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    }

    let submission_id =
        match db::create_submission(&body.username, problem_id, pool.into_inner()).await {
            Ok(id) => id,
            Err(e) => {
                log::error!("Failed to insert submission into database: {e}");
                return HttpResponse::InternalServerError().json(ErrorResponse {
                    reason: "ERR_EXTERNAL",
                    code: 5,
                });
            }
        };

    let (tx, rx) = oneshot::channel();
    let body = body.into_inner();
    queue
        .push(JudgeRequest {
            submission_id,
            username: body.username.clone(),
            problem_id,
            source: body.solution,
            enqueued_at: Instant::now(),
            responder: tx,
        })
        .await;
    log::debug!(
        "Queued submission {submission_id} for judging ({} waiting)",
        queue.len().await
    );

    match rx.await {
        Ok(Ok(verdict)) => HttpResponse::Accepted().json(RunResponse::new(body.username, verdict)),
        Ok(Err(e)) => {
            log::error!("Judging submission {submission_id} failed: {e}");
            judge_error_response(&e)
        }
        Err(e) => {
            log::error!("Failed to receive verdict for submission {submission_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}
