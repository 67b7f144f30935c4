mod contests;
mod problems;
mod run;
mod users;

pub use contests::{
    delete_contest_handler, get_contest_handler, get_contest_leaderboard_handler,
    get_contest_registrations_handler, get_contests_handler, get_leaderboard_handler,
    get_registration_status_handler, leaderboard_stream_handler, post_contest_handler,
    put_contest_handler, register_contest_handler,
};
pub use problems::{
    delete_problem_handler, get_practice_problems_handler, get_problem_handler,
    get_problem_leaderboard_handler, get_problems_handler, post_problem_handler,
    put_problem_handler,
};
pub use run::post_run_handler;
pub use users::{post_user_create_handler, post_user_exists_handler};

use actix_web::error::{InternalError, JsonPayloadError, QueryPayloadError};
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

use crate::judge::JudgeError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub reason: &'static str,
    pub code: u32,
}

#[derive(Serialize)]
pub struct ErrorResponseWithMessage {
    pub reason: &'static str,
    pub code: u32,
    pub message: String,
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

/// Maps the judge's error taxonomy onto the wire: malformed problems and
/// operational faults are service errors, never verdicts.
pub fn judge_error_response(err: &JudgeError) -> HttpResponse {
    match err {
        JudgeError::NotFound => HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_NOT_FOUND",
            code: 3,
        }),
        JudgeError::Overloaded => HttpResponse::ServiceUnavailable().json(ErrorResponse {
            reason: "ERR_OVERLOADED",
            code: 8,
        }),
        JudgeError::SignatureMismatch(_)
        | JudgeError::TypeCoercion(_)
        | JudgeError::BadProblem(_) => {
            HttpResponse::InternalServerError().json(ErrorResponseWithMessage {
                reason: "ERR_BAD_PROBLEM",
                code: 7,
                message: err.to_string(),
            })
        }
        JudgeError::Launch(_) | JudgeError::Database(_) => {
            HttpResponse::InternalServerError().json(ErrorResponseWithMessage {
                reason: "ERR_EXTERNAL",
                code: 5,
                message: err.to_string(),
            })
        }
    }
}
