use actix_web::{HttpResponse, Responder, delete, get, post, put, web};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::database::{self as db, Problem};
use crate::score::{Scope, ScoreLedger};

#[derive(Serialize)]
struct CreatedResponse {
    id: i64,
}

#[post("/problem")]
pub async fn post_problem_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<Problem>,
) -> impl Responder {
    match db::create_problem(&body, pool.into_inner()).await {
        Ok(id) => HttpResponse::Created().json(CreatedResponse { id }),
        Err(e) => {
            log::error!("Failed to create problem: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[put("/problem")]
pub async fn put_problem_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<Problem>,
) -> impl Responder {
    match db::update_problem(&body, pool.into_inner()).await {
        Ok(true) => HttpResponse::Ok().json(CreatedResponse { id: body.id }),
        Ok(false) => HttpResponse::NotFound().json(ErrorResponseWithMessage {
            reason: "ERR_NOT_FOUND",
            code: 3,
            message: format!("Problem {} not found.", body.id),
        }),
        Err(e) => {
            log::error!("Failed to update problem {}: {e}", body.id);
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[delete("/problem/{id}")]
pub async fn delete_problem_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> impl Responder {
    let id = path.into_inner();
    match db::delete_problem(id, pool.into_inner()).await {
        Ok(true) => HttpResponse::Ok().finish(),
        Ok(false) => HttpResponse::NotFound().json(ErrorResponseWithMessage {
            reason: "ERR_NOT_FOUND",
            code: 3,
            message: format!("Problem {id} not found."),
        }),
        Err(e) => {
            log::error!("Failed to delete problem {id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[get("/problem/{id}")]
pub async fn get_problem_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> impl Responder {
    let id = path.into_inner();
    match db::fetch_problem(id, pool.into_inner()).await {
        Ok(Some(mut problem)) => {
            // The runner snippet feeds hidden inputs; never expose it.
            problem.runner_code = String::new();
            HttpResponse::Ok().json(problem)
        }
        Ok(None) => HttpResponse::NotFound().json(ErrorResponseWithMessage {
            reason: "ERR_NOT_FOUND",
            code: 3,
            message: format!("Problem {id} not found."),
        }),
        Err(e) => {
            log::error!("Failed to fetch problem {id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[get("/problems")]
pub async fn get_problems_handler(pool: web::Data<SqlitePool>) -> impl Responder {
    list_response(db::list_problems(pool.into_inner()).await)
}

#[get("/problems/practice")]
pub async fn get_practice_problems_handler(pool: web::Data<SqlitePool>) -> impl Responder {
    list_response(db::list_practice_problems(pool.into_inner()).await)
}

fn list_response(result: sqlx::Result<Vec<Problem>>) -> HttpResponse {
    match result {
        Ok(mut problems) => {
            for problem in &mut problems {
                problem.runner_code = String::new();
            }
            HttpResponse::Ok().json(problems)
        }
        Err(e) => {
            log::error!("Failed to list problems: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

/// Point-in-time leaderboard. A contest problem reports its contest's board,
/// a practice problem its own.
#[get("/problem/{id}/leaderboard")]
pub async fn get_problem_leaderboard_handler(
    pool: web::Data<SqlitePool>,
    ledger: web::Data<ScoreLedger>,
    path: web::Path<i64>,
) -> impl Responder {
    let id = path.into_inner();
    let problem = match db::fetch_problem(id, pool.into_inner()).await {
        Ok(Some(problem)) => problem,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponseWithMessage {
                reason: "ERR_NOT_FOUND",
                code: 3,
                message: format!("Problem {id} not found."),
            });
        }
        Err(e) => {
            log::error!("Failed to fetch problem {id}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let scope = if problem.contest_id != 0 {
        Scope::Contest(problem.contest_id)
    } else {
        Scope::Problem(problem.id)
    };
    HttpResponse::Ok().json(ledger.rank(scope))
}
