use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::ErrorResponse;
use crate::database::{self as db, User};

#[post("/user/create")]
pub async fn post_user_create_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<User>,
) -> impl Responder {
    match db::create_user(&body, pool.into_inner()).await {
        Ok(()) => HttpResponse::Created().finish(),
        Err(e)
            if e.as_database_error()
                .is_some_and(|db_err| db_err.is_unique_violation()) =>
        {
            HttpResponse::Conflict().json(ErrorResponse {
                reason: "ERR_ALREADY_REGISTERED",
                code: 4,
            })
        }
        Err(e) => {
            log::error!("Failed to create user {}: {e}", body.username);
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct ExistsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct ExistsResponse {
    exists: bool,
}

#[post("/user/exists")]
pub async fn post_user_exists_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<ExistsRequest>,
) -> impl Responder {
    match db::verify_user(&body.username, &body.password, pool.into_inner()).await {
        Ok(exists) => HttpResponse::Ok().json(ExistsResponse { exists }),
        Err(e) => {
            log::error!("Failed to verify user {}: {e}", body.username);
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}
