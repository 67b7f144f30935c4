use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::{HttpResponse, Responder, delete, get, post, put, web};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use tokio::sync::mpsc;

use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::database::{self as db, Contest, Problem};
use crate::publisher::{LeaderboardPublisher, LeaderboardSnapshot};
use crate::score::{RankEntry, Scope, ScoreLedger};

#[derive(Serialize)]
struct CreatedResponse {
    id: i64,
}

#[post("/contest")]
pub async fn post_contest_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<Contest>,
) -> impl Responder {
    if let Err(message) = validate_registration_config(&body.registration_config) {
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message,
        });
    }

    match db::create_contest(&body, pool.into_inner()).await {
        Ok(id) => HttpResponse::Created().json(CreatedResponse { id }),
        Err(e) => {
            log::error!("Failed to create contest: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[put("/contest")]
pub async fn put_contest_handler(
    pool: web::Data<SqlitePool>,
    body: web::Json<Contest>,
) -> impl Responder {
    if let Err(message) = validate_registration_config(&body.registration_config) {
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message,
        });
    }

    match db::update_contest(&body, pool.into_inner()).await {
        Ok(true) => HttpResponse::Ok().json(CreatedResponse { id: body.id }),
        Ok(false) => contest_not_found(body.id),
        Err(e) => {
            log::error!("Failed to update contest {}: {e}", body.id);
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[delete("/contest/{id}")]
pub async fn delete_contest_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> impl Responder {
    let id = path.into_inner();
    match db::delete_contest(id, pool.into_inner()).await {
        Ok(true) => HttpResponse::Ok().finish(),
        Ok(false) => contest_not_found(id),
        Err(e) => {
            log::error!("Failed to delete contest {id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

/// Contest detail view: the contest row plus its problems (runner code
/// withheld) and a participant count.
#[derive(Serialize)]
struct ContestDetail {
    #[serde(flatten)]
    contest: Contest,
    problems: Vec<Problem>,
    participant_count: i64,
}

#[get("/contest/{id}")]
pub async fn get_contest_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> impl Responder {
    let id = path.into_inner();
    let pool = pool.into_inner();

    let contest = match db::fetch_contest(id, pool.clone()).await {
        Ok(Some(contest)) => contest,
        Ok(None) => return contest_not_found(id),
        Err(e) => {
            log::error!("Failed to fetch contest {id}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let problems = db::list_contest_problems(id, pool.clone()).await;
    let participant_count = db::count_registrations(id, pool).await;
    match (problems, participant_count) {
        (Ok(mut problems), Ok(participant_count)) => {
            for problem in &mut problems {
                problem.runner_code = String::new();
            }
            HttpResponse::Ok().json(ContestDetail {
                contest,
                problems,
                participant_count,
            })
        }
        (Err(e), _) | (_, Err(e)) => {
            log::error!("Failed to assemble contest {id} detail: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[get("/contests")]
pub async fn get_contests_handler(pool: web::Data<SqlitePool>) -> impl Responder {
    match db::list_contests(pool.into_inner()).await {
        Ok(contests) => HttpResponse::Ok().json(contests),
        Err(e) => {
            log::error!("Failed to list contests: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

// ===== registration =====

#[derive(Deserialize, Debug)]
pub struct RegisterRequest {
    pub user_id: String,
    pub contest_id: i64,
    #[serde(default)]
    pub extra_info: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct SchemaField {
    name: String,
    #[serde(default)]
    required: bool,
}

fn parse_registration_config(raw: &str) -> Result<Vec<SchemaField>, String> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| format!("invalid registration_config: {e}"))
}

fn validate_registration_config(raw: &str) -> Result<(), String> {
    parse_registration_config(raw).map(|_| ())
}

/// Checks a registration's extra fields against the contest's declared
/// schema. Required fields must be present and non-empty; fields the schema
/// does not declare are rejected.
fn validate_extra_info(
    schema: &[SchemaField],
    extra_info: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), String> {
    for field in schema {
        if !field.required {
            continue;
        }
        let empty = match extra_info.get(&field.name) {
            None | Some(serde_json::Value::Null) => true,
            Some(serde_json::Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if empty {
            return Err(format!("missing required registration field `{}`", field.name));
        }
    }

    for key in extra_info.keys() {
        if !schema.iter().any(|field| &field.name == key) {
            return Err(format!("unknown registration field `{key}`"));
        }
    }
    Ok(())
}

#[post("/contest/register")]
pub async fn register_contest_handler(
    pool: web::Data<SqlitePool>,
    ledger: web::Data<ScoreLedger>,
    publisher: web::Data<LeaderboardPublisher>,
    body: web::Json<RegisterRequest>,
) -> impl Responder {
    let contest_id = body.contest_id;
    let pool = pool.into_inner();

    let contest = match db::fetch_contest(contest_id, pool.clone()).await {
        Ok(Some(contest)) => contest,
        Ok(None) => return contest_not_found(contest_id),
        Err(e) => {
            log::error!("Failed to fetch contest {contest_id}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let schema = match parse_registration_config(&contest.registration_config) {
        Ok(schema) => schema,
        Err(e) => {
            log::error!("Contest {contest_id} carries an unparseable registration schema: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            });
        }
    };
    if let Err(message) = validate_extra_info(&schema, &body.extra_info) {
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message,
        });
    }

    let extra_info = serde_json::Value::Object(body.extra_info.clone()).to_string();
    match db::create_registration(&body.user_id, contest_id, &extra_info, pool).await {
        Ok(id) => {
            // Seed the board so the new participant shows up at zero.
            ledger.register(&body.user_id, contest_id, chrono::Utc::now());
            publisher.publish(Scope::Contest(contest_id));
            HttpResponse::Created().json(CreatedResponse { id })
        }
        Err(e) if is_unique_violation(&e) => HttpResponse::Conflict().json(ErrorResponse {
            reason: "ERR_ALREADY_REGISTERED",
            code: 4,
        }),
        Err(e) => {
            log::error!("Failed to register {} for contest {contest_id}: {e}", body.user_id);
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

#[get("/contest/{id}/registrations")]
pub async fn get_contest_registrations_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> impl Responder {
    let contest_id = path.into_inner();
    match db::list_registrations(contest_id, pool.into_inner()).await {
        Ok(registrations) => HttpResponse::Ok().json(registrations),
        Err(e) => {
            log::error!("Failed to list registrations for contest {contest_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[derive(Deserialize)]
pub struct StatusQuery {
    user_id: String,
    contest_id: i64,
}

#[derive(Serialize)]
struct StatusResponse {
    registered: bool,
}

#[get("/contest/status")]
pub async fn get_registration_status_handler(
    pool: web::Data<SqlitePool>,
    query: web::Query<StatusQuery>,
) -> impl Responder {
    match db::is_registered(&query.user_id, query.contest_id, pool.into_inner()).await {
        Ok(registered) => HttpResponse::Ok().json(StatusResponse { registered }),
        Err(e) => {
            log::error!(
                "Failed to check registration for contest {}: {e}",
                query.contest_id
            );
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

// ===== leaderboards =====

#[get("/contest/{id}/leaderboard")]
pub async fn get_contest_leaderboard_handler(
    pool: web::Data<SqlitePool>,
    ledger: web::Data<ScoreLedger>,
    path: web::Path<i64>,
) -> impl Responder {
    let contest_id = path.into_inner();
    match db::fetch_contest(contest_id, pool.into_inner()).await {
        Ok(Some(_)) => HttpResponse::Ok().json(ledger.rank(Scope::Contest(contest_id))),
        Ok(None) => contest_not_found(contest_id),
        Err(e) => {
            log::error!("Failed to fetch contest {contest_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

/// Site-wide ranking: every user's accumulated points across all problems.
#[get("/leaderboard")]
pub async fn get_leaderboard_handler(ledger: web::Data<ScoreLedger>) -> impl Responder {
    HttpResponse::Ok().json(ledger.rank(Scope::Global))
}

/// Event stream of leaderboard snapshots. Every frame carries the full board,
/// so a client can render each event without tracking deltas; the first frame
/// is the board as of subscription.
struct SnapshotStream {
    pending: VecDeque<Vec<RankEntry>>,
    rx: mpsc::UnboundedReceiver<LeaderboardSnapshot>,
}

impl Stream for SnapshotStream {
    type Item = Result<web::Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let snapshot = match self.pending.pop_front() {
            Some(snapshot) => snapshot,
            None => match self.rx.poll_recv(cx) {
                Poll::Ready(Some(snapshot)) => snapshot,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            },
        };

        let frame = match serde_json::to_string(&snapshot) {
            Ok(json) => format!("data: {json}\n\n"),
            Err(e) => return Poll::Ready(Some(Err(actix_web::error::ErrorInternalServerError(e)))),
        };
        Poll::Ready(Some(Ok(web::Bytes::from(frame))))
    }
}

#[get("/contest/{id}/leaderboard/stream")]
pub async fn leaderboard_stream_handler(
    pool: web::Data<SqlitePool>,
    publisher: web::Data<LeaderboardPublisher>,
    path: web::Path<i64>,
) -> impl Responder {
    let contest_id = path.into_inner();
    match db::fetch_contest(contest_id, pool.into_inner()).await {
        Ok(Some(_)) => {}
        Ok(None) => return contest_not_found(contest_id),
        Err(e) => {
            log::error!("Failed to fetch contest {contest_id}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    }

    // Subscription and the initial snapshot are taken atomically, so the
    // first frame is never newer than any later one.
    let (initial, rx) = publisher.subscribe_with_snapshot(Scope::Contest(contest_id));
    let pending = VecDeque::from([initial]);

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(SnapshotStream { pending, rx })
}

fn contest_not_found(id: i64) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponseWithMessage {
        reason: "ERR_NOT_FOUND",
        code: 3,
        message: format!("Contest {id} not found."),
    })
}
