use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use actix_web::{App, test, web};
use assert_json_diff::assert_json_include;
use parking_lot::Mutex;
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePool;
use tokio_util::sync::CancellationToken;

use arena::config::SandboxConfig;
use arena::database as db;
use arena::judge::JudgeService;
use arena::publisher::LeaderboardPublisher;
use arena::queue::JobQueue;
use arena::routes::{
    delete_problem_handler, get_contest_handler, get_contest_leaderboard_handler,
    get_contest_registrations_handler, get_leaderboard_handler, get_problem_handler,
    get_problems_handler, get_registration_status_handler, post_contest_handler,
    post_problem_handler, post_run_handler, post_user_create_handler, post_user_exists_handler,
    put_problem_handler, register_contest_handler,
};
use arena::sandbox::{ExecutionLimits, ExecutionOutput, SandboxError, SandboxRunner};
use arena::score::ScoreLedger;
use arena::worker::worker;

// Global counter to ensure unique test database names
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

async fn create_test_db() -> (Arc<SqlitePool>, String) {
    let test_id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = std::env::temp_dir()
        .join(format!("test_arena_server_{test_id}.db"))
        .display()
        .to_string();

    // Remove existing test database if it exists
    let _ = fs::remove_file(&db_path);

    let db_pool = db::init_db(&db_path).await.unwrap();
    (Arc::new(db_pool), db_path)
}

fn cleanup_test_db(db_path: &str) {
    let _ = fs::remove_file(db_path);
    let _ = fs::remove_file(format!("{db_path}-wal"));
    let _ = fs::remove_file(format!("{db_path}-shm"));
}

struct TestDbGuard {
    db_path: String,
}

impl Drop for TestDbGuard {
    fn drop(&mut self) {
        cleanup_test_db(&self.db_path);
    }
}

fn two_sum_body() -> Value {
    json!({
        "title": "Two Sum",
        "difficulty": "easy",
        "points": 100,
        "signature_json": json!({
            "language": "python",
            "function_name": "twoSum",
            "parameters": [
                {"name": "nums", "type": "list[int]"},
                {"name": "target", "type": "int"}
            ],
            "return_type": "list[int]"
        }).to_string(),
        "test_cases_json": json!([
            {"input": {"nums": [2, 7, 11, 15], "target": 9}, "output": [0, 1]}
        ]).to_string()
    })
}

#[actix_web::test]
async fn problem_crud_round_trip() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard { db_path };

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(pool))
            .service(post_problem_handler)
            .service(put_problem_handler)
            .service(delete_problem_handler)
            .service(get_problem_handler)
            .service(get_problems_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/problem")
        .set_json(two_sum_body())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_i64().unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/problem/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let fetched: Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: &fetched,
        expected: json!({"id": id, "title": "Two Sum", "points": 100})
    );
    // Hidden runner code never leaves the server.
    assert_eq!(fetched["runner_code"], "");

    let mut updated = two_sum_body();
    updated["id"] = json!(id);
    updated["title"] = json!("Two Sum II");
    let req = test::TestRequest::put()
        .uri("/problem")
        .set_json(updated)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/problems").to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["title"], "Two Sum II");

    let req = test::TestRequest::delete()
        .uri(&format!("/problem/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/problem/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

/// Sandbox stand-in that replays scripted outputs.
struct StubSandbox {
    script: Mutex<VecDeque<ExecutionOutput>>,
}

impl SandboxRunner for StubSandbox {
    fn build(_id: u8, _config: &SandboxConfig) -> anyhow::Result<Self> {
        Ok(Self {
            script: Mutex::new(VecDeque::new()),
        })
    }

    fn execute(
        &self,
        _program: &str,
        _stdin: &str,
        _limits: &ExecutionLimits,
    ) -> Result<ExecutionOutput, SandboxError> {
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| SandboxError::Launch("script exhausted".to_string()))
    }
}

#[actix_web::test]
async fn run_endpoint_returns_a_verdict() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard { db_path };

    let ledger = Arc::new(ScoreLedger::new());
    let publisher = Arc::new(LeaderboardPublisher::new(ledger.clone()));
    let service = Arc::new(JudgeService::new(
        pool.clone(),
        ledger.clone(),
        publisher,
        ExecutionLimits {
            wall_time: Duration::from_secs(2),
            memory_kb: 131072,
        },
    ));
    let queue = Arc::new(JobQueue::new());
    let token = CancellationToken::new();

    let sandbox = Arc::new(StubSandbox {
        script: Mutex::new(VecDeque::from([ExecutionOutput {
            stdout: "[0,1]\n".to_string(),
            exit_code: Some(0),
            ..Default::default()
        }])),
    });
    tokio::spawn(worker(
        1,
        service,
        sandbox,
        queue.clone(),
        Duration::from_secs(10),
        token.clone(),
    ));

    let problem: arena::database::Problem =
        serde_json::from_value(two_sum_body()).unwrap();
    let problem_id = db::create_problem(&problem, pool.clone()).await.unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(pool))
            .app_data(web::Data::from(queue))
            .app_data(web::Data::from(ledger.clone()))
            .service(post_run_handler)
            .service(get_leaderboard_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/run")
        .set_json(json!({
            "username": "alice",
            "problem": problem_id.to_string(),
            "solution": "class Solution: ..."
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "Passed");
    assert_eq!(body["passed_count"], 1);
    assert_eq!(body["total_count"], 1);

    assert_eq!(
        ledger.score("alice", arena::score::Scope::Problem(problem_id)),
        Some(100)
    );

    // The pass also lands on the site-wide board.
    let req = test::TestRequest::get().uri("/leaderboard").to_request();
    let board: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(board.as_array().unwrap().len(), 1);
    assert_eq!(board[0]["username"], "alice");
    assert_eq!(board[0]["score"], 100);
    token.cancel();
}

#[actix_web::test]
async fn run_endpoint_rejects_bad_requests() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard { db_path };
    let queue = Arc::new(JobQueue::new());

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(pool))
            .app_data(web::Data::from(queue))
            .service(post_run_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/run")
        .set_json(json!({"username": "alice", "problem": "not-a-number", "solution": ""}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/run")
        .set_json(json!({"username": "alice", "problem": "999", "solution": ""}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn contest_registration_flow() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard { db_path };

    let ledger = Arc::new(ScoreLedger::new());
    let publisher = Arc::new(LeaderboardPublisher::new(ledger.clone()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(pool))
            .app_data(web::Data::from(ledger))
            .app_data(web::Data::from(publisher))
            .service(post_contest_handler)
            .service(register_contest_handler)
            .service(get_contest_registrations_handler)
            .service(get_registration_status_handler)
            .service(get_contest_leaderboard_handler)
            .service(get_contest_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/contest")
        .set_json(json!({
            "title": "Spring Round",
            "registration_config": json!([
                {"name": "school", "required": true}
            ]).to_string()
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_i64().unwrap();

    // Missing required field from the registration schema.
    let req = test::TestRequest::post()
        .uri("/contest/register")
        .set_json(json!({"user_id": "alice", "contest_id": id, "extra_info": {}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/contest/register")
        .set_json(json!({
            "user_id": "alice",
            "contest_id": id,
            "extra_info": {"school": "MIT"}
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    // Registering twice is a conflict.
    let req = test::TestRequest::post()
        .uri("/contest/register")
        .set_json(json!({
            "user_id": "alice",
            "contest_id": id,
            "extra_info": {"school": "MIT"}
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], 4);

    let req = test::TestRequest::get()
        .uri(&format!("/contest/{id}/registrations"))
        .to_request();
    let registrations: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(registrations.as_array().unwrap().len(), 1);
    assert_eq!(registrations[0]["user_id"], "alice");

    let req = test::TestRequest::get()
        .uri(&format!("/contest/status?user_id=alice&contest_id={id}"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["registered"], true);

    let req = test::TestRequest::get()
        .uri(&format!("/contest/status?user_id=bob&contest_id={id}"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["registered"], false);

    // A registered user appears on the board at zero before any solve.
    let req = test::TestRequest::get()
        .uri(&format!("/contest/{id}/leaderboard"))
        .to_request();
    let board: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(board.as_array().unwrap().len(), 1);
    assert_eq!(board[0]["username"], "alice");
    assert_eq!(board[0]["score"], 0);

    let req = test::TestRequest::get()
        .uri(&format!("/contest/{id}"))
        .to_request();
    let detail: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(detail["title"], "Spring Round");
    assert_eq!(detail["participant_count"], 1);
}

#[actix_web::test]
async fn user_creation_and_verification() {
    let (pool, db_path) = create_test_db().await;
    let _guard = TestDbGuard { db_path };

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(pool))
            .service(post_user_create_handler)
            .service(post_user_exists_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/user/create")
        .set_json(json!({"username": "alice", "password": "hunter2"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let req = test::TestRequest::post()
        .uri("/user/create")
        .set_json(json!({"username": "alice", "password": "other"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    let req = test::TestRequest::post()
        .uri("/user/exists")
        .set_json(json!({"username": "alice", "password": "hunter2"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["exists"], true);

    let req = test::TestRequest::post()
        .uri("/user/exists")
        .set_json(json!({"username": "alice", "password": "wrong"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["exists"], false);
}
