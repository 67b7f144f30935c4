use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use arena::config::SandboxConfig;
use arena::database::{self as db, Problem};
use arena::judge::{JudgeError, JudgeService, VerdictStatus};
use arena::publisher::LeaderboardPublisher;
use arena::queue::{JobQueue, JudgeRequest};
use arena::sandbox::{ExecutionLimits, ExecutionOutput, SandboxError, SandboxRunner};
use arena::score::{Scope, ScoreLedger};
use arena::worker::worker;

// Global counter to ensure unique test database names
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

async fn create_test_db() -> (Arc<SqlitePool>, String) {
    let test_id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = std::env::temp_dir()
        .join(format!("test_arena_flow_{test_id}.db"))
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

/// Sandbox stand-in: replays scripted outputs, then keeps returning the
/// fallback output (if any) once the script runs out.
struct StubSandbox {
    script: Mutex<VecDeque<ExecutionOutput>>,
    fallback: Option<ExecutionOutput>,
}

impl StubSandbox {
    fn scripted(outputs: Vec<ExecutionOutput>) -> Self {
        Self {
            script: Mutex::new(outputs.into()),
            fallback: None,
        }
    }

    fn always(output: ExecutionOutput) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(output),
        }
    }
}

impl SandboxRunner for StubSandbox {
    fn build(_id: u8, _config: &SandboxConfig) -> anyhow::Result<Self> {
        Ok(Self::scripted(Vec::new()))
    }

    fn execute(
        &self,
        _program: &str,
        _stdin: &str,
        _limits: &ExecutionLimits,
    ) -> Result<ExecutionOutput, SandboxError> {
        if let Some(output) = self.script.lock().pop_front() {
            return Ok(output);
        }
        self.fallback
            .clone()
            .ok_or_else(|| SandboxError::Launch("script exhausted".to_string()))
    }
}

fn ok_output(stdout: &str) -> ExecutionOutput {
    ExecutionOutput {
        stdout: stdout.to_string(),
        exit_code: Some(0),
        ..Default::default()
    }
}

fn two_sum_problem(contest_id: i64, points: i64) -> Problem {
    Problem {
        id: 0,
        contest_id,
        title: "Two Sum".to_string(),
        description: String::new(),
        difficulty: "easy".to_string(),
        points,
        template: String::new(),
        input: String::new(),
        output: String::new(),
        runner_code: String::new(),
        signature_json: json!({
            "language": "python",
            "class_name": "Solution",
            "function_name": "twoSum",
            "parameters": [
                {"name": "nums", "type": "list[int]"},
                {"name": "target", "type": "int"}
            ],
            "return_type": "list[int]"
        })
        .to_string(),
        test_cases_json: json!([
            {"input": {"nums": [2, 7, 11, 15], "target": 9}, "output": [0, 1]},
            {"input": {"nums": [3, 3], "target": 6}, "output": [0, 1]}
        ])
        .to_string(),
    }
}

struct Harness {
    pool: Arc<SqlitePool>,
    ledger: Arc<ScoreLedger>,
    publisher: Arc<LeaderboardPublisher>,
    queue: Arc<JobQueue>,
    token: CancellationToken,
    _guard: TestDbGuard,
}

impl Harness {
    /// Spins up the full judge pipeline with one worker over a stub sandbox.
    async fn start(sandbox: StubSandbox, max_queue_wait: Duration) -> Self {
        let (pool, db_path) = create_test_db().await;
        let ledger = Arc::new(ScoreLedger::new());
        let publisher = Arc::new(LeaderboardPublisher::new(ledger.clone()));
        let service = Arc::new(JudgeService::new(
            pool.clone(),
            ledger.clone(),
            publisher.clone(),
            ExecutionLimits {
                wall_time: Duration::from_secs(2),
                memory_kb: 131072,
            },
        ));
        let queue = Arc::new(JobQueue::new());
        let token = CancellationToken::new();

        tokio::spawn(worker(
            1,
            service,
            Arc::new(sandbox),
            queue.clone(),
            max_queue_wait,
            token.clone(),
        ));

        Self {
            pool,
            ledger,
            publisher,
            queue,
            token,
            _guard: TestDbGuard { db_path },
        }
    }

    async fn submit(
        &self,
        username: &str,
        problem_id: i64,
        enqueued_at: Instant,
    ) -> (i64, oneshot::Receiver<Result<arena::judge::Verdict, JudgeError>>) {
        let submission_id = db::create_submission(username, problem_id, self.pool.clone())
            .await
            .unwrap();
        let (tx, rx) = oneshot::channel();
        self.queue
            .push(JudgeRequest {
                submission_id,
                username: username.to_string(),
                problem_id,
                source: "class Solution: ...".to_string(),
                enqueued_at,
                responder: tx,
            })
            .await;
        (submission_id, rx)
    }

    async fn submission_status(&self, submission_id: i64) -> String {
        let row: (String,) = sqlx::query_as("SELECT status FROM submissions WHERE id = ?")
            .bind(submission_id)
            .fetch_one(self.pool.as_ref())
            .await
            .unwrap();
        row.0
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[tokio::test]
async fn passing_submission_scores_and_publishes() {
    let sandbox = StubSandbox::scripted(vec![ok_output("[0,1]\n"), ok_output("[0,1]\n")]);
    let harness = Harness::start(sandbox, Duration::from_secs(10)).await;

    let problem_id = db::create_problem(&two_sum_problem(7, 100), harness.pool.clone())
        .await
        .unwrap();
    let mut board_rx = harness.publisher.subscribe(Scope::Contest(7));

    let (submission_id, rx) = harness.submit("alice", problem_id, Instant::now()).await;
    let verdict = rx.await.unwrap().unwrap();

    assert_eq!(verdict.status, VerdictStatus::Passed);
    assert_eq!(verdict.passed_count, 2);
    assert_eq!(harness.submission_status(submission_id).await, "Passed");

    assert_eq!(
        harness.ledger.score("alice", Scope::Problem(problem_id)),
        Some(100)
    );
    assert_eq!(harness.ledger.score("alice", Scope::Contest(7)), Some(100));
    assert_eq!(harness.ledger.score("alice", Scope::Global), Some(100));

    let snapshot = board_rx.recv().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].username, "alice");
    assert_eq!(snapshot[0].score, 100);
}

#[tokio::test]
async fn failing_submission_does_not_score() {
    let sandbox = StubSandbox::scripted(vec![ok_output("[1,0]\n")]);
    let harness = Harness::start(sandbox, Duration::from_secs(10)).await;

    let problem_id = db::create_problem(&two_sum_problem(0, 100), harness.pool.clone())
        .await
        .unwrap();

    let (submission_id, rx) = harness.submit("bob", problem_id, Instant::now()).await;
    let verdict = rx.await.unwrap().unwrap();

    assert_eq!(verdict.status, VerdictStatus::Failed);
    assert_eq!(verdict.failed_index, Some(0));
    assert_eq!(harness.submission_status(submission_id).await, "Failed");
    assert_eq!(harness.ledger.score("bob", Scope::Problem(problem_id)), None);
}

#[tokio::test]
async fn malformed_problem_is_a_service_error() {
    let sandbox = StubSandbox::scripted(vec![]);
    let harness = Harness::start(sandbox, Duration::from_secs(10)).await;

    // Both test definition modes populated at once.
    let mut problem = two_sum_problem(0, 100);
    problem.input = "1 2\n".to_string();
    let problem_id = db::create_problem(&problem, harness.pool.clone())
        .await
        .unwrap();

    let (submission_id, rx) = harness.submit("carol", problem_id, Instant::now()).await;
    let err = rx.await.unwrap().unwrap_err();

    assert!(matches!(err, JudgeError::BadProblem(_)));
    assert_eq!(harness.submission_status(submission_id).await, "Error");
}

#[tokio::test]
async fn stale_queued_request_is_rejected_as_overloaded() {
    let sandbox = StubSandbox::always(ok_output("[0,1]\n"));
    let harness = Harness::start(sandbox, Duration::from_millis(50)).await;

    let problem_id = db::create_problem(&two_sum_problem(0, 100), harness.pool.clone())
        .await
        .unwrap();

    let stale = Instant::now() - Duration::from_secs(60);
    let (submission_id, rx) = harness.submit("dave", problem_id, stale).await;
    let err = rx.await.unwrap().unwrap_err();

    assert!(matches!(err, JudgeError::Overloaded));
    assert_eq!(harness.submission_status(submission_id).await, "Error");
    assert_eq!(harness.ledger.score("dave", Scope::Problem(problem_id)), None);
}

#[tokio::test]
async fn concurrent_submissions_lose_no_scores() {
    let sandbox = StubSandbox::always(ok_output("[0,1]\n"));
    let harness = Harness::start(sandbox, Duration::from_secs(10)).await;

    let problem_id = db::create_problem(&two_sum_problem(7, 100), harness.pool.clone())
        .await
        .unwrap();

    let mut receivers = Vec::new();
    for i in 0..8 {
        let user = format!("user{i}");
        let (_, rx) = harness.submit(&user, problem_id, Instant::now()).await;
        receivers.push(rx);
    }
    for rx in receivers {
        let verdict = rx.await.unwrap().unwrap();
        assert_eq!(verdict.status, VerdictStatus::Passed);
    }

    let board = harness.ledger.rank(Scope::Contest(7));
    assert_eq!(board.len(), 8);
    assert!(board.iter().all(|entry| entry.score == 100));
}
