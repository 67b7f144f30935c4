pub mod binder;
pub mod runner;
pub mod value;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::database::{self as db, Problem};
use crate::publisher::LeaderboardPublisher;
use crate::sandbox::{ExecutionLimits, SandboxRunner};
use crate::score::{Scope, ScoreLedger};

use binder::{BoundCase, BoundSignature, FunctionSignature, TestCase};
use value::CoercionError;

/// Service-level failure taxonomy. A wrong submission is never an error;
/// these cover malformed problem definitions, operational faults, and
/// capacity limits.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("problem not found")]
    NotFound,
    #[error("judge queue overloaded")]
    Overloaded,
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),
    #[error("type coercion failed: {0}")]
    TypeCoercion(#[from] CoercionError),
    #[error("malformed problem definition: {0}")]
    BadProblem(String),
    #[error("sandbox launch failure: {0}")]
    Launch(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictStatus {
    Passed,
    Failed,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::Failed => "Failed",
        }
    }
}

/// Outcome of running a submission against a problem's test cases.
///
/// `failed_index` is 0-based; on failure `passed_count == failed_index`
/// because every test before the failing one passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub output: String,
    pub expected_output: String,
    pub test_case_input: String,
    pub failed_index: Option<u32>,
    pub passed_count: u32,
    pub total_count: u32,
}

impl Verdict {
    pub fn passed(total_count: u32) -> Self {
        Self {
            status: VerdictStatus::Passed,
            output: String::new(),
            expected_output: String::new(),
            test_case_input: String::new(),
            failed_index: None,
            passed_count: total_count,
            total_count,
        }
    }
}

/// A problem's test definition, validated and ready to execute.
///
/// Building the plan binds every test case up-front, so a malformed problem
/// fails the judge call regardless of where the submission would have failed.
#[derive(Debug, Clone)]
pub enum TestPlan {
    Signature {
        signature: BoundSignature,
        cases: Vec<BoundCase>,
    },
    Legacy {
        input: String,
        expected: String,
        runner_code: String,
    },
}

impl TestPlan {
    pub fn from_problem(problem: &Problem) -> Result<Self, JudgeError> {
        let has_signature = !problem.signature_json.trim().is_empty()
            || !problem.test_cases_json.trim().is_empty();
        let has_legacy = !problem.input.trim().is_empty()
            || !problem.output.trim().is_empty()
            || !problem.runner_code.trim().is_empty();

        match (has_signature, has_legacy) {
            (true, true) => Err(JudgeError::BadProblem(
                "both signature and legacy test definitions are populated".to_string(),
            )),
            (false, false) => Err(JudgeError::BadProblem(
                "problem has no test definition".to_string(),
            )),
            (true, false) => Self::from_signature(problem),
            (false, true) => Ok(Self::Legacy {
                input: problem.input.clone(),
                expected: problem.output.clone(),
                runner_code: problem.runner_code.clone(),
            }),
        }
    }

    fn from_signature(problem: &Problem) -> Result<Self, JudgeError> {
        let signature: FunctionSignature = serde_json::from_str(&problem.signature_json)
            .map_err(|e| JudgeError::BadProblem(format!("invalid signature_json: {e}")))?;
        let raw_cases: Vec<TestCase> = serde_json::from_str(&problem.test_cases_json)
            .map_err(|e| JudgeError::BadProblem(format!("invalid test_cases_json: {e}")))?;
        if raw_cases.is_empty() {
            return Err(JudgeError::BadProblem("empty test case set".to_string()));
        }

        let signature = BoundSignature::compile(&signature)?;
        let cases = raw_cases
            .iter()
            .map(|case| signature.bind(case))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::Signature { signature, cases })
    }

    pub fn total_cases(&self) -> u32 {
        match self {
            Self::Signature { cases, .. } => cases.len() as u32,
            Self::Legacy { .. } => 1,
        }
    }
}

/// Orchestrates one submission end-to-end: problem resolution, test
/// execution, submission persistence, scoring, and leaderboard publication.
pub struct JudgeService {
    pool: Arc<SqlitePool>,
    ledger: Arc<ScoreLedger>,
    publisher: Arc<LeaderboardPublisher>,
    limits: ExecutionLimits,
}

impl JudgeService {
    pub fn new(
        pool: Arc<SqlitePool>,
        ledger: Arc<ScoreLedger>,
        publisher: Arc<LeaderboardPublisher>,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            pool,
            ledger,
            publisher,
            limits,
        }
    }

    /// Judges one submission. The Pending submission row identified by
    /// `submission_id` is finalized exactly once: with the verdict, or with
    /// an Error status when the problem is malformed or the sandbox cannot
    /// launch. Only a clean Passed verdict touches the ledger and publisher.
    pub async fn judge(
        &self,
        sandbox: Arc<dyn SandboxRunner>,
        submission_id: i64,
        username: &str,
        problem_id: i64,
        source: &str,
    ) -> Result<Verdict, JudgeError> {
        let outcome = self.run_submission(sandbox, problem_id, source).await;

        match outcome {
            Ok((problem, verdict)) => {
                db::finalize_submission(
                    submission_id,
                    verdict.status.as_str(),
                    &verdict.output,
                    verdict.failed_index.map(i64::from),
                    i64::from(verdict.passed_count),
                    i64::from(verdict.total_count),
                    self.pool.clone(),
                )
                .await?;

                if verdict.status == VerdictStatus::Passed {
                    self.credit(username, &problem);
                }

                Ok(verdict)
            }
            Err(e) => {
                if let Err(db_err) = db::finalize_submission(
                    submission_id,
                    "Error",
                    &e.to_string(),
                    None,
                    0,
                    0,
                    self.pool.clone(),
                )
                .await
                {
                    log::error!("Failed to finalize submission {submission_id}: {db_err}");
                }
                Err(e)
            }
        }
    }

    /// Finalizes a submission that never ran because it waited in the queue
    /// past the overload bound.
    pub async fn reject_overloaded(&self, submission_id: i64) {
        if let Err(e) = db::finalize_submission(
            submission_id,
            "Error",
            &JudgeError::Overloaded.to_string(),
            None,
            0,
            0,
            self.pool.clone(),
        )
        .await
        {
            log::error!("Failed to finalize overloaded submission {submission_id}: {e}");
        }
    }

    async fn run_submission(
        &self,
        sandbox: Arc<dyn SandboxRunner>,
        problem_id: i64,
        source: &str,
    ) -> Result<(Problem, Verdict), JudgeError> {
        let problem = db::fetch_problem(problem_id, self.pool.clone())
            .await?
            .ok_or(JudgeError::NotFound)?;
        let plan = TestPlan::from_problem(&problem)?;

        let limits = self.limits;
        let source = source.to_string();
        let verdict = tokio::task::spawn_blocking(move || {
            runner::run_plan(sandbox.as_ref(), &plan, &source, &limits)
        })
        .await
        .map_err(|e| JudgeError::Launch(format!("judge task failed: {e}")))??;

        Ok((problem, verdict))
    }

    fn credit(&self, username: &str, problem: &Problem) {
        let contest = (problem.contest_id != 0).then_some(problem.contest_id);
        let improved =
            self.ledger
                .credit_pass(username, problem.id, contest, problem.points, Utc::now());

        if improved {
            self.publisher.publish(Scope::Problem(problem.id));
            if let Some(contest_id) = contest {
                self.publisher.publish(Scope::Contest(contest_id));
            }
            self.publisher.publish(Scope::Global);
            log::info!(
                "User {username} scored {} point(s) on problem {}",
                problem.points,
                problem.id
            );
        }
    }
}
