use serde_json as json;

use crate::sandbox::{ExecutionLimits, ExecutionOutput, SandboxError, SandboxRunner};

use super::value::Value;
use super::{JudgeError, TestPlan, Verdict, VerdictStatus};

/// Runs a validated test plan against one submission, fail-fast.
///
/// Test cases execute in fixed order and the first mismatch stops the run;
/// no sandbox launches happen past the failing index. Timeouts, memory
/// kills, non-zero exits, and undecodable output are all Failed verdicts at
/// the index they occur, never service errors.
pub fn run_plan(
    sandbox: &dyn SandboxRunner,
    plan: &TestPlan,
    source: &str,
    limits: &ExecutionLimits,
) -> Result<Verdict, JudgeError> {
    match plan {
        TestPlan::Signature { signature, cases } => {
            let program = signature.harness_program(source);
            let total = cases.len() as u32;

            for (idx, case) in cases.iter().enumerate() {
                let output = execute(sandbox, &program, &case.stdin, limits)?;

                if let Some(failure) = classify_failure(&output) {
                    return Ok(failed(idx as u32, total, failure, case_context(case)));
                }

                let actual = match decode_result(&output.stdout) {
                    Some(value) => value,
                    None => {
                        return Ok(failed(
                            idx as u32,
                            total,
                            output.stdout.trim().to_string(),
                            case_context(case),
                        ));
                    }
                };

                // Coerce through the declared return type so comparison is
                // structural; a value of the wrong shape simply fails to
                // match.
                let comparable = Value::coerce(&signature.return_ty, &actual).ok();
                if comparable.as_ref() != Some(&case.expected) {
                    return Ok(failed(
                        idx as u32,
                        total,
                        Value::from_json(&actual).canonical(),
                        case_context(case),
                    ));
                }
            }

            Ok(Verdict::passed(total))
        }
        TestPlan::Legacy {
            input,
            expected,
            runner_code,
        } => {
            let program = if runner_code.trim().is_empty() {
                source.to_string()
            } else {
                format!("{source}\n\n{runner_code}")
            };
            let output = execute(sandbox, &program, input, limits)?;

            let context = (expected.trim().to_string(), input.clone());
            if let Some(failure) = classify_failure(&output) {
                return Ok(failed(0, 1, failure, context));
            }

            if output.stdout.trim() == expected.trim() {
                Ok(Verdict::passed(1))
            } else {
                Ok(failed(0, 1, output.stdout.trim().to_string(), context))
            }
        }
    }
}

fn execute(
    sandbox: &dyn SandboxRunner,
    program: &str,
    stdin: &str,
    limits: &ExecutionLimits,
) -> Result<ExecutionOutput, JudgeError> {
    sandbox
        .execute(program, stdin, limits)
        .map_err(|SandboxError::Launch(msg)| JudgeError::Launch(msg))
}

/// Maps sandbox-level outcomes to the user-visible failure text, or None for
/// a clean zero exit.
fn classify_failure(output: &ExecutionOutput) -> Option<String> {
    if output.timed_out {
        return Some("Time Limit Exceeded".to_string());
    }
    if output.memory_exceeded {
        return Some("Memory Limit Exceeded".to_string());
    }
    match output.exit_code {
        Some(0) => None,
        _ => {
            // Surface stderr so the user sees their traceback.
            let diagnostics = output.stderr.trim();
            if diagnostics.is_empty() {
                Some(format!(
                    "process exited with code {:?}",
                    output.exit_code
                ))
            } else {
                Some(diagnostics.to_string())
            }
        }
    }
}

/// The harness prints the JSON-encoded return value as the final stdout
/// line; anything the user printed above it is ignored.
fn decode_result(stdout: &str) -> Option<json::Value> {
    let last_line = stdout.lines().rev().find(|line| !line.trim().is_empty())?;
    json::from_str(last_line.trim()).ok()
}

fn case_context(case: &super::binder::BoundCase) -> (String, String) {
    (case.expected.canonical(), case.input_echo.to_string())
}

fn failed(index: u32, total: u32, output: String, context: (String, String)) -> Verdict {
    let (expected_output, test_case_input) = context;
    Verdict {
        status: VerdictStatus::Failed,
        output,
        expected_output,
        test_case_input,
        failed_index: Some(index),
        passed_count: index,
        total_count: total,
    }
}
