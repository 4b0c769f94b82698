//! Runs single test cases inside a prepared sandbox container through the
//! in-container watchdog and classifies the outcome.

use std::fs;

use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;

use crate::{
  checker,
  db::{
    crud,
    records::{CaseKind, JudgeResult, Submission, TestCase},
  },
  sandbox::{self, Container, TaskSpec, WatchdogReport},
  verdict::CaseVerdict,
  CONFIG,
};

/// Workdir of the unprivileged user; task.json lands here.
pub const GUEST_HOME: &str = "/home/guest";

/// In-container path of the watchdog binary (present on both images).
pub const WATCHDOG_BIN: &str = "/home/watchdog";

const TASK_FILE: &str = "task.json";

/// Watchdog limits of one case. Built cases use the configured build limits,
/// Judge cases the problem's own.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
  pub time_ms: u64,
  pub memory_mb: u64,
}

/// Infrastructure failure outside the student program; the enclosing
/// submission is finalized as an internal error.
#[derive(Debug, Error)]
pub enum StageError {
  #[error("failed to upload task.json: {0}")]
  Upload(#[source] sandbox::Error),

  #[error("failed to secure task.json ({step}): {detail}")]
  Secure { step: &'static str, detail: String },

  #[error("io error on test-case resources: {0}")]
  Io(#[from] std::io::Error),

  #[error("task.json serialization: {0}")]
  Json(#[from] serde_json::Error),

  #[error("database error: {0}")]
  Db(#[from] sqlx::Error),
}

impl StageError {
  /// Short operator-facing message stored on the submission.
  pub fn operator_message(&self) -> String {
    match self {
      StageError::Upload(_) => {
        "Failed to send task information to sandbox. Please reupload or tell the administrator."
          .to_string()
      }
      StageError::Secure { step, .. } => {
        let n = if *step == "chown" { 1 } else { 2 };
        format!("Failed to setup sandbox({n}), Please reupload or tell the administrator.")
      }
      _ => "Internal error while judging. Please tell the administrator.".to_string(),
    }
  }
}

/// Run every case of one phase, in order, against `container`.
///
/// Returns the per-case results and whether the phase aborted on an internal
/// error. A watchdog-level failure (host exec error, non-zero watchdog exit,
/// schema-invalid output) is recorded as an `IE` result and stops the run;
/// the caller must not start further cases for this submission.
/// `completed_task` is persisted after every successfully parsed case so
/// observers see the ratio advance.
pub async fn run_cases(
  pool: &PgPool,
  container: &Container,
  submission: &mut Submission,
  cases: &[&TestCase],
  limits: Limits,
) -> Result<(Vec<JudgeResult>, bool), StageError> {
  let mut results = Vec::with_capacity(cases.len());

  for case in cases {
    let command = case.shell_command();

    let stdin = match &case.stdin_path {
      Some(path) => fs::read_to_string(CONFIG.resource_path.join(path))?,
      None => String::new(),
    };

    let spec = TaskSpec {
      command: command.clone(),
      stdin,
      timeout_ms: limits.time_ms,
      memory_limit_mb: limits.memory_mb,
      uid: CONFIG.guest_uid,
      gid: CONFIG.guest_gid,
    };

    stage_task(container, &spec).await?;

    let mut result = JudgeResult {
      submission_id: submission.id,
      testcase_id: case.id,
      result: CaseVerdict::AC,
      command,
      time_ms: 0,
      memory_kb: 0,
      exit_code: 0,
      stdout: String::new(),
      stderr: String::new(),
    };

    let exec = container
      .exec(
        vec![WATCHDOG_BIN.to_string(), TASK_FILE.to_string()],
        "root",
        GUEST_HOME,
        CONFIG.exec_timeout(),
      )
      .await;

    let output = match exec {
      Ok(output) => output,
      Err(err) => {
        result.result = CaseVerdict::IE;
        result.stderr = format!("exec error: {err}");
        results.push(result);
        return Ok((results, true));
      }
    };

    if output.exit_code != 0 {
      result.result = CaseVerdict::IE;
      result.exit_code = output.exit_code as i32;
      result.stderr = format!("watchdog error: {}", output.stderr);
      results.push(result);
      return Ok((results, true));
    }

    let report = match WatchdogReport::parse(&output.stdout) {
      Ok(report) => report,
      Err(err) => {
        result.result = CaseVerdict::IE;
        result.stderr = format!("validation error: {err}\nwatchdog error: {}", output.stderr);
        results.push(result);
        return Ok((results, true));
      }
    };

    result.exit_code = report.exit_code;
    result.stdout = report.stdout.clone();
    result.stderr = report.stderr.clone();
    result.time_ms = report.time_ms as i32;
    result.memory_kb = report.memory_kb as i32;

    submission.completed_task += 1;
    crud::update_submission_progress(
      pool,
      submission.id,
      submission.progress,
      submission.completed_task,
      submission.total_task,
      submission.result,
    )
    .await?;

    match case.kind {
      CaseKind::Built => classify_built(
        case,
        &report,
        &mut result,
        CONFIG.output_limit_stdout_bytes,
        CONFIG.output_limit_stderr_bytes,
      ),
      CaseKind::Judge => {
        let expected_stdout = match &case.stdout_path {
          Some(path) => Some(fs::read_to_string(CONFIG.resource_path.join(path))?),
          None => None,
        };
        let expected_stderr = match &case.stderr_path {
          Some(path) => Some(fs::read_to_string(CONFIG.resource_path.join(path))?),
          None => None,
        };
        classify_judge(
          case,
          &report,
          &mut result,
          expected_stdout.as_deref(),
          expected_stderr.as_deref(),
          CONFIG.output_limit_stdout_bytes,
          CONFIG.output_limit_stderr_bytes,
        );
      }
    }

    debug!(
      submission = submission.id,
      testcase = case.id,
      verdict = %result.result,
      time_ms = result.time_ms,
      memory_kb = result.memory_kb,
      "case finished"
    );

    results.push(result);
  }

  return Ok((results, false));
}

/// Classify a Built (compile) case. Output contents are never compared; only
/// the exit code is checked, and a mismatch dominates every limit flag.
pub fn classify_built(
  case: &TestCase,
  report: &WatchdogReport,
  result: &mut JudgeResult,
  stdout_cap: usize,
  stderr_cap: usize,
) {
  result.result = CaseVerdict::AC;
  if report.tle {
    result.result = CaseVerdict::TLE;
  }
  if report.mle {
    result.result = CaseVerdict::MLE;
  }
  if apply_output_caps(result, stdout_cap, stderr_cap) {
    result.result = CaseVerdict::OLE;
  }
  if report.exit_code != case.exit_code {
    result.result = CaseVerdict::CE;
  }
}

/// Classify a Judge (execution) case.
///
/// Precedence: output overflow, then wall clock, then memory, then a
/// wrong-direction exit, then an output mismatch. A case with a non-zero
/// expected exit code that exits zero failed to detect the error it was
/// meant to detect and is a wrong answer.
pub fn classify_judge(
  case: &TestCase,
  report: &WatchdogReport,
  result: &mut JudgeResult,
  expected_stdout: Option<&str>,
  expected_stderr: Option<&str>,
  stdout_cap: usize,
  stderr_cap: usize,
) {
  let capped = apply_output_caps(result, stdout_cap, stderr_cap);
  let expect_normal_exit = case.exit_code == 0;

  result.result = if capped || report.ole {
    CaseVerdict::OLE
  } else if report.tle {
    CaseVerdict::TLE
  } else if report.mle {
    CaseVerdict::MLE
  } else if expect_normal_exit && report.exit_code != 0 {
    CaseVerdict::RE
  } else if expected_stdout.is_some_and(|e| !checker::outputs_match(e, &result.stdout))
    || expected_stderr.is_some_and(|e| !checker::outputs_match(e, &result.stderr))
  {
    CaseVerdict::WA
  } else if !expect_normal_exit && report.exit_code == 0 {
    CaseVerdict::WA
  } else {
    CaseVerdict::AC
  };
}

/// Enforce the configured byte caps on the captured streams. An overflowing
/// stream is truncated and a notice is appended to stderr (keeping stderr
/// itself within its cap). Returns whether any stream overflowed.
pub fn apply_output_caps(result: &mut JudgeResult, stdout_cap: usize, stderr_cap: usize) -> bool {
  let mut exceeded = false;

  if result.stdout.len() > stdout_cap {
    exceeded = true;
    result.stdout = truncate_to_bytes(&result.stdout, stdout_cap);
    let notice = format!("stdout is too long: capacity ({stdout_cap} bytes) exceeded");
    result.stderr =
      truncate_to_bytes(&result.stderr, stderr_cap.saturating_sub(notice.len())) + &notice;
  }

  if result.stderr.len() > stderr_cap {
    exceeded = true;
    let notice = format!("stderr is too long: capacity ({stderr_cap} bytes) exceeded");
    result.stderr =
      truncate_to_bytes(&result.stderr, stderr_cap.saturating_sub(notice.len())) + &notice;
  }

  return exceeded;
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence.
pub fn truncate_to_bytes(text: &str, max: usize) -> String {
  if text.len() <= max {
    return text.to_string();
  }
  let mut end = max;
  while end > 0 && !text.is_char_boundary(end) {
    end -= 1;
  }
  return text[..end].to_string();
}

/// Materialize task.json on the host, upload it into the container, and lock
/// it down to root:root mode 0600 before the watchdog runs as root.
async fn stage_task(container: &Container, spec: &TaskSpec) -> Result<(), StageError> {
  let dir = tempfile::tempdir()?;
  let host_path = dir.path().join(TASK_FILE);
  fs::write(&host_path, serde_json::to_string_pretty(spec)?)?;

  container
    .upload_file(&host_path, GUEST_HOME, 0, 0)
    .await
    .map_err(StageError::Upload)?;

  let task_path = format!("{GUEST_HOME}/{TASK_FILE}");
  let steps: [(&'static str, Vec<String>); 2] = [
    (
      "chown",
      vec!["chown".into(), "root:root".into(), task_path.clone()],
    ),
    ("chmod", vec!["chmod".into(), "600".into(), task_path]),
  ];

  for (step, argv) in steps {
    let output = container
      .exec(argv, "root", GUEST_HOME, CONFIG.setup_timeout())
      .await
      .map_err(|err| StageError::Secure {
        step,
        detail: err.to_string(),
      })?;

    if output.exit_code != 0 {
      return Err(StageError::Secure {
        step,
        detail: format!("exit code {}: {}", output.exit_code, output.stderr),
      });
    }
  }

  Ok(())
}
