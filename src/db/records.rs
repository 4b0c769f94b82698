use chrono::NaiveDateTime;

use crate::verdict::{CaseVerdict, Progress, SubmissionVerdict};

/// Evaluation phase of a test case: `Built` cases run in the compiler
/// container, `Judge` cases in the runtime container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
pub enum CaseKind {
  Built,
  Judge,
}

/// One gradable task of a lecture, joined with the test cases and arranged
/// files the pipeline needs. Keyed by (lecture_id, assignment_id).
#[derive(Debug, Clone)]
pub struct Problem {
  pub lecture_id: i32,
  pub assignment_id: i32,
  pub title: String,
  pub description_path: String,
  /// Per-test wall-clock limit, ms.
  pub time_ms: i32,
  /// Per-test memory limit, MB.
  pub memory_mb: i32,

  pub test_cases: Vec<TestCase>,
  pub arranged_files: Vec<ArrangedFile>,
}

/// One evaluation step of a problem.
#[derive(Debug, Clone)]
pub struct TestCase {
  pub id: i32,
  pub lecture_id: i32,
  pub assignment_id: i32,
  /// Evaluation-only cases apply only to submissions judged with `eval`.
  pub eval: bool,
  pub kind: CaseKind,
  pub score: i32,
  pub title: String,
  pub description: Option<String>,
  pub message_on_fail: Option<String>,
  pub command: String,
  pub args: Option<String>,
  /// Resolved against the resource root.
  pub stdin_path: Option<String>,
  pub stdout_path: Option<String>,
  pub stderr_path: Option<String>,
  pub exit_code: i32,
}

impl TestCase {
  /// The shell command line handed to the watchdog: the command plus the
  /// optional argument string with its whitespace runs collapsed.
  pub fn shell_command(&self) -> String {
    match self.args.as_deref().map(str::trim) {
      Some(args) if !args.is_empty() => {
        let mut cmd = self.command.clone();
        cmd.push(' ');
        cmd.push_str(&args.split_whitespace().collect::<Vec<_>>().join(" "));
        cmd
      }
      _ => self.command.clone(),
    }
  }
}

/// Instructor-supplied file staged into the sandbox alongside the student's
/// upload. Path is relative to the resource root.
#[derive(Debug, Clone)]
pub struct ArrangedFile {
  pub id: i32,
  pub lecture_id: i32,
  pub assignment_id: i32,
  pub eval: bool,
  pub path: String,
}

/// One judge request, owned by the scheduler from `queued` through `done`.
#[derive(Debug, Clone)]
pub struct Submission {
  pub id: i32,
  pub ts: NaiveDateTime,
  /// Set when the submission was fanned out from a batch upload.
  pub evaluation_status_id: Option<i32>,
  pub user_id: String,
  pub lecture_id: i32,
  pub assignment_id: i32,
  /// Gates access to evaluation-only test cases.
  pub eval: bool,
  /// Upload directory, relative to the upload root.
  pub upload_dir: String,
  pub progress: Progress,
  pub total_task: i32,
  pub completed_task: i32,
  pub result: Option<SubmissionVerdict>,
  pub message: Option<String>,
  pub detail: Option<String>,
  pub score: Option<i32>,
  /// Maximum observed per-case time, ms.
  pub time_ms: Option<i32>,
  /// Maximum observed per-case memory, KB.
  pub memory_kb: Option<i32>,
}

/// Outcome of one test case, inserted wholesale at finalize.
#[derive(Debug, Clone)]
pub struct JudgeResult {
  pub submission_id: i32,
  pub testcase_id: i32,
  pub result: CaseVerdict,
  pub command: String,
  pub time_ms: i32,
  pub memory_kb: i32,
  pub exit_code: i32,
  pub stdout: String,
  pub stderr: String,
}
