use crate::{
  db::records::{CaseKind, JudgeResult, TestCase},
  runner::{apply_output_caps, classify_built, classify_judge, truncate_to_bytes},
  sandbox::WatchdogReport,
  verdict::CaseVerdict,
};

const CAP: usize = 8000;

fn case(kind: CaseKind, expected_exit: i32) -> TestCase {
  TestCase {
    id: 1,
    lecture_id: 1,
    assignment_id: 1,
    eval: false,
    kind,
    score: 10,
    title: "case".to_string(),
    description: None,
    message_on_fail: Some("failed".to_string()),
    command: "./main".to_string(),
    args: None,
    stdin_path: None,
    stdout_path: None,
    stderr_path: None,
    exit_code: expected_exit,
  }
}

fn report(exit_code: i32) -> WatchdogReport {
  WatchdogReport {
    exit_code,
    stdout: String::new(),
    stderr: String::new(),
    time_ms: 10,
    memory_kb: 100,
    tle: false,
    mle: false,
    ole: false,
  }
}

fn observed(report: &WatchdogReport) -> JudgeResult {
  JudgeResult {
    submission_id: 1,
    testcase_id: 1,
    result: CaseVerdict::AC,
    command: "./main".to_string(),
    time_ms: report.time_ms as i32,
    memory_kb: report.memory_kb as i32,
    exit_code: report.exit_code,
    stdout: report.stdout.clone(),
    stderr: report.stderr.clone(),
  }
}

#[test]
fn judge_accepts_matching_output() {
  let case = case(CaseKind::Judge, 0);
  let mut report = report(0);
  report.stdout = "Hello\n".to_string();
  let mut result = observed(&report);

  classify_judge(&case, &report, &mut result, Some("Hello"), None, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::AC);
}

#[test]
fn judge_normalizes_whitespace_before_comparing() {
  let case = case(CaseKind::Judge, 0);
  let mut report = report(0);
  report.stdout = "  1\t2   3  \n\n".to_string();
  let mut result = observed(&report);
  classify_judge(&case, &report, &mut result, Some("1 2 3\n"), None, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::AC);

  let mut report2 = self::report(0);
  report2.stdout = "1 2 4\n".to_string();
  let mut result = observed(&report2);
  classify_judge(&case, &report2, &mut result, Some("1 2 3\n"), None, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::WA);
}

#[test]
fn judge_checks_expected_stderr_too() {
  let case = case(CaseKind::Judge, 0);
  let mut report = report(0);
  report.stderr = "warning: overflow\n".to_string();
  let mut result = observed(&report);
  classify_judge(
    &case,
    &report,
    &mut result,
    None,
    Some("warning: overflow"),
    CAP,
    CAP,
  );
  assert_eq!(result.result, CaseVerdict::AC);

  let mut result = observed(&report);
  classify_judge(&case, &report, &mut result, None, Some("no warning"), CAP, CAP);
  assert_eq!(result.result, CaseVerdict::WA);
}

#[test]
fn judge_flags_runtime_error_on_unexpected_nonzero_exit() {
  let case = case(CaseKind::Judge, 0);
  let report = report(139);
  let mut result = observed(&report);
  classify_judge(&case, &report, &mut result, None, None, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::RE);
}

#[test]
fn judge_flags_wrong_answer_when_error_goes_undetected() {
  // The case expects the program to detect bad input and exit non-zero.
  let case = case(CaseKind::Judge, 1);
  let report = report(0);
  let mut result = observed(&report);
  classify_judge(&case, &report, &mut result, None, None, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::WA);

  // Any non-zero exit satisfies an expected-abnormal case.
  let report = self::report(2);
  let mut result = observed(&report);
  classify_judge(&case, &report, &mut result, None, None, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::AC);
}

#[test]
fn judge_time_limit_wins_over_memory_limit() {
  let case = case(CaseKind::Judge, 0);
  let mut report = report(137);
  report.tle = true;
  report.mle = true;
  let mut result = observed(&report);
  classify_judge(&case, &report, &mut result, None, None, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::TLE);

  report.tle = false;
  let mut result = observed(&report);
  classify_judge(&case, &report, &mut result, None, None, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::MLE);
}

#[test]
fn judge_output_overflow_wins_over_time_limit() {
  let case = case(CaseKind::Judge, 0);
  let mut report = report(0);
  report.stdout = "x".repeat(200);
  report.tle = true;
  let mut result = observed(&report);
  classify_judge(&case, &report, &mut result, None, None, 100, 100);
  assert_eq!(result.result, CaseVerdict::OLE);
  assert_eq!(result.stdout.len(), 100);
  assert!(result.stderr.ends_with("capacity (100 bytes) exceeded"));
  assert!(result.stderr.len() <= 100);
}

#[test]
fn judge_honors_the_watchdog_overflow_flag() {
  let case = case(CaseKind::Judge, 0);
  let mut report = report(0);
  report.ole = true;
  let mut result = observed(&report);
  classify_judge(&case, &report, &mut result, None, None, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::OLE);
}

#[test]
fn built_compares_exit_code_only() {
  let case = case(CaseKind::Built, 0);
  let mut report = report(0);
  report.stdout = "make: warnings everywhere\n".to_string();
  let mut result = observed(&report);
  classify_built(&case, &report, &mut result, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::AC);

  let report = self::report(2);
  let mut result = observed(&report);
  classify_built(&case, &report, &mut result, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::CE);
}

#[test]
fn built_exit_mismatch_dominates_limit_flags() {
  let case = case(CaseKind::Built, 0);
  let mut report = report(1);
  report.tle = true;
  let mut result = observed(&report);
  classify_built(&case, &report, &mut result, CAP, CAP);
  assert_eq!(result.result, CaseVerdict::CE);
}

#[test]
fn built_overflow_is_reported_when_exit_matches() {
  let case = case(CaseKind::Built, 0);
  let mut report = report(0);
  report.stderr = "e".repeat(300);
  let mut result = observed(&report);
  classify_built(&case, &report, &mut result, 100, 100);
  assert_eq!(result.result, CaseVerdict::OLE);
  assert!(result.stderr.len() <= 100);
}

#[test]
fn stderr_overflow_gets_a_truncation_notice() {
  let mut result = observed(&report(0));
  result.stderr = "e".repeat(300);
  assert!(apply_output_caps(&mut result, 100, 100));
  assert!(result.stderr.ends_with("stderr is too long: capacity (100 bytes) exceeded"));
  assert!(result.stderr.len() <= 100);
}

#[test]
fn truncation_respects_utf8_boundaries() {
  assert_eq!(truncate_to_bytes("あいう", 4), "あ");
  assert_eq!(truncate_to_bytes("あいう", 9), "あいう");
  assert_eq!(truncate_to_bytes("abc", 2), "ab");
  assert_eq!(truncate_to_bytes("", 5), "");
}
